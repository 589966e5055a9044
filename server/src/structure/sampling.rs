//! A built sampling structure: one named R-tree backed by one file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::proto;
use crate::rtree::{RTree, TreeError};
use crate::types::{PayloadKind, Record};

/// A named, queryable R-tree.
///
/// Query sessions hold an `Arc` to the structure they read, so a structure
/// that is dropped or replaced stays usable until its last session ends.
/// Its backing file is removed at that point if it was retired.
pub struct SamplingStructure {
    name: String,
    path: PathBuf,
    tree: RwLock<RTree>,
    retired: AtomicBool,
}

impl std::fmt::Debug for SamplingStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingStructure")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("retired", &self.is_retired())
            .finish_non_exhaustive()
    }
}

impl SamplingStructure {
    #[must_use]
    pub const fn new(name: String, path: PathBuf, tree: RTree) -> Self {
        Self {
            name,
            path,
            tree: RwLock::new(tree),
            retired: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared access for queries.
    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    pub fn tree(&self) -> RwLockReadGuard<'_, RTree> {
        self.tree.read().expect("lock poisoned")
    }

    /// Exclusive access for inserts.
    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    pub fn tree_mut(&self) -> RwLockWriteGuard<'_, RTree> {
        self.tree.write().expect("lock poisoned")
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.tree().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn payload_kind(&self) -> PayloadKind {
        self.tree().payload_kind()
    }

    #[must_use]
    pub fn built_at_ms(&self) -> u64 {
        self.tree().built_at_ms()
    }

    /// Insert records and persist the tree.
    ///
    /// Open cursors over this structure become stale.
    #[allow(clippy::significant_drop_tightening)] // the write lock covers the persist
    pub fn insert(&self, records: Vec<Record>) -> Result<usize, TreeError> {
        let count = records.len();
        let mut tree = self.tree_mut();
        for record in records {
            tree.insert(record)?;
        }
        tree.persist()?;
        debug!(structure = %self.name, inserted = count, total = tree.len(), "Inserted records");
        Ok(count)
    }

    /// Remove the backing file once the last reference is dropped.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Listing entry, with the age computed against `now_ms`.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn info(&self, now_ms: u64) -> proto::StructureInfo {
        let tree = self.tree();
        proto::StructureInfo {
            name: self.name.clone(),
            count: tree.len(),
            payload_type: proto::PayloadType::from(tree.payload_kind()).into(),
            sec_since_rebuild: (now_ms.saturating_sub(tree.built_at_ms()) / 1000) as i64,
        }
    }
}

impl Drop for SamplingStructure {
    fn drop(&mut self) {
        if !self.is_retired() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(structure = %self.name, path = %self.path.display(), "Removed structure file"),
            Err(e) => warn!(structure = %self.name, path = %self.path.display(), "Failed to remove structure file: {e}"),
        }
    }
}
