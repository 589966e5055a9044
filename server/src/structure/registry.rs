//! Registry of sampling structures, keyed by name.
//!
//! # Invariants
//!
//! - A name has at most one build in progress.
//! - While a forced rebuild runs, the previous version of the structure
//!   stays in the registry and keeps answering queries.
//! - A structure that is replaced or dropped is retired: its file is
//!   removed once the last query session reading it has ended.
//! - A failed build leaves its input file in place for inspection.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::proto;
use crate::rtree::{MAX_INTERNAL_ENTRIES, MAX_LEAF_ENTRIES, RTree, TreeError};
use crate::storage::{StoreError, StructureFile, Superblock, TimeSource};
use crate::structure::checkpoint::{self, CheckpointError, STATE_FILE};
use crate::structure::ingest::{self, IngestError};
use crate::structure::sampling::SamplingStructure;
use crate::types::client_message::BuildCommand;
use crate::types::{PayloadKind, Record};

/// Stage of a build that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    ReadInput,
    ParseInput,
    WritePages,
    Finalize,
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadInput => write!(f, "reading input"),
            Self::ParseInput => write!(f, "parsing input"),
            Self::WritePages => write!(f, "writing pages"),
            Self::Finalize => write!(f, "finalizing"),
        }
    }
}

/// Underlying cause of a build failure.
#[derive(Debug)]
pub enum BuildErrorKind {
    Io(std::io::Error),
    Ingest(IngestError),
    Store(StoreError),
    Tree(TreeError),
}

impl std::fmt::Display for BuildErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{e}"),
            Self::Ingest(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Tree(e) => write!(f, "{e}"),
        }
    }
}

/// A failed build, with enough context for an operator to find the cause.
#[derive(Debug)]
pub struct BuildError {
    pub structure: String,
    pub stage: BuildStage,
    pub kind: BuildErrorKind,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "build of '{}' failed while {}: {}",
            self.structure, self.stage, self.kind
        )
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            BuildErrorKind::Io(e) => Some(e),
            BuildErrorKind::Ingest(e) => Some(e),
            BuildErrorKind::Store(e) => Some(e),
            BuildErrorKind::Tree(e) => Some(e),
        }
    }
}

/// Errors from registry operations.
#[derive(Debug)]
pub enum RegistryError {
    InvalidName(String),
    AlreadyExists(String),
    /// The named structure is currently being built.
    BuildInProgress(String),
    NotFound(String),
    InputNotFound(PathBuf),
    Build(BuildError),
    Insert { structure: String, source: TreeError },
    Checkpoint(CheckpointError),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(
                f,
                "invalid structure name '{name}'; only letters, digits, '.' and '_' are allowed"
            ),
            Self::AlreadyExists(name) => write!(
                f,
                "structure '{name}' already exists; set force to rebuild it"
            ),
            Self::BuildInProgress(name) => write!(f, "structure '{name}' is currently being built"),
            Self::NotFound(name) => write!(f, "structure '{name}' does not exist"),
            Self::InputNotFound(path) => write!(f, "input file '{}' does not exist", path.display()),
            Self::Build(e) => write!(f, "{e}"),
            Self::Insert { structure, source } => {
                write!(f, "insert into '{structure}' failed: {source}")
            }
            Self::Checkpoint(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Build(e) => Some(e),
            Self::Insert { source, .. } => Some(source),
            Self::Checkpoint(e) => Some(e),
            Self::InvalidName(_)
            | Self::AlreadyExists(_)
            | Self::BuildInProgress(_)
            | Self::NotFound(_)
            | Self::InputNotFound(_) => None,
        }
    }
}

impl From<CheckpointError> for RegistryError {
    fn from(err: CheckpointError) -> Self {
        Self::Checkpoint(err)
    }
}

/// Check a structure name is non-empty and uses only `[A-Za-z0-9._]`.
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
    {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Settings for structures built or opened by a registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Directory holding structure files and the checkpoint.
    pub data_dir: PathBuf,
    /// Node cache bound per structure (0 = unlimited).
    pub cache_pages: usize,
    /// Write the checkpoint after every build and drop.
    pub autosave: bool,
    pub leaf_capacity: u16,
    pub internal_capacity: u16,
}

impl RegistryConfig {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            cache_pages: 4096,
            autosave: false,
            leaf_capacity: MAX_LEAF_ENTRIES as u16,
            internal_capacity: MAX_INTERNAL_ENTRIES as u16,
        }
    }
}

#[derive(Default)]
struct Slot {
    current: Option<Arc<SamplingStructure>>,
    /// Payload kind of a build in progress.
    building: Option<PayloadKind>,
}

/// Thread-safe registry of named sampling structures.
pub struct StructureRegistry {
    config: RegistryConfig,
    clock: Arc<dyn TimeSource>,
    slots: Mutex<BTreeMap<String, Slot>>,
    file_seq: AtomicU64,
}

impl StructureRegistry {
    #[must_use]
    pub fn new(config: RegistryConfig, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            config,
            clock,
            slots: Mutex::new(BTreeMap::new()),
            file_seq: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Slot>> {
        self.slots.lock().expect("lock poisoned")
    }

    /// The current version of `name`. A structure whose first build is
    /// still running is not found.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn get(&self, name: &str) -> Result<Arc<SamplingStructure>, RegistryError> {
        let slots = self.lock();
        match slots.get(name) {
            Some(Slot {
                current: Some(structure),
                ..
            }) => Ok(Arc::clone(structure)),
            _ => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    /// Build (or with `force`, rebuild) a structure from an input file.
    ///
    /// Blocks for the duration of the build.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn build(&self, cmd: &BuildCommand) -> Result<Arc<SamplingStructure>, RegistryError> {
        validate_name(&cmd.name)?;
        if !cmd.input.is_file() {
            return Err(RegistryError::InputNotFound(cmd.input.clone()));
        }

        {
            let mut slots = self.lock();
            let slot = slots.entry(cmd.name.clone()).or_default();
            if slot.building.is_some() {
                return Err(RegistryError::BuildInProgress(cmd.name.clone()));
            }
            if slot.current.is_some() && !cmd.force {
                return Err(RegistryError::AlreadyExists(cmd.name.clone()));
            }
            slot.building = Some(cmd.payload_kind);
        }

        let started = Instant::now();
        info!(
            structure = %cmd.name,
            input = %cmd.input.display(),
            payload = ?cmd.payload_kind,
            "Building structure"
        );
        let result = self.build_structure(cmd).map(Arc::new);

        {
            let mut slots = self.lock();
            let remove = slots.get_mut(&cmd.name).is_some_and(|slot| {
                slot.building = None;
                if let Ok(structure) = &result
                    && let Some(old) = slot.current.replace(Arc::clone(structure))
                {
                    old.retire();
                }
                slot.current.is_none()
            });
            if remove {
                slots.remove(&cmd.name);
            }
        }

        match &result {
            Ok(structure) => {
                info!(
                    structure = %cmd.name,
                    records = structure.len(),
                    elapsed = ?started.elapsed(),
                    "Built structure"
                );
                if cmd.remove_input
                    && let Err(e) = fs::remove_file(&cmd.input)
                {
                    warn!(input = %cmd.input.display(), "Failed to remove input file: {e}");
                }
                self.autosave();
            }
            Err(e) => warn!("{e}"),
        }
        result
    }

    fn build_structure(&self, cmd: &BuildCommand) -> Result<SamplingStructure, RegistryError> {
        let fail = |stage, kind| {
            RegistryError::Build(BuildError {
                structure: cmd.name.clone(),
                stage,
                kind,
            })
        };

        let input = File::open(&cmd.input)
            .map_err(|e| fail(BuildStage::ReadInput, BuildErrorKind::Io(e)))?;
        let records = ingest::read_records(BufReader::new(input), cmd.payload_kind).map_err(
            |e| match e {
                IngestError::Io(_) => fail(BuildStage::ReadInput, BuildErrorKind::Ingest(e)),
                IngestError::Parse { .. } => {
                    fail(BuildStage::ParseInput, BuildErrorKind::Ingest(e))
                }
            },
        )?;

        let built_at_ms = self.clock.now_ms();
        let seq = self.file_seq.fetch_add(1, Ordering::SeqCst);
        let path = self
            .config
            .data_dir
            .join(format!("{}.{built_at_ms}.{seq}.tree", cmd.name));
        let partial = path.with_extension("tree.partial");

        fs::create_dir_all(&self.config.data_dir)
            .map_err(|e| fail(BuildStage::WritePages, BuildErrorKind::Io(e)))?;
        let superblock = Superblock::new(
            cmd.payload_kind,
            self.config.leaf_capacity,
            self.config.internal_capacity,
        );
        let file = StructureFile::create(&partial, superblock)
            .map_err(|e| fail(BuildStage::WritePages, BuildErrorKind::Store(e)))?;
        let loaded =
            RTree::bulk_load(Box::new(file), records, self.config.cache_pages, built_at_ms);
        let tree = match loaded {
            Ok(tree) => tree,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(fail(BuildStage::WritePages, BuildErrorKind::Tree(e)));
            }
        };
        if let Err(e) = fs::rename(&partial, &path) {
            let _ = fs::remove_file(&partial);
            return Err(fail(BuildStage::Finalize, BuildErrorKind::Io(e)));
        }

        Ok(SamplingStructure::new(cmd.name.clone(), path, tree))
    }

    /// Every structure, including ones still being built (count 0, age -1).
    #[must_use]
    pub fn list(&self) -> Vec<proto::StructureInfo> {
        let now_ms = self.clock.now_ms();
        let slots = self.lock();
        slots
            .iter()
            .map(|(name, slot)| match (&slot.building, &slot.current) {
                (Some(kind), _) => proto::StructureInfo {
                    name: name.clone(),
                    count: 0,
                    payload_type: proto::PayloadType::from(*kind).into(),
                    sec_since_rebuild: -1,
                },
                (None, Some(structure)) => structure.info(now_ms),
                (None, None) => proto::StructureInfo {
                    name: name.clone(),
                    sec_since_rebuild: -1,
                    ..Default::default()
                },
            })
            .collect()
    }

    /// Remove a structure. Sessions already reading it keep working.
    pub fn drop_structure(&self, name: &str) -> Result<(), RegistryError> {
        {
            let mut slots = self.lock();
            let building = match slots.get(name) {
                None => {
                    warn!(structure = %name, "Attempt to drop a structure that does not exist");
                    return Err(RegistryError::NotFound(name.to_string()));
                }
                Some(slot) => slot.building.is_some(),
            };
            if building {
                return Err(RegistryError::BuildInProgress(name.to_string()));
            }
            if let Some(Slot {
                current: Some(structure),
                ..
            }) = slots.remove(name)
            {
                structure.retire();
            }
        }
        info!(structure = %name, "Dropped structure");
        self.autosave();
        Ok(())
    }

    /// Insert records into a built structure, returning how many were added.
    pub fn insert(&self, name: &str, records: Vec<Record>) -> Result<usize, RegistryError> {
        let structure = self.get(name)?;
        structure
            .insert(records)
            .map_err(|source| RegistryError::Insert {
                structure: name.to_string(),
                source,
            })
    }

    fn state_path(&self) -> PathBuf {
        self.config.data_dir.join(STATE_FILE)
    }

    /// Write the checkpoint, returning the number of structures saved.
    pub fn save_checkpoint(&self) -> Result<usize, RegistryError> {
        let structures: Vec<proto::SavedStructure> = {
            let slots = self.lock();
            slots
                .values()
                .filter_map(|slot| slot.current.as_ref())
                .map(|s| proto::SavedStructure {
                    name: s.name().to_string(),
                    file_name: s
                        .path()
                        .file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    payload_type: proto::PayloadType::from(s.payload_kind()).into(),
                    built_at_ms: s.built_at_ms(),
                })
                .collect()
        };
        let count = structures.len();
        let state = proto::RepositoryState {
            structures,
            saved_at_ms: self.clock.now_ms(),
        };
        fs::create_dir_all(&self.config.data_dir).map_err(CheckpointError::from)?;
        checkpoint::save(&self.state_path(), &state)?;
        info!(structures = count, path = %self.state_path().display(), "Saved registry checkpoint");
        Ok(count)
    }

    fn autosave(&self) {
        if self.config.autosave
            && let Err(e) = self.save_checkpoint()
        {
            warn!("Autosave failed: {e}");
        }
    }

    /// Reopen every structure listed in the checkpoint.
    ///
    /// Structures whose files cannot be opened are skipped with a warning.
    /// Returns the number restored.
    pub fn restore_checkpoint(&self) -> Result<usize, RegistryError> {
        let path = self.state_path();
        let Some(state) = checkpoint::load(&path)? else {
            info!(path = %path.display(), "No registry checkpoint to restore");
            return Ok(0);
        };

        let mut restored = 0;
        for saved in state.structures {
            if let Err(e) = validate_name(&saved.name) {
                warn!("Skipping checkpoint entry: {e}");
                continue;
            }
            let file_path = self.config.data_dir.join(&saved.file_name);
            let tree = StructureFile::open(&file_path)
                .map_err(TreeError::from)
                .and_then(|file| RTree::open(Box::new(file), self.config.cache_pages));
            match tree {
                Ok(tree) => {
                    debug!(structure = %saved.name, records = tree.len(), "Restored structure");
                    let structure = SamplingStructure::new(saved.name.clone(), file_path, tree);
                    let mut slots = self.lock();
                    slots.entry(saved.name).or_default().current = Some(Arc::new(structure));
                    restored += 1;
                }
                Err(e) => warn!(
                    structure = %saved.name,
                    path = %file_path.display(),
                    "Failed to restore structure: {e}"
                ),
            }
        }
        info!(structures = restored, "Restored registry checkpoint");
        Ok(restored)
    }
}
