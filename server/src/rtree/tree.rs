//! Paged R-tree over a `PageStore`.
//!
//! Nodes are read and written through a `PageCache`: a miss loads the page
//! from the store and decodes it, and dirty nodes are encoded and written
//! back when evicted or when the tree is persisted.
//!
//! # Locking
//!
//! The cache lock is always taken before the store lock. The store lock is
//! never held while calling into the cache.

use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::rtree::hilbert::HilbertMapper;
use crate::rtree::node::{
    ChildEntry, InternalNode, LeafNode, MAX_INTERNAL_ENTRIES, MAX_LEAF_ENTRIES, Node, NodeError,
};
use crate::storage::{
    CacheError, PageCache, PageHandle, PageId, PageStore, StoreError, Superblock, WriteBack,
};
use crate::types::{BoundingBox, PayloadKind, Record};

/// Shared handle to the page store backing one tree.
type SharedStore = Arc<Mutex<Box<dyn PageStore>>>;

/// A checked-out tree node.
pub type NodeHandle<'a> = PageHandle<'a, PageId, Node, NodeWriter>;

/// Error moving a node between the cache and the store.
#[derive(Debug)]
pub enum PageIoError {
    Store(StoreError),
    Node { page: PageId, source: NodeError },
}

impl std::fmt::Display for PageIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{e}"),
            Self::Node { page, source } => write!(f, "page {page}: {source}"),
        }
    }
}

impl std::error::Error for PageIoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Node { source, .. } => Some(source),
        }
    }
}

impl From<StoreError> for PageIoError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Errors from tree operations.
#[derive(Debug)]
pub enum TreeError {
    Store(StoreError),
    Cache(CacheError<PageId, PageIoError>),
    Node(NodeError),
    /// The tree's pages do not describe a valid tree.
    Corrupt { page: PageId, reason: String },
    /// A record's payload does not match the tree's payload kind.
    PayloadMismatch {
        expected: PayloadKind,
        actual: PayloadKind,
    },
    /// The tree changed since a cursor over it was opened.
    StaleCursor,
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "storage error: {e}"),
            Self::Cache(e) => write!(f, "page cache error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Corrupt { page, reason } => write!(f, "corrupt tree at page {page}: {reason}"),
            Self::PayloadMismatch { expected, actual } => write!(
                f,
                "payload kind mismatch: structure holds {expected:?}, record has {actual:?}"
            ),
            Self::StaleCursor => write!(f, "tree was modified while a cursor was open"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Cache(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::Corrupt { .. } | Self::PayloadMismatch { .. } | Self::StaleCursor => None,
        }
    }
}

impl From<StoreError> for TreeError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<CacheError<PageId, PageIoError>> for TreeError {
    fn from(err: CacheError<PageId, PageIoError>) -> Self {
        Self::Cache(err)
    }
}

impl From<NodeError> for TreeError {
    fn from(err: NodeError) -> Self {
        Self::Node(err)
    }
}

fn corrupt(page: PageId, reason: impl Into<String>) -> TreeError {
    TreeError::Corrupt {
        page,
        reason: reason.into(),
    }
}

/// Encodes nodes and writes them to the store on cache write-back.
pub struct NodeWriter {
    store: SharedStore,
}

impl NodeWriter {
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn store(&self) -> MutexGuard<'_, Box<dyn PageStore>> {
        self.store.lock().expect("lock poisoned")
    }

    fn load(&self, page_id: PageId) -> Result<Node, PageIoError> {
        let page = self.store().read_page(page_id)?;
        Node::from_page(&page).map_err(|source| PageIoError::Node {
            page: page_id,
            source,
        })
    }
}

impl WriteBack<PageId, Node> for NodeWriter {
    type Error = PageIoError;

    fn write_back(&self, key: &PageId, value: &Node) -> Result<(), Self::Error> {
        let page = value.to_page().map_err(|source| PageIoError::Node {
            page: *key,
            source,
        })?;
        self.store().write_page(*key, &page)?;
        Ok(())
    }
}

/// A disk-resident R-tree of records.
///
/// # Invariants
///
/// - Every internal entry's region covers its child's subtree and its count
///   equals the number of records in that subtree.
/// - All leaves are at level 0; a node at level `l > 0` has children at
///   level `l - 1`.
/// - `root == 0` exactly when the tree holds no records.
/// - `generation` increases with every modification.
pub struct RTree {
    store: SharedStore,
    cache: PageCache<PageId, Node, NodeWriter>,
    root: PageId,
    height: u32,
    record_count: u64,
    built_at_ms: u64,
    payload_kind: PayloadKind,
    leaf_capacity: usize,
    internal_capacity: usize,
    generation: u64,
}

impl RTree {
    /// Open the tree described by `store`'s superblock.
    ///
    /// `cache_pages` bounds the number of resident nodes (0 means unlimited).
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn open(store: Box<dyn PageStore>, cache_pages: usize) -> Result<Self, TreeError> {
        let sb = *store.superblock();
        let leaf_capacity = usize::from(sb.leaf_capacity);
        let internal_capacity = usize::from(sb.internal_capacity);
        if !(2..=MAX_LEAF_ENTRIES).contains(&leaf_capacity) {
            return Err(corrupt(0, format!("leaf capacity {leaf_capacity}")));
        }
        if !(2..=MAX_INTERNAL_ENTRIES).contains(&internal_capacity) {
            return Err(corrupt(0, format!("internal capacity {internal_capacity}")));
        }
        if (sb.root_page == 0) != (sb.record_count == 0) {
            return Err(corrupt(0, "root and record count disagree"));
        }

        let store: SharedStore = Arc::new(Mutex::new(store));
        let writer = NodeWriter {
            store: Arc::clone(&store),
        };
        Ok(Self {
            store,
            cache: PageCache::new(cache_pages, writer),
            root: sb.root_page,
            height: sb.height,
            record_count: sb.record_count,
            built_at_ms: sb.built_at_ms,
            payload_kind: sb.payload_kind,
            leaf_capacity,
            internal_capacity,
            generation: 0,
        })
    }

    /// Build a packed tree from `records` and persist it.
    ///
    /// Records are sorted along a Hilbert curve and packed into full
    /// leaves, then each level is packed into full internal nodes until a
    /// single root remains.
    #[allow(clippy::cast_possible_truncation)]
    pub fn bulk_load(
        store: Box<dyn PageStore>,
        mut records: Vec<Record>,
        cache_pages: usize,
        built_at_ms: u64,
    ) -> Result<Self, TreeError> {
        let mut tree = Self::open(store, cache_pages)?;
        if tree.root != 0 {
            return Err(corrupt(tree.root, "bulk load into a non-empty tree"));
        }
        tree.built_at_ms = built_at_ms;
        if let Some(bad) = records.iter().find(|r| r.payload.kind() != tree.payload_kind) {
            return Err(TreeError::PayloadMismatch {
                expected: tree.payload_kind,
                actual: bad.payload.kind(),
            });
        }

        if !records.is_empty() {
            let mapper = HilbertMapper::for_records(&records);
            records.sort_by_cached_key(|r| mapper.key(r));

            let mut level: Vec<ChildEntry> = Vec::new();
            let leaves: Vec<&[Record]> = records.chunks(tree.leaf_capacity).collect();
            let first = tree.allocate(leaves.len())?;
            for (page, chunk) in (first..).zip(leaves) {
                let node = Node::Leaf(LeafNode::new(tree.payload_kind, chunk.to_vec()));
                level.push(tree.entry_for(page, &node)?);
                tree.cache.put(page, node)?;
            }

            let mut height = 1;
            while level.len() > 1 {
                let groups: Vec<&[ChildEntry]> = level.chunks(tree.internal_capacity).collect();
                let first = tree.allocate(groups.len())?;
                let mut next = Vec::with_capacity(groups.len());
                for (page, group) in (first..).zip(groups) {
                    let node = Node::Internal(InternalNode::new(height as u16, group.to_vec()));
                    next.push(tree.entry_for(page, &node)?);
                    tree.cache.put(page, node)?;
                }
                level = next;
                height += 1;
            }

            tree.root = level[0].child;
            tree.height = height;
            tree.record_count = records.len() as u64;
        }

        tree.persist()?;
        debug!(
            records = tree.record_count,
            height = tree.height,
            pages = tree.page_count(),
            "Bulk loaded tree"
        );
        Ok(tree)
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn store(&self) -> MutexGuard<'_, Box<dyn PageStore>> {
        self.store.lock().expect("lock poisoned")
    }

    fn allocate(&self, count: usize) -> Result<PageId, TreeError> {
        Ok(self.store().allocate_pages(count as u64)?)
    }

    fn entry_for(&self, page: PageId, node: &Node) -> Result<ChildEntry, TreeError> {
        let region = node.region().ok_or_else(|| corrupt(page, "empty node"))?;
        Ok(ChildEntry {
            region,
            child: page,
            count: node.count(),
        })
    }

    /// Check out a node, loading it from the store on a miss.
    pub fn node(&self, page: PageId) -> Result<NodeHandle<'_>, TreeError> {
        let writer = self.cache.writer();
        Ok(self.cache.get_or_load(&page, |id| writer.load(*id))?)
    }

    /// Root page, or 0 for an empty tree.
    #[must_use]
    pub const fn root(&self) -> PageId {
        self.root
    }

    /// Number of levels; 0 for an empty tree, 1 when the root is a leaf.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.record_count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    #[must_use]
    pub const fn payload_kind(&self) -> PayloadKind {
        self.payload_kind
    }

    /// Milliseconds since the epoch when the tree was bulk loaded.
    #[must_use]
    pub const fn built_at_ms(&self) -> u64 {
        self.built_at_ms
    }

    /// Modification counter; cursors opened at one generation are invalid
    /// at any other.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Pages in the backing store, including the superblock.
    #[must_use]
    pub fn page_count(&self) -> u64 {
        self.store().total_pages()
    }

    /// Nodes currently resident in the cache.
    #[must_use]
    pub fn cached_pages(&self) -> usize {
        self.cache.size()
    }

    /// Change the cache bound, evicting (and writing back) as needed.
    pub fn set_cache_capacity(&self, pages: usize) -> Result<usize, TreeError> {
        Ok(self.cache.set_capacity(pages)?)
    }

    /// Insert one record.
    ///
    /// Either the record ends up in the tree or the tree is left as it was.
    /// Write-back is suspended while the path is being updated; dirty pages
    /// that cannot be written back afterwards stay cached until `persist`.
    pub fn insert(&mut self, record: Record) -> Result<(), TreeError> {
        if record.payload.kind() != self.payload_kind {
            return Err(TreeError::PayloadMismatch {
                expected: self.payload_kind,
                actual: record.payload.kind(),
            });
        }

        let capacity = self.cache.capacity();
        self.cache.set_capacity(0)?;
        let placed = if self.root == 0 {
            self.plant(record)
        } else {
            self.insert_path(record)
        };
        if let Err(err) = self.cache.set_capacity(capacity) {
            warn!(error = %err, "Write-back after insert failed, keeping dirty pages cached");
        }

        if let Some(root) = placed? {
            self.root = root;
            self.height += 1;
            debug!(root, height = self.height, "Tree grew a level");
        }
        self.record_count += 1;
        self.generation += 1;
        Ok(())
    }

    /// Start an empty tree with a single leaf holding `record`.
    fn plant(&self, record: Record) -> Result<Option<PageId>, TreeError> {
        let page = self.allocate(1)?;
        self.cache.put(
            page,
            Node::Leaf(LeafNode::new(self.payload_kind, vec![record])),
        )?;
        Ok(Some(page))
    }

    /// Add `record` to the leaf whose box grows least, splitting overflowing
    /// nodes on the way back up. Returns the new root page if the root split.
    ///
    /// Every node on the path is checked out and every page a split needs
    /// is allocated before the first node is modified.
    #[allow(clippy::cast_possible_truncation)]
    fn insert_path(&self, record: Record) -> Result<Option<PageId>, TreeError> {
        let target = BoundingBox::from_point(record.location);

        let mut path: Vec<(PageId, NodeHandle<'_>, usize)> =
            Vec::with_capacity(self.height as usize);
        let mut page = self.root;
        let mut leaf = loop {
            let handle = self.node(page)?;
            let next = match &*handle {
                Node::Internal(node) => {
                    let i = node
                        .choose_child(&target)
                        .ok_or_else(|| corrupt(page, "empty internal node"))?;
                    Some((i, node.children[i].child))
                }
                Node::Leaf(_) => None,
            };
            match next {
                Some((i, child)) => {
                    path.push((page, handle, i));
                    page = child;
                }
                None => break handle,
            }
        };
        if path.len() + 1 != self.height as usize {
            return Err(corrupt(page, "leaf at the wrong depth"));
        }
        let Node::Leaf(node) = &mut *leaf else {
            return Err(corrupt(page, "expected a leaf"));
        };

        // One page per overflowing node, plus a new root when the overflow
        // reaches the top.
        let mut pages_needed = 0;
        let mut overflows = node.entries.len() >= self.leaf_capacity;
        for (_, handle, _) in path.iter().rev() {
            if !overflows {
                break;
            }
            pages_needed += 1;
            overflows = handle.len() >= self.internal_capacity;
        }
        if overflows {
            pages_needed += 2;
        }
        let mut fresh = if pages_needed == 0 {
            0..0
        } else {
            let first = self.allocate(pages_needed)?;
            first..first + pages_needed as u64
        };

        node.entries.push(record);
        let mut sibling = self.split_if_full(&mut leaf, self.leaf_capacity, &mut fresh)?;
        let mut child = self.entry_for(page, &leaf)?;
        drop(leaf);

        // Walk back up, refreshing the parent entry of every node touched.
        while let Some((parent_page, mut handle, pos)) = path.pop() {
            let Node::Internal(parent) = &mut *handle else {
                return Err(corrupt(parent_page, "expected an internal node"));
            };
            parent.children[pos] = child;
            if let Some(entry) = sibling.take() {
                parent.children.push(entry);
            }
            sibling = self.split_if_full(&mut handle, self.internal_capacity, &mut fresh)?;
            child = self.entry_for(parent_page, &handle)?;
        }

        let Some(entry) = sibling else {
            return Ok(None);
        };
        let root_page = fresh
            .next()
            .ok_or_else(|| corrupt(self.root, "no page reserved for the new root"))?;
        let root = Node::Internal(InternalNode::new(self.height as u16, vec![child, entry]));
        self.cache.put(root_page, root)?;
        Ok(Some(root_page))
    }

    /// Split `node` if it exceeds `capacity`, storing the new right sibling
    /// on the next reserved page and returning its parent entry.
    fn split_if_full(
        &self,
        node: &mut Node,
        capacity: usize,
        fresh: &mut Range<PageId>,
    ) -> Result<Option<ChildEntry>, TreeError> {
        if node.len() <= capacity {
            return Ok(None);
        }
        let page = fresh
            .next()
            .ok_or_else(|| corrupt(0, "no page reserved for a split"))?;
        let right = node.split();
        let entry = self.entry_for(page, &right)?;
        self.cache.put(page, right)?;
        Ok(Some(entry))
    }

    /// Number of records inside `region`.
    ///
    /// Subtrees whose box lies entirely inside `region` contribute their
    /// stored count without being visited.
    pub fn count_in_region(&self, region: &BoundingBox) -> Result<u64, TreeError> {
        if self.root == 0 {
            return Ok(0);
        }
        let mut total = 0;
        let mut pending = vec![self.root];
        while let Some(page) = pending.pop() {
            let handle = self.node(page)?;
            match &*handle {
                Node::Internal(node) => {
                    for entry in &node.children {
                        if region.contains(&entry.region) {
                            total += entry.count;
                        } else if region.intersects(&entry.region) {
                            pending.push(entry.child);
                        }
                    }
                }
                Node::Leaf(node) => {
                    total += node
                        .entries
                        .iter()
                        .filter(|r| region.contains_point(&r.location))
                        .count() as u64;
                }
            }
        }
        Ok(total)
    }

    /// Write every dirty node and the superblock, then sync the store.
    pub fn persist(&self) -> Result<(), TreeError> {
        let written = self.cache.write_back_all()?;
        let mut store = self.store();
        let sb: &mut Superblock = store.superblock_mut();
        sb.root_page = self.root;
        sb.height = self.height;
        sb.record_count = self.record_count;
        sb.built_at_ms = self.built_at_ms;
        store.write_superblock()?;
        store.sync()?;
        debug!(pages = written, records = self.record_count, "Persisted tree");
        Ok(())
    }
}
