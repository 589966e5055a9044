//! R-tree node types and serialization.
//!
//! Every tree page holds exactly one node, either:
//! - Internal: (bounding box, child page, subtree record count) entries
//! - Leaf: records, each a point in space and time with an object id and an
//!   optional payload (a record's bounding box is the point itself)
//!
//! A node's kind is fixed by its page type and never changes.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::{PAGE_SIZE, Page, PageError, PageHeader, PageId, PageType};
use crate::types::{BoundingBox, ObjectId, Payload, PayloadKind, Point3, Record};

/// Node header layout (after page header):
/// - `level`: 2 bytes (0 for leaves)
/// - `entry_count`: 2 bytes
/// - `reserved`: 4 bytes
///
/// Total: 8 bytes
const NODE_HEADER_SIZE: usize = 8;

/// Offset where node data starts (after page header + node header).
const DATA_OFFSET: usize = PageHeader::SIZE + NODE_HEADER_SIZE;

/// Available space for node data.
const DATA_SPACE: usize = PAGE_SIZE - DATA_OFFSET;

/// Serialized bounding box: two (f32, f32, i64) corners.
const BOX_SIZE: usize = 32;

/// Internal entry: bounding box + child page + subtree count.
const INTERNAL_ENTRY_SIZE: usize = BOX_SIZE + 8 + 8;

/// Leaf entry: oid (12) + x (4) + y (4) + time (8) + payload (8).
const LEAF_ENTRY_SIZE: usize = ObjectId::LEN + 4 + 4 + 8 + 8;

/// Maximum number of entries in an internal node.
pub const MAX_INTERNAL_ENTRIES: usize = DATA_SPACE / INTERNAL_ENTRY_SIZE;

/// Maximum number of entries in a leaf node.
pub const MAX_LEAF_ENTRIES: usize = DATA_SPACE / LEAF_ENTRY_SIZE;

/// Node kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Internal,
    Leaf,
}

/// One child of an internal node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChildEntry {
    /// Minimal box covering everything in the child's subtree.
    pub region: BoundingBox,
    pub child: PageId,
    /// Number of records in the child's subtree.
    pub count: u64,
}

/// An internal R-tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalNode {
    /// Height above the leaves; children are at `level - 1`.
    pub level: u16,
    pub children: Vec<ChildEntry>,
}

/// A leaf R-tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode {
    pub payload_kind: PayloadKind,
    pub entries: Vec<Record>,
}

/// A tree node of either kind.
///
/// Algorithms that behave differently per kind match on this enum; the
/// match is exhaustive so a new kind cannot be silently ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl InternalNode {
    #[must_use]
    pub const fn new(level: u16, children: Vec<ChildEntry>) -> Self {
        Self { level, children }
    }

    /// Records in this subtree.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.children.iter().map(|c| c.count).sum()
    }

    #[must_use]
    pub fn region(&self) -> Option<BoundingBox> {
        cover(self.children.iter().map(|c| c.region))
    }

    /// Index of the child whose box grows least to cover `region`, ties
    /// broken by the smaller box.
    #[must_use]
    pub fn choose_child(&self, region: &BoundingBox) -> Option<usize> {
        self.children
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.region
                    .enlargement(region)
                    .total_cmp(&b.region.enlargement(region))
                    .then_with(|| a.region.margin().total_cmp(&b.region.margin()))
            })
            .map(|(i, _)| i)
    }

    /// Position of the entry pointing at `child`.
    #[must_use]
    pub fn position_of(&self, child: PageId) -> Option<usize> {
        self.children.iter().position(|c| c.child == child)
    }

    /// Split in half along the axis that gives the tightest halves.
    ///
    /// Returns the entries moved out, which form the new right sibling.
    #[must_use]
    pub fn split(&mut self) -> Self {
        let right = split_entries(&mut self.children, |c| c.region);
        Self {
            level: self.level,
            children: right,
        }
    }
}

impl LeafNode {
    #[must_use]
    pub const fn new(payload_kind: PayloadKind, entries: Vec<Record>) -> Self {
        Self {
            payload_kind,
            entries,
        }
    }

    #[must_use]
    pub fn region(&self) -> Option<BoundingBox> {
        cover(
            self.entries
                .iter()
                .map(|r| BoundingBox::from_point(r.location)),
        )
    }

    /// Split in half along the axis that gives the tightest halves.
    ///
    /// Returns the entries moved out, which form the new right sibling.
    #[must_use]
    pub fn split(&mut self) -> Self {
        let right = split_entries(&mut self.entries, |r| BoundingBox::from_point(r.location));
        Self {
            payload_kind: self.payload_kind,
            entries: right,
        }
    }
}

impl Node {
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::Internal(_) => NodeKind::Internal,
            Self::Leaf(_) => NodeKind::Leaf,
        }
    }

    /// Height above the leaves.
    #[must_use]
    pub const fn level(&self) -> u16 {
        match self {
            Self::Internal(node) => node.level,
            Self::Leaf(_) => 0,
        }
    }

    /// Number of entries stored directly in this node.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn len(&self) -> usize {
        match self {
            Self::Internal(node) => node.children.len(),
            Self::Leaf(node) => node.entries.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records in the subtree rooted here.
    #[must_use]
    pub fn count(&self) -> u64 {
        match self {
            Self::Internal(node) => node.count(),
            Self::Leaf(node) => node.entries.len() as u64,
        }
    }

    /// Minimal box covering the subtree, `None` for an empty node.
    #[must_use]
    pub fn region(&self) -> Option<BoundingBox> {
        match self {
            Self::Internal(node) => node.region(),
            Self::Leaf(node) => node.region(),
        }
    }

    /// Split into two nodes of the same kind and level.
    #[must_use]
    pub fn split(&mut self) -> Self {
        match self {
            Self::Internal(node) => Self::Internal(node.split()),
            Self::Leaf(node) => Self::Leaf(node.split()),
        }
    }

    /// Read a node from a page, verifying its checksum.
    pub fn from_page(page: &Page) -> Result<Self, NodeError> {
        page.verify()?;
        let header = page.header()?;
        let level = page.read_u16(PageHeader::SIZE);
        let count = page.read_u16(PageHeader::SIZE + 2) as usize;

        match header.page_type {
            PageType::RTreeInternal => {
                if count > MAX_INTERNAL_ENTRIES {
                    return Err(NodeError::TooManyEntries {
                        count,
                        max: MAX_INTERNAL_ENTRIES,
                    });
                }
                let mut children = Vec::with_capacity(count);
                let mut offset = DATA_OFFSET;
                for _ in 0..count {
                    let region = read_box(page, offset);
                    children.push(ChildEntry {
                        region,
                        child: page.read_u64(offset + BOX_SIZE),
                        count: page.read_u64(offset + BOX_SIZE + 8),
                    });
                    offset += INTERNAL_ENTRY_SIZE;
                }
                Ok(Self::Internal(InternalNode { level, children }))
            }
            PageType::RTreeLeaf => {
                if count > MAX_LEAF_ENTRIES {
                    return Err(NodeError::TooManyEntries {
                        count,
                        max: MAX_LEAF_ENTRIES,
                    });
                }
                let payload_kind = PayloadKind::try_from(header.flags)
                    .map_err(NodeError::InvalidPayloadKind)?;
                let mut entries = Vec::with_capacity(count);
                let mut offset = DATA_OFFSET;
                for _ in 0..count {
                    let mut oid = [0u8; ObjectId::LEN];
                    oid.copy_from_slice(page.read_bytes(offset, ObjectId::LEN));
                    let at = offset + ObjectId::LEN;
                    entries.push(Record {
                        oid: ObjectId(oid),
                        location: Point3::new(
                            page.read_f32(at),
                            page.read_f32(at + 4),
                            page.read_i64(at + 8),
                        ),
                        payload: Payload::from_bits(payload_kind, page.read_u64(at + 16)),
                    });
                    offset += LEAF_ENTRY_SIZE;
                }
                Ok(Self::Leaf(LeafNode {
                    payload_kind,
                    entries,
                }))
            }
            other @ PageType::Superblock => Err(NodeError::NotANode(other)),
        }
    }

    /// Serialize the node into a fresh, checksummed page.
    pub fn to_page(&self) -> Result<Page, NodeError> {
        let mut page = Page::new();
        let (page_type, flags, max) = match self {
            Self::Internal(_) => (PageType::RTreeInternal, 0, MAX_INTERNAL_ENTRIES),
            Self::Leaf(node) => (PageType::RTreeLeaf, node.payload_kind as u8, MAX_LEAF_ENTRIES),
        };
        if self.len() > max {
            return Err(NodeError::TooManyEntries {
                count: self.len(),
                max,
            });
        }

        let page_header = PageHeader {
            page_type,
            flags,
            checksum: 0,
        };
        page.write_bytes(0, &page_header.to_bytes());
        page.write_u16(PageHeader::SIZE, self.level());
        page.write_u16(PageHeader::SIZE + 2, self.len() as u16);

        let mut offset = DATA_OFFSET;
        match self {
            Self::Internal(node) => {
                for entry in &node.children {
                    write_box(&mut page, offset, &entry.region);
                    page.write_u64(offset + BOX_SIZE, entry.child);
                    page.write_u64(offset + BOX_SIZE + 8, entry.count);
                    offset += INTERNAL_ENTRY_SIZE;
                }
            }
            Self::Leaf(node) => {
                for record in &node.entries {
                    page.write_bytes(offset, &record.oid.0);
                    let at = offset + ObjectId::LEN;
                    page.write_f32(at, record.location.x);
                    page.write_f32(at + 4, record.location.y);
                    page.write_i64(at + 8, record.location.time);
                    page.write_u64(at + 16, record.payload.to_bits());
                    offset += LEAF_ENTRY_SIZE;
                }
            }
        }

        page.seal();
        Ok(page)
    }
}

fn read_box(page: &Page, offset: usize) -> BoundingBox {
    BoundingBox {
        min: Point3::new(
            page.read_f32(offset),
            page.read_f32(offset + 4),
            page.read_i64(offset + 8),
        ),
        max: Point3::new(
            page.read_f32(offset + 16),
            page.read_f32(offset + 20),
            page.read_i64(offset + 24),
        ),
    }
}

fn write_box(page: &mut Page, offset: usize, region: &BoundingBox) {
    page.write_f32(offset, region.min.x);
    page.write_f32(offset + 4, region.min.y);
    page.write_i64(offset + 8, region.min.time);
    page.write_f32(offset + 16, region.max.x);
    page.write_f32(offset + 20, region.max.y);
    page.write_i64(offset + 24, region.max.time);
}

/// Smallest box covering every box in `regions`.
pub fn cover(regions: impl IntoIterator<Item = BoundingBox>) -> Option<BoundingBox> {
    regions.into_iter().reduce(|acc, r| acc.union(&r))
}

#[allow(clippy::cast_precision_loss)]
fn center(region: &BoundingBox, axis: usize) -> f64 {
    match axis {
        0 => (f64::from(region.min.x) + f64::from(region.max.x)) / 2.0,
        1 => (f64::from(region.min.y) + f64::from(region.max.y)) / 2.0,
        _ => (region.min.time as f64 + region.max.time as f64) / 2.0,
    }
}

/// Sort `entries` along each axis in turn and keep the axis whose two halves
/// have the smallest total margin; the upper half is split off and returned.
fn split_entries<T>(entries: &mut Vec<T>, region_of: impl Fn(&T) -> BoundingBox) -> Vec<T> {
    let mid = entries.len() / 2;
    let halves_margin = |entries: &[T]| {
        let left = cover(entries[..mid].iter().map(&region_of));
        let right = cover(entries[mid..].iter().map(&region_of));
        left.map_or(0.0, |b| b.margin()) + right.map_or(0.0, |b| b.margin())
    };

    let mut best_axis = 0;
    let mut best_margin = f64::INFINITY;
    for axis in 0..3 {
        entries.sort_by(|a, b| center(&region_of(a), axis).total_cmp(&center(&region_of(b), axis)));
        let margin = halves_margin(entries.as_slice());
        if margin < best_margin {
            best_margin = margin;
            best_axis = axis;
        }
    }

    entries.sort_by(|a, b| {
        center(&region_of(a), best_axis).total_cmp(&center(&region_of(b), best_axis))
    });
    entries.split_off(mid)
}

/// Errors that can occur when working with R-tree nodes.
#[derive(Debug)]
pub enum NodeError {
    /// The page header or checksum is invalid.
    Page(PageError),
    /// The page does not hold a tree node.
    NotANode(PageType),
    /// Unknown payload kind in a leaf header.
    InvalidPayloadKind(u8),
    /// More entries than fit in one page.
    TooManyEntries { count: usize, max: usize },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page(e) => write!(f, "invalid node page: {e}"),
            Self::NotANode(t) => write!(f, "page of type {t:?} is not a tree node"),
            Self::InvalidPayloadKind(k) => write!(f, "invalid payload kind: {k}"),
            Self::TooManyEntries { count, max } => {
                write!(f, "node has {count} entries (max {max})")
            }
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Page(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PageError> for NodeError {
    fn from(e: PageError) -> Self {
        Self::Page(e)
    }
}
