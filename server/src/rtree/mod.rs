//! Disk-resident R-tree over records in (latitude, longitude, time).
//!
//! - `node`: the Internal/Leaf node sum type and its page encoding
//! - `tree`: insertion, bulk loading, and region counts over cached pages
//! - `cursor`: resumable randomized traversal of a query region
//! - `hilbert`: sort keys for bulk loading

mod cursor;
mod hilbert;
mod node;
mod tree;

pub use cursor::Cursor;
pub use node::{
    ChildEntry, InternalNode, LeafNode, MAX_INTERNAL_ENTRIES, MAX_LEAF_ENTRIES, Node, NodeError,
    NodeKind,
};
pub use tree::{NodeHandle, NodeWriter, PageIoError, RTree, TreeError};
