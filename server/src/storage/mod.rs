//! Paged storage for sampling structures.
//!
//! Each structure lives in its own file of 8KB pages:
//!
//! - Page 0: Superblock (tree shape, record count, payload kind)
//! - Pages 1-N: R-tree nodes, one node per page
//!
//! Node pages are reached through a `PageCache`, which loads them from a
//! `PageStore` on a miss and writes dirty pages back before evicting them.

mod cache;
mod file;
mod io;
mod page;
mod superblock;
mod time;

pub use cache::{CacheError, PageCache, PageHandle, WriteBack};
pub use file::StructureFile;
pub use io::{MemoryStore, PageStore, StoreError};
pub use page::{PAGE_SIZE, Page, PageError, PageHeader, PageId, PageType};
pub use superblock::{Superblock, SuperblockError};
pub use time::{SystemTimeSource, TimeSource};
