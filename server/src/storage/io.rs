//! Page store abstraction.
//!
//! A `PageStore` is the durable side of the page cache: the cache loads
//! missing pages from it and writes evicted dirty pages back to it. The
//! file-backed implementation lives in `file.rs`; `MemoryStore` keeps pages
//! in memory and can inject write faults for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::storage::page::{Page, PageError, PageId};
use crate::storage::superblock::{Superblock, SuperblockError};

/// Errors that can occur during store operations.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error.
    Io(std::io::Error),
    /// Page out of bounds.
    PageOutOfBounds { page_id: PageId, total_pages: u64 },
    /// Superblock error.
    Superblock(SuperblockError),
    /// A page failed validation when decoded.
    Corruption { page_id: PageId, source: PageError },
    /// Injected fault for tests.
    InjectedFault(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => write!(
                f,
                "page {page_id} out of bounds (total pages: {total_pages})"
            ),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::Corruption { page_id, source } => {
                write!(f, "page {page_id} is corrupt: {source}")
            }
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Superblock(e) => Some(e),
            Self::Corruption { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SuperblockError> for StoreError {
    fn from(e: SuperblockError) -> Self {
        Self::Superblock(e)
    }
}

/// Abstraction over page-based durable storage.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_page` returns the last written content for a page
/// - `sync` makes all previous writes durable
/// - `allocate_pages` extends the storage capacity and keeps
///   `superblock().total_page_count` equal to `total_pages()`
pub trait PageStore: Send {
    /// Read a page. Page 0 is the superblock and is read with `superblock`.
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StoreError>;

    /// Write a page. The write may be buffered until `sync` is called.
    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StoreError>;

    /// Allocate new zeroed pages at the end of storage.
    ///
    /// Returns the page ID of the first allocated page.
    fn allocate_pages(&mut self, count: u64) -> Result<PageId, StoreError>;

    /// Get the total number of pages in storage.
    fn total_pages(&self) -> u64;

    /// Get a reference to the in-memory superblock.
    fn superblock(&self) -> &Superblock;

    /// Get a mutable reference to the in-memory superblock.
    fn superblock_mut(&mut self) -> &mut Superblock;

    /// Write the in-memory superblock to page 0.
    fn write_superblock(&mut self) -> Result<(), StoreError>;

    /// Sync all pending writes to durable storage.
    fn sync(&mut self) -> Result<(), StoreError>;
}

/// In-memory page store.
///
/// Writes can be made to fail on demand through the handle returned by
/// `fault_switch`, which lets tests exercise durability failures.
pub struct MemoryStore {
    pages: Vec<Page>,
    superblock: Superblock,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(superblock: Superblock) -> Self {
        let mut superblock = superblock;
        superblock.total_page_count = 1;
        Self {
            pages: vec![superblock.to_page()],
            superblock,
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A shared switch; while it is `true`, page writes fail.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn fault_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_writes)
    }

    fn check_bounds(&self, page_id: PageId) -> Result<usize, StoreError> {
        let total_pages = self.total_pages();
        if page_id >= total_pages {
            return Err(StoreError::PageOutOfBounds {
                page_id,
                total_pages,
            });
        }
        usize::try_from(page_id).map_err(|_| StoreError::PageOutOfBounds {
            page_id,
            total_pages,
        })
    }
}

impl PageStore for MemoryStore {
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StoreError> {
        let index = self.check_bounds(page_id)?;
        Ok(self.pages[index].clone())
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::InjectedFault(format!(
                "write of page {page_id} rejected"
            )));
        }
        let index = self.check_bounds(page_id)?;
        self.pages[index] = page.clone();
        Ok(())
    }

    fn allocate_pages(&mut self, count: u64) -> Result<PageId, StoreError> {
        let first = self.total_pages();
        for _ in 0..count {
            self.pages.push(Page::new());
        }
        self.superblock.total_page_count = self.total_pages();
        Ok(first)
    }

    fn total_pages(&self) -> u64 {
        self.pages.len() as u64
    }

    fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    fn superblock_mut(&mut self) -> &mut Superblock {
        &mut self.superblock
    }

    fn write_superblock(&mut self) -> Result<(), StoreError> {
        self.pages[0] = self.superblock.to_page();
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
