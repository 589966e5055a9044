//! Structure file I/O operations.
//!
//! This module handles reading and writing pages to a structure file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::storage::io::{PageStore, StoreError};
use crate::storage::page::{PAGE_SIZE_U64, Page, PageId};
use crate::storage::superblock::Superblock;

/// A structure file handle with low-level page I/O operations.
pub struct StructureFile {
    file: File,
    superblock: Superblock,
}

impl StructureFile {
    /// Create a new structure file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, superblock: Superblock) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let mut superblock = superblock;
        superblock.total_page_count = 1;
        file.write_all(superblock.to_page().as_bytes())?;
        file.sync_all()?;

        Ok(Self { file, superblock })
    }

    /// Open an existing structure file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        // Read and validate the superblock
        let mut page = Page::new();
        file.read_exact(page.as_bytes_mut())?;
        let superblock = Superblock::from_page(&page)?;

        let len = file.metadata()?.len();
        if len < superblock.total_page_count * PAGE_SIZE_U64 {
            return Err(StoreError::PageOutOfBounds {
                page_id: superblock.total_page_count - 1,
                total_pages: len / PAGE_SIZE_U64,
            });
        }

        Ok(Self { file, superblock })
    }

    fn check_bounds(&self, page_id: PageId) -> Result<(), StoreError> {
        if page_id >= self.superblock.total_page_count {
            return Err(StoreError::PageOutOfBounds {
                page_id,
                total_pages: self.superblock.total_page_count,
            });
        }
        Ok(())
    }
}

impl PageStore for StructureFile {
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StoreError> {
        self.check_bounds(page_id)?;

        let mut page = Page::new();
        self.file.seek(SeekFrom::Start(page_id * PAGE_SIZE_U64))?;
        self.file.read_exact(page.as_bytes_mut())?;

        Ok(page)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StoreError> {
        self.check_bounds(page_id)?;

        self.file.seek(SeekFrom::Start(page_id * PAGE_SIZE_U64))?;
        self.file.write_all(page.as_bytes())?;

        Ok(())
    }

    fn allocate_pages(&mut self, count: u64) -> Result<PageId, StoreError> {
        let first_new_page = self.superblock.total_page_count;

        // Extend the file
        let new_total = first_new_page + count;
        self.file.set_len(new_total * PAGE_SIZE_U64)?;

        self.superblock.total_page_count = new_total;

        Ok(first_new_page)
    }

    fn total_pages(&self) -> u64 {
        self.superblock.total_page_count
    }

    fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    fn superblock_mut(&mut self) -> &mut Superblock {
        &mut self.superblock
    }

    fn write_superblock(&mut self) -> Result<(), StoreError> {
        let page = self.superblock.to_page();

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(page.as_bytes())?;

        Ok(())
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.file.sync_all().map_err(StoreError::Io)
    }
}
