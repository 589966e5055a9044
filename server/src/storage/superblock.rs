//! Superblock structure and serialization.
//!
//! The superblock occupies page 0 and describes the R-tree stored in the
//! rest of the file.

// PAGE_SIZE is a compile-time constant that fits in u32.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{PAGE_SIZE, Page, PageId};
use crate::types::PayloadKind;

/// Magic number identifying a structure file: "SMPLTREE"
pub const MAGIC: [u8; 8] = *b"SMPLTREE";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Page size as u32 for storage in superblock.
const PAGE_SIZE_U32: u32 = PAGE_SIZE as u32;

/// Superblock field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const PAGE_SIZE: usize = 12;
    pub const TOTAL_PAGE_COUNT: usize = 16;
    pub const ROOT_PAGE: usize = 24;
    pub const RECORD_COUNT: usize = 32;
    pub const BUILT_AT_MS: usize = 40;
    pub const HEIGHT: usize = 48;
    pub const LEAF_CAPACITY: usize = 52;
    pub const INTERNAL_CAPACITY: usize = 54;
    pub const PAYLOAD_KIND: usize = 56;
    pub const CHECKSUM: usize = 60;
    // 64-8191: reserved
}

/// The superblock contains all metadata about a structure file.
///
/// # Invariants
///
/// - `root_page == 0` if and only if the tree is empty (`height == 0`).
/// - `leaf_capacity` and `internal_capacity` never exceed what fits in one
///   page and are at least 2.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Format version number.
    pub format_version: u32,
    /// Page size in bytes (should always be `PAGE_SIZE`).
    pub page_size: u32,
    /// Total number of pages in the file, superblock included.
    pub total_page_count: u64,
    /// Root page of the R-tree, 0 when empty.
    pub root_page: PageId,
    /// Number of records in the tree.
    pub record_count: u64,
    /// Wall-clock time the structure was built, in ms since the epoch.
    pub built_at_ms: u64,
    /// Number of levels; leaves are level 0, so a single-leaf tree has height 1.
    pub height: u32,
    /// Maximum entries per leaf page.
    pub leaf_capacity: u16,
    /// Maximum entries per internal page.
    pub internal_capacity: u16,
    /// Kind of payload stored in every leaf entry.
    pub payload_kind: PayloadKind,
}

impl Superblock {
    /// Create a superblock for a fresh, empty structure.
    #[must_use]
    pub const fn new(payload_kind: PayloadKind, leaf_capacity: u16, internal_capacity: u16) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size: PAGE_SIZE_U32,
            total_page_count: 1,
            root_page: 0,
            record_count: 0,
            built_at_ms: 0,
            height: 0,
            leaf_capacity,
            internal_capacity,
            payload_kind,
        }
    }

    /// Serialize the superblock to a page.
    #[must_use]
    pub fn to_page(&self) -> Page {
        let mut page = Page::new();

        page.write_bytes(offsets::MAGIC, &MAGIC);
        page.write_u32(offsets::FORMAT_VERSION, self.format_version);
        page.write_u32(offsets::PAGE_SIZE, self.page_size);
        page.write_u64(offsets::TOTAL_PAGE_COUNT, self.total_page_count);
        page.write_u64(offsets::ROOT_PAGE, self.root_page);
        page.write_u64(offsets::RECORD_COUNT, self.record_count);
        page.write_u64(offsets::BUILT_AT_MS, self.built_at_ms);
        page.write_u32(offsets::HEIGHT, self.height);
        page.write_u16(offsets::LEAF_CAPACITY, self.leaf_capacity);
        page.write_u16(offsets::INTERNAL_CAPACITY, self.internal_capacity);
        page.write_u8(offsets::PAYLOAD_KIND, self.payload_kind as u8);

        let checksum = crc32fast::hash(page.read_bytes(0, offsets::CHECKSUM));
        page.write_u32(offsets::CHECKSUM, checksum);

        page
    }

    /// Deserialize a superblock from a page.
    pub fn from_page(page: &Page) -> Result<Self, SuperblockError> {
        // Validate magic number
        let magic_slice = page.read_bytes(offsets::MAGIC, 8);
        let mut magic = [0u8; 8];
        magic.copy_from_slice(magic_slice);
        if magic != MAGIC {
            return Err(SuperblockError::InvalidMagic(magic));
        }

        let expected = page.read_u32(offsets::CHECKSUM);
        let actual = crc32fast::hash(page.read_bytes(0, offsets::CHECKSUM));
        if expected != actual {
            return Err(SuperblockError::ChecksumMismatch { expected, actual });
        }

        let format_version = page.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        let page_size = page.read_u32(offsets::PAGE_SIZE);
        if page_size != PAGE_SIZE_U32 {
            return Err(SuperblockError::InvalidPageSize(page_size));
        }

        let payload_kind = PayloadKind::try_from(page.read_u8(offsets::PAYLOAD_KIND))
            .map_err(SuperblockError::InvalidPayloadKind)?;

        Ok(Self {
            format_version,
            page_size,
            total_page_count: page.read_u64(offsets::TOTAL_PAGE_COUNT),
            root_page: page.read_u64(offsets::ROOT_PAGE),
            record_count: page.read_u64(offsets::RECORD_COUNT),
            built_at_ms: page.read_u64(offsets::BUILT_AT_MS),
            height: page.read_u32(offsets::HEIGHT),
            leaf_capacity: page.read_u16(offsets::LEAF_CAPACITY),
            internal_capacity: page.read_u16(offsets::INTERNAL_CAPACITY),
            payload_kind,
        })
    }
}

/// Errors that can occur when reading a superblock.
#[derive(Debug)]
pub enum SuperblockError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Stored checksum does not match the contents.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Invalid page size.
    InvalidPageSize(u32),
    /// Unknown payload kind byte.
    InvalidPayloadKind(u8),
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "superblock checksum mismatch: expected {expected}, got {actual}")
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidPageSize(s) => write!(f, "invalid page size: {s}"),
            Self::InvalidPayloadKind(k) => write!(f, "invalid payload kind: {k}"),
        }
    }
}

impl std::error::Error for SuperblockError {}
