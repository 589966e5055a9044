//! Page types and constants for structure files.
//!
//! Every structure file is a sequence of 8KB pages. Page 0 holds the
//! superblock; every other page holds exactly one R-tree node.

/// Page size in bytes (8KB).
pub const PAGE_SIZE: usize = 8192;

/// `PAGE_SIZE` for file offset arithmetic.
pub const PAGE_SIZE_U64: u64 = PAGE_SIZE as u64;

/// Header byte where a node page's CRC32 starts.
const CHECKSUM_OFFSET: usize = 2;

/// Generates little-endian `read_*`/`write_*` pairs on `Page`.
macro_rules! le_accessors {
    ($($read:ident, $write:ident: $ty:ty;)*) => {
        $(
            #[must_use]
            pub fn $read(&self, offset: usize) -> $ty {
                let mut bytes = [0u8; size_of::<$ty>()];
                bytes.copy_from_slice(&self.data[offset..offset + size_of::<$ty>()]);
                <$ty>::from_le_bytes(bytes)
            }

            pub fn $write(&mut self, offset: usize, value: $ty) {
                self.data[offset..offset + size_of::<$ty>()].copy_from_slice(&value.to_le_bytes());
            }
        )*
    };
}

/// A page identifier (0-indexed page number).
///
/// Page 0 is always the superblock, so 0 never names a tree node.
pub type PageId = u64;

/// Page type identifiers stored in page headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Superblock (page 0 only)
    Superblock = 0x01,
    /// R-tree internal node
    RTreeInternal = 0x03,
    /// R-tree leaf node
    RTreeLeaf = 0x04,
}

impl TryFrom<u8> for PageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Superblock),
            0x03 => Ok(Self::RTreeInternal),
            0x04 => Ok(Self::RTreeLeaf),
            _ => Err(value),
        }
    }
}

/// Common page header present at the start of every node page.
///
/// Layout:
/// - `page_type`: 1 byte
/// - `flags`: 1 byte
/// - `checksum`: 4 bytes (CRC32)
/// - `reserved`: 2 bytes
///
/// Total: 8 bytes
#[derive(Debug, Copy, Clone)]
pub struct PageHeader {
    pub page_type: PageType,
    pub flags: u8,
    pub checksum: u32,
}

impl PageHeader {
    pub const SIZE: usize = 8;

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.page_type as u8;
        buf[1] = self.flags;
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Result<Self, PageError> {
        let page_type = PageType::try_from(bytes[0]).map_err(PageError::InvalidPageType)?;
        let flags = bytes[1];
        let checksum = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);

        Ok(Self {
            page_type,
            flags,
            checksum,
        })
    }
}

/// One page-sized, heap-allocated buffer.
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    /// Read the page header.
    pub fn header(&self) -> Result<PageHeader, PageError> {
        let mut bytes = [0u8; PageHeader::SIZE];
        bytes.copy_from_slice(&self.data[..PageHeader::SIZE]);
        PageHeader::from_bytes(bytes)
    }

    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    le_accessors! {
        read_u16, write_u16: u16;
        read_u32, write_u32: u32;
        read_u64, write_u64: u64;
        read_i64, write_i64: i64;
    }

    /// Coordinates are stored as raw IEEE-754 bits.
    #[must_use]
    pub fn read_f32(&self, offset: usize) -> f32 {
        f32::from_bits(self.read_u32(offset))
    }

    pub fn write_f32(&mut self, offset: usize, value: f32) {
        self.write_u32(offset, value.to_bits());
    }

    /// CRC32 over the whole page with the checksum field read as zero.
    fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[..CHECKSUM_OFFSET]);
        hasher.update(&[0u8; 4]);
        hasher.update(&self.data[CHECKSUM_OFFSET + 4..]);
        hasher.finalize()
    }

    /// Stamp the checksum of the current contents into the header.
    pub fn seal(&mut self) {
        let checksum = self.checksum();
        self.write_u32(CHECKSUM_OFFSET, checksum);
    }

    /// Check the stored checksum against the page contents.
    pub fn verify(&self) -> Result<(), PageError> {
        let expected = self.read_u32(CHECKSUM_OFFSET);
        let actual = self.checksum();
        if expected == actual {
            Ok(())
        } else {
            Err(PageError::ChecksumMismatch { expected, actual })
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Page {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("first_16_bytes", &&self.data[..16])
            .finish_non_exhaustive()
    }
}

/// Errors related to page operations.
#[derive(Debug)]
pub enum PageError {
    /// Invalid page type byte.
    InvalidPageType(u8),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageType(v) => write!(f, "invalid page type: 0x{v:02x}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for PageError {}
