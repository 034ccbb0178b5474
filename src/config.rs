//! Arena sizing and the constants shared by every part of the allocator.

use crate::error::{AllocError, Result};

/// Bytes at the start of every page reserved for its [`crate::header::PageHeader`].
pub const PAGE_HEADER_SIZE: usize = 8;

/// Every request is rounded up to a multiple of this many bytes.
pub const ALIGNMENT: usize = 4;

/// Page size of the reference sizing.
pub const DEFAULT_PAGE_SIZE: usize = 4000;

/// Arena size of the reference sizing (1000 pages).
pub const DEFAULT_ARENA_SIZE: usize = 4_000_000;

/// Sizing of the arena the allocator manages.
///
/// The page size here is the allocator's own bookkeeping unit, it has nothing to do with
/// the virtual memory page size of the computer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Total bytes of backing storage. Trailing bytes that don't form a whole page are unused.
    pub total_size: usize,
    /// Bytes per page, header included.
    pub page_size: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ARENA_SIZE)
    }
}

impl ArenaConfig {
    /// Arena of `total_size` bytes using the default page size.
    pub const fn new(total_size: usize) -> Self {
        Self {
            total_size,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[inline]
    pub const fn page_count(&self) -> usize {
        self.total_size / self.page_size
    }

    /// Bytes of a page left after its header.
    #[inline]
    pub const fn usable_size(&self) -> usize {
        self.page_size - PAGE_HEADER_SIZE
    }

    /// Largest aligned request served from a block pool. Anything bigger takes whole pages.
    #[inline]
    pub const fn small_limit(&self) -> usize {
        self.usable_size() / 2
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.page_size <= PAGE_HEADER_SIZE {
            return Err(AllocError::InvalidConfig("page size must exceed the page header"));
        }
        if self.page_size % ALIGNMENT != 0 {
            return Err(AllocError::InvalidConfig("page size must be a multiple of the alignment"));
        }

        // Run lengths and run indices are stored in 16-bit header fields.
        match self.page_count() {
            0 => return Err(AllocError::InvalidConfig("arena must hold at least one page")),
            n if n > u16::MAX as usize => {
                return Err(AllocError::InvalidConfig("arena holds more pages than a header can count"));
            }
            _ => {}
        }

        if self.small_limit() > u16::MAX as usize {
            return Err(AllocError::InvalidConfig("block sizes would overflow the header size field"));
        }

        Ok(())
    }
}
