//! Error types for the allocator.

use thiserror::Error;

/// Errors returned by allocator operations.
///
/// Every operation that fails leaves the arena exactly as it found it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// No free page and no block pool with room for blocks of this size.
    #[error("no free space for a {block_size}-byte block")]
    OutOfSpace {
        /// Aligned block size that was requested.
        block_size: usize,
    },

    /// No run of contiguous free pages is long enough.
    #[error("not enough memory for a run of {pages} pages")]
    NotEnoughMemory {
        /// Number of pages that was requested.
        pages: usize,
    },

    /// The handle doesn't refer to a live allocation.
    #[error("invalid handle (page {page}, slot {slot}): {fault}")]
    InvalidHandle {
        page: usize,
        slot: u16,
        fault: HandleFault,
    },

    /// Backing storage for the arena could not be acquired.
    #[error("failed to acquire {size} bytes of backing storage")]
    ArenaInit {
        /// Number of bytes requested from the operating system.
        size: usize,
    },

    /// The arena configuration was rejected.
    #[error("invalid arena configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Why a handle was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleFault {
    #[error("page is outside the arena")]
    OutOfRange,
    #[error("page is free")]
    PageFree,
    #[error("slot was never issued by this block pool")]
    UnknownSlot,
    #[error("block was already freed")]
    DoubleFree,
    #[error("page belongs to a multi-page run, not a block pool")]
    WrongKind,
    #[error("page is not the head of its run")]
    NotRunHead,
    #[error("run pages disagree with the run head")]
    BrokenRun,
    #[error("page was released and handed out again since the handle was issued")]
    Stale,
}

/// Result type for allocator operations.
pub type Result<T> = std::result::Result<T, AllocError>;

impl AllocError {
    pub(crate) fn invalid_handle(page: usize, slot: u16, fault: HandleFault) -> Self {
        Self::InvalidHandle { page, slot, fault }
    }
}
