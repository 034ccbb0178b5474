use std::{fmt, ptr::NonNull};

use crate::config::PAGE_HEADER_SIZE;

/// Kind flag of an occupied page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Part of a run of whole pages.
    MultiPage = 0,
    /// Subdivided into equal-size blocks.
    BlockPool = 1,
}

/// Decoded view of a page header. A page is always in exactly one of these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Free,
    BlockPool {
        /// Size of every block in the page.
        block_size: u16,
        /// Blocks currently allocated.
        live: u16,
        /// Slots handed out since the page became a pool.
        issued: u16,
    },
    RunHead {
        pages: u16,
    },
    RunContinuation {
        /// 1-based position of this page after the run head.
        index: u16,
        pages: u16,
    },
}

const NUM_SHIFT: u32 = 0;
const MARK_SHIFT: u32 = 16;
const FREE_SHIFT: u32 = 32;
const KIND_SHIFT: u32 = 40;
const SIZE_SHIFT: u32 = 48;

const BYTE_MASK: u64 = 0xFF;
const HALF_MASK: u64 = 0xFFFF;

const STAT_FREE: u64 = 1;
const STAT_OCCUPIED: u64 = 0;

/// Metadata stored in the first [`PAGE_HEADER_SIZE`] bytes of every page.
///
/// The header is a single little-endian `u64` split into five fields:
///
/// ```text
///  63        48 47    40 39    32 31        16 15         0
/// +------------+--------+--------+------------+------------+
/// |    size    |  kind  |  free  |    mark    |    num     |
/// +------------+--------+--------+------------+------------+
///
///   free: 1 = free, 0 = occupied
///   kind: 1 = block pool, 0 = multi-page run
///   size: block size (pool)  | total pages of the run (run)
///   num:  live blocks (pool) | index of this page in the run (run)
///   mark: slots issued since the page became a pool
/// ```
///
/// Each setter clears its own bit range and ORs the new value in, so setting one field
/// never disturbs the others. The 16-bit fields take `u16`, which makes a value wider than
/// its field impossible to store.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageHeader(u64);

const _: () = assert!(std::mem::size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    /// Header of a page that is not assigned to anything.
    pub const FREE: Self = Self(STAT_FREE << FREE_SHIFT);

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Header of a page that just became a pool of `block_size` blocks, none allocated yet.
    pub fn block_pool(block_size: u16) -> Self {
        let mut header = Self::FREE;
        header.set_free(false);
        header.set_kind(PageKind::BlockPool);
        header.set_size(block_size);
        header
    }

    /// Header of page `index` of a run of `pages` pages. The head has index 0.
    pub fn run_page(index: u16, pages: u16) -> Self {
        let mut header = Self::FREE;
        header.set_free(false);
        header.set_kind(PageKind::MultiPage);
        header.set_size(pages);
        header.set_num(index);
        header
    }

    #[inline]
    fn field(self, shift: u32, mask: u64) -> u64 {
        (self.0 >> shift) & mask
    }

    #[inline]
    fn set_field(&mut self, shift: u32, mask: u64, value: u64) {
        self.0 = (self.0 & !(mask << shift)) | ((value & mask) << shift);
    }

    #[inline]
    pub fn is_free(self) -> bool {
        self.field(FREE_SHIFT, BYTE_MASK) == STAT_FREE
    }

    #[inline]
    pub fn set_free(&mut self, free: bool) {
        let stat = if free { STAT_FREE } else { STAT_OCCUPIED };
        self.set_field(FREE_SHIFT, BYTE_MASK, stat);
    }

    #[inline]
    pub fn kind(self) -> PageKind {
        match self.field(KIND_SHIFT, BYTE_MASK) {
            0 => PageKind::MultiPage,
            _ => PageKind::BlockPool,
        }
    }

    #[inline]
    pub fn set_kind(&mut self, kind: PageKind) {
        self.set_field(KIND_SHIFT, BYTE_MASK, kind as u64);
    }

    /// Block size of a pool, or the total page count of a run.
    #[inline]
    pub fn size(self) -> u16 {
        self.field(SIZE_SHIFT, HALF_MASK) as u16
    }

    #[inline]
    pub fn set_size(&mut self, size: u16) {
        self.set_field(SIZE_SHIFT, HALF_MASK, size as u64);
    }

    /// Live block count of a pool, or this page's index within its run.
    #[inline]
    pub fn num(self) -> u16 {
        self.field(NUM_SHIFT, HALF_MASK) as u16
    }

    #[inline]
    pub fn set_num(&mut self, num: u16) {
        self.set_field(NUM_SHIFT, HALF_MASK, num as u64);
    }

    /// Slots a pool has issued during its current lifetime.
    #[inline]
    pub fn mark(self) -> u16 {
        self.field(MARK_SHIFT, HALF_MASK) as u16
    }

    #[inline]
    pub fn set_mark(&mut self, mark: u16) {
        self.set_field(MARK_SHIFT, HALF_MASK, mark as u64);
    }

    pub fn state(self) -> PageState {
        if self.is_free() {
            return PageState::Free;
        }

        match (self.kind(), self.num()) {
            (PageKind::BlockPool, live) => PageState::BlockPool {
                block_size: self.size(),
                live,
                issued: self.mark(),
            },
            (PageKind::MultiPage, 0) => PageState::RunHead { pages: self.size() },
            (PageKind::MultiPage, index) => PageState::RunContinuation {
                index,
                pages: self.size(),
            },
        }
    }

    /// Reads the header stored at the start of `page`.
    ///
    /// **SAFETY**: `page` must point to at least [`PAGE_HEADER_SIZE`] readable bytes.
    #[inline]
    pub unsafe fn read(page: NonNull<u8>) -> Self {
        let bytes = unsafe { page.cast::<[u8; PAGE_HEADER_SIZE]>().as_ptr().read() };
        Self(u64::from_le_bytes(bytes))
    }

    /// Stores this header at the start of `page`.
    ///
    /// **SAFETY**: `page` must point to at least [`PAGE_HEADER_SIZE`] writable bytes.
    #[inline]
    pub unsafe fn write(self, page: NonNull<u8>) {
        unsafe {
            page.cast::<[u8; PAGE_HEADER_SIZE]>()
                .as_ptr()
                .write(self.0.to_le_bytes());
        }
    }
}

impl fmt::Debug for PageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageHeader")
            .field("free", &self.is_free())
            .field("kind", &self.kind())
            .field("size", &self.size())
            .field("num", &self.num())
            .field("mark", &self.mark())
            .finish()
    }
}
