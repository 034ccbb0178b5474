use std::ptr::NonNull;

use crate::{
    config::{ArenaConfig, PAGE_HEADER_SIZE},
    error::{AllocError, Result},
    header::PageHeader,
    kernel,
    utils::align,
};

/// The single region of memory the allocator manages.
///
/// The arena asks the kernel for one mapping when it is created and never grows. That
/// mapping is sliced into pages of [`ArenaConfig::page_size`] bytes, each one starting with
/// its [`PageHeader`]:
///
/// ```text
///  page 0                       page 1                       page N - 1
/// +--------+-----------------+ +--------+-----------------+     +--------+-----------------+
/// | header |   usable area   | | header |   usable area   | ... | header |   usable area   |
/// +--------+-----------------+ +--------+-----------------+     +--------+-----------------+
/// ^                            ^
/// base                         base + page_size
/// ```
///
/// Pages are always visited in address order, which is what gives the allocator its
/// first-fit behaviour.
///
/// Next to the mapping the arena counts, per page, how many times the page was handed out.
/// Handles remember that generation and are refused once the page has moved on.
pub struct Arena {
    /// Start of the mapping returned by the kernel.
    base: NonNull<u8>,
    /// Length of the mapping, aligned to the OS page size.
    mapped: usize,
    page_size: usize,
    page_count: usize,
    generations: Vec<u32>,
}

impl Arena {
    /// Maps the backing storage and marks every page as free.
    pub fn new(config: &ArenaConfig) -> Result<Self> {
        config.validate()?;

        let mapped = align(config.total_size, kernel::page_size());

        let Some(base) = (unsafe { kernel::request_memory(mapped) }) else {
            log::warn!("arena: could not map {mapped} bytes");
            return Err(AllocError::ArenaInit { size: mapped });
        };

        let mut arena = Self {
            base,
            mapped,
            page_size: config.page_size,
            page_count: config.page_count(),
            generations: vec![0; config.page_count()],
        };

        for index in 0..arena.page_count {
            arena.set_header(index, PageHeader::FREE);
        }

        log::debug!(
            "arena: mapped {} bytes at {:p}, {} pages of {} bytes",
            mapped,
            base,
            arena.page_count,
            arena.page_size
        );

        Ok(arena)
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Bytes of a page left after its header.
    #[inline]
    pub fn usable_size(&self) -> usize {
        self.page_size - PAGE_HEADER_SIZE
    }

    #[inline]
    pub fn contains_page(&self, index: usize) -> bool {
        index < self.page_count
    }

    /// Address of the first byte of page `index`, where its header lives.
    #[inline]
    pub fn page_addr(&self, index: usize) -> NonNull<u8> {
        assert!(self.contains_page(index), "page {index} is outside the arena");
        unsafe { self.base.add(index * self.page_size) }
    }

    /// Address of the first byte after the header of page `index`.
    #[inline]
    pub fn usable_addr(&self, index: usize) -> NonNull<u8> {
        unsafe { self.page_addr(index).add(PAGE_HEADER_SIZE) }
    }

    #[inline]
    pub fn header(&self, index: usize) -> PageHeader {
        unsafe { PageHeader::read(self.page_addr(index)) }
    }

    #[inline]
    pub fn set_header(&mut self, index: usize, header: PageHeader) {
        unsafe { header.write(self.page_addr(index)) }
    }

    /// How many times page `index` has been handed out.
    #[inline]
    pub fn generation(&self, index: usize) -> u32 {
        self.generations[index]
    }

    /// Starts a new generation for page `index`, which is about to get a new owner.
    /// Wraps after `u32::MAX` hand-outs.
    pub fn renew(&mut self, index: usize) -> u32 {
        let generation = self.generations[index].wrapping_add(1);
        self.generations[index] = generation;
        generation
    }

    /// Every page header, in address order.
    pub fn headers(&self) -> impl Iterator<Item = (usize, PageHeader)> + '_ {
        (0..self.page_count).map(|index| (index, self.header(index)))
    }

    pub fn free_pages(&self) -> usize {
        self.headers().filter(|(_, header)| header.is_free()).count()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        match unsafe { kernel::return_memory(self.base.as_ptr(), self.mapped) } {
            Ok(()) => log::debug!("arena: returned {} bytes at {:p}", self.mapped, self.base),
            Err(err) => log::warn!(
                "arena: could not return {} bytes at {:p}: {err}",
                self.mapped,
                self.base
            ),
        }
    }
}
