//! A page-based memory allocator over a single fixed-size arena.
//!
//! The arena is one mapping obtained from the operating system when the allocator is
//! created, sliced into pages of a fixed size. Every request is aligned to
//! [`config::ALIGNMENT`] bytes and then served in one of two ways:
//!
//! - Small requests (up to half of a page's usable area) become blocks in a page shared
//!   by blocks of exactly the same size.
//! - Anything bigger takes a run of contiguous whole pages.
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+-----+
//! | pool   | pool   | run    | run    | free   | pool   | ... |
//! | 4 B    | 12 B   | head   | 1 of 2 |        | 4 B    |     |
//! +--------+--------+--------+--------+--------+--------+-----+
//! ```
//!
//! All bookkeeping lives in the header at the start of every page, see [`PageHeader`].
//!
//! ```no_run
//! use pagealloc::{ArenaConfig, PageAlloc};
//!
//! let mut allocator = PageAlloc::init(ArenaConfig::default())?;
//!
//! let small = allocator.allocate(1)?;
//! let large = allocator.allocate(5000)?;
//! println!("{}", allocator.dump());
//!
//! allocator.free(small)?;
//! allocator.free(large)?;
//! # Ok::<(), pagealloc::AllocError>(())
//! ```

mod arena;
mod block;
pub mod config;
mod dump;
mod error;
mod handle;
mod header;
mod kernel;
mod multipage;
mod utils;

use std::ptr::NonNull;

pub use config::ArenaConfig;
pub use dump::{PageEntry, Report};
pub use error::{AllocError, HandleFault, Result};
pub use handle::Handle;
pub use header::{PageHeader, PageKind, PageState};
pub use utils::align;

use crate::{arena::Arena, block::BlockPools, config::ALIGNMENT};

/// The allocator. It owns the arena and releases it when dropped.
///
/// Nothing here is synchronised, callers sharing one allocator between threads have to
/// serialise access themselves.
pub struct PageAlloc {
    arena: Arena,
    pools: BlockPools,
    config: ArenaConfig,
}

impl PageAlloc {
    /// Maps the arena described by `config` and marks every page as free.
    ///
    /// Each call creates an independent allocator; handles issued by another one mean
    /// nothing here.
    pub fn init(config: ArenaConfig) -> Result<Self> {
        let arena = Arena::new(&config)?;
        let pools = BlockPools::new(arena.page_count());

        Ok(Self {
            arena,
            pools,
            config,
        })
    }

    /// Arena of `total_size` bytes with the default page size.
    pub fn with_capacity(total_size: usize) -> Result<Self> {
        Self::init(ArenaConfig::new(total_size))
    }

    /// Allocates room for `size` bytes.
    ///
    /// Once aligned, sizes up to [`ArenaConfig::small_limit`] are served from a block pool
    /// and anything bigger from a run of `aligned / usable + 1` pages. That is always one
    /// page more than strictly needed when the size is a multiple of the usable area.
    /// Zero-size requests are treated as one alignment unit.
    pub fn allocate(&mut self, size: usize) -> Result<Handle> {
        let usable = self.config.usable_size();

        let result = match size.checked_add(ALIGNMENT - 1) {
            Some(_) => {
                let aligned = align(size.max(1), ALIGNMENT);
                if aligned <= self.config.small_limit() {
                    self.pools.allocate(&mut self.arena, aligned)
                } else {
                    multipage::allocate_run(&mut self.arena, aligned / usable + 1)
                }
            }
            None => {
                log::warn!("allocate({size}): size overflows alignment");
                Err(AllocError::NotEnoughMemory {
                    pages: size / usable + 1,
                })
            }
        };

        if let Ok(handle) = &result {
            log::trace!("allocate({size}) -> {handle:?}");
        }

        result
    }

    /// Frees the allocation behind `handle`, dispatching on the kind of its page.
    ///
    /// Handles that were already freed are refused, also once their page has been handed out
    /// again, so a stale handle never releases memory it no longer owns.
    pub fn free(&mut self, handle: Handle) -> Result<()> {
        let result = match self.kind_of(handle) {
            Ok(PageKind::BlockPool) => self.pools.free(&mut self.arena, handle),
            Ok(PageKind::MultiPage) => multipage::free_run(&mut self.arena, handle),
            Err(err) => Err(err),
        };

        match &result {
            Ok(()) => log::trace!("free({handle:?})"),
            Err(err) => log::warn!("free({handle:?}): {err}"),
        }

        result
    }

    /// Memory owned by `handle`: the block itself, or the usable area of every page of a
    /// run in address order.
    ///
    /// Reading or writing through the returned pointers is only valid until the handle is
    /// freed or the allocator dropped.
    pub fn spans(&self, handle: Handle) -> Result<Vec<NonNull<[u8]>>> {
        let result = match self.kind_of(handle) {
            Ok(PageKind::BlockPool) => self.pools.block(&self.arena, handle).map(|block| vec![block]),
            Ok(PageKind::MultiPage) => multipage::run_spans(&self.arena, handle),
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            log::debug!("spans({handle:?}): {err}");
        }

        result
    }

    /// Report of every occupied page and the free-page count.
    pub fn dump(&self) -> Report {
        Report::collect(&self.arena)
    }

    #[inline]
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.arena.page_count()
    }

    pub fn free_pages(&self) -> usize {
        self.arena.free_pages()
    }

    pub fn page_state(&self, index: usize) -> Option<PageState> {
        self.arena
            .contains_page(index)
            .then(|| self.arena.header(index).state())
    }

    /// Address of page `index`, where its header starts.
    pub fn page_addr(&self, index: usize) -> Option<NonNull<u8>> {
        self.arena
            .contains_page(index)
            .then(|| self.arena.page_addr(index))
    }

    fn kind_of(&self, handle: Handle) -> Result<PageKind> {
        let page = handle.page();
        let reject = |fault| AllocError::invalid_handle(page, handle.slot(), fault);

        if !self.arena.contains_page(page) {
            return Err(reject(HandleFault::OutOfRange));
        }

        let header = self.arena.header(page);
        if header.is_free() {
            return Err(reject(HandleFault::PageFree));
        }
        if self.arena.generation(page) != handle.generation() {
            return Err(reject(HandleFault::Stale));
        }

        Ok(header.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_HEADER_SIZE;

    fn allocator(pages: usize) -> PageAlloc {
        PageAlloc::with_capacity(4000 * pages).unwrap()
    }

    #[test]
    fn init_leaves_every_page_free() {
        let allocator = PageAlloc::init(ArenaConfig::default()).unwrap();

        assert_eq!(1000, allocator.page_count());
        assert_eq!(1000, allocator.free_pages());
        assert!((0..1000).all(|i| allocator.page_state(i) == Some(PageState::Free)));
        assert_eq!(None, allocator.page_state(1000));
    }

    #[test]
    fn tiny_requests_share_a_page() {
        let mut allocator = PageAlloc::init(ArenaConfig::default()).unwrap();

        let a = allocator.allocate(1).unwrap();
        let b = allocator.allocate(1).unwrap();

        assert_eq!(a.page(), b.page());
        assert_eq!((1, 2), (a.slot(), b.slot()));
        assert_eq!(
            Some(PageState::BlockPool { block_size: 4, live: 2, issued: 2 }),
            allocator.page_state(a.page())
        );
    }

    #[test]
    fn equal_aligned_sizes_get_increasing_slots() {
        let mut allocator = allocator(4);

        let handles: Vec<_> = [5, 6, 7, 8, 6]
            .into_iter()
            .map(|size| allocator.allocate(size).unwrap())
            .collect();

        assert!(handles.iter().all(|h| h.page() == handles[0].page()));
        assert!(handles.windows(2).all(|w| w[0].slot() < w[1].slot()));
    }

    #[test]
    fn large_request_spans_pages() {
        let mut allocator = PageAlloc::init(ArenaConfig::default()).unwrap();

        let handle = allocator.allocate(5000).unwrap();

        assert!(handle.is_run());
        assert_eq!(Some(PageState::RunHead { pages: 2 }), allocator.page_state(0));
        assert_eq!(
            Some(PageState::RunContinuation { index: 1, pages: 2 }),
            allocator.page_state(1)
        );
        assert_eq!(998, allocator.free_pages());

        allocator.free(handle).unwrap();

        assert_eq!(1000, allocator.free_pages());
        assert_eq!(1000, allocator.dump().free_pages);
    }

    #[test]
    fn run_length_is_aligned_size_over_usable_plus_one() {
        let mut allocator = allocator(20);

        for (size, pages) in [(1997, 1), (3988, 1), (3989, 2), (3992, 2), (7984, 3), (12_000, 4)] {
            let handle = allocator.allocate(size).unwrap();
            let before = allocator.free_pages();

            assert_eq!(
                Some(PageState::RunHead { pages }),
                allocator.page_state(handle.page())
            );

            allocator.free(handle).unwrap();
            assert_eq!(before + pages as usize, allocator.free_pages());
        }
    }

    #[test]
    fn threshold_between_blocks_and_runs() {
        let mut allocator = allocator(4);

        let small = allocator.allocate(1996).unwrap();
        let large = allocator.allocate(1997).unwrap();

        assert!(!small.is_run());
        assert!(large.is_run());
        assert_eq!(Some(PageKind::BlockPool), allocator.page_state(small.page()).map(kind));
        assert_eq!(Some(PageKind::MultiPage), allocator.page_state(large.page()).map(kind));
    }

    fn kind(state: PageState) -> PageKind {
        match state {
            PageState::BlockPool { .. } => PageKind::BlockPool,
            _ => PageKind::MultiPage,
        }
    }

    #[test]
    fn alloc_then_free_restores_a_lone_page() {
        let mut allocator = allocator(3);

        let handle = allocator.allocate(100).unwrap();
        allocator.free(handle).unwrap();
        assert_eq!(Some(PageState::Free), allocator.page_state(handle.page()));

        let first = allocator.allocate(100).unwrap();
        let second = allocator.allocate(100).unwrap();
        allocator.free(second).unwrap();
        assert_ne!(Some(PageState::Free), allocator.page_state(first.page()));
    }

    #[test]
    fn issued_mark_never_drops_while_the_pool_lives() {
        let mut allocator = allocator(2);
        let anchor = allocator.allocate(16).unwrap();
        let mut previous = 1;

        for _ in 0..50 {
            let handle = allocator.allocate(16).unwrap();
            allocator.free(handle).unwrap();

            let Some(PageState::BlockPool { live, issued, .. }) = allocator.page_state(anchor.page())
            else {
                panic!("anchor page is no longer a pool");
            };
            assert_eq!(1, live);
            assert!(issued > previous);
            previous = issued;
        }
    }

    #[test]
    fn zero_size_is_one_alignment_unit() {
        let mut allocator = allocator(1);

        let handle = allocator.allocate(0).unwrap();

        assert_eq!(
            Some(PageState::BlockPool { block_size: 4, live: 1, issued: 1 }),
            allocator.page_state(handle.page())
        );
    }

    #[test]
    fn failures_are_reported_not_panicked() {
        let mut allocator = allocator(2);

        assert_eq!(
            Err(AllocError::NotEnoughMemory { pages: 3 }),
            allocator.allocate(8000)
        );
        assert!(matches!(
            allocator.allocate(usize::MAX),
            Err(AllocError::NotEnoughMemory { .. })
        ));

        allocator.allocate(4).unwrap();
        allocator.allocate(8).unwrap();
        assert_eq!(
            Err(AllocError::OutOfSpace { block_size: 12 }),
            allocator.allocate(12)
        );
        assert_eq!(0, allocator.free_pages());
    }

    #[test]
    fn invalid_handles_are_rejected() {
        let mut allocator = allocator(2);

        let block = allocator.allocate(4).unwrap();
        let run = allocator.allocate(3000).unwrap();

        allocator.free(block).unwrap();
        assert_eq!(
            Err(AllocError::invalid_handle(0, 1, HandleFault::PageFree)),
            allocator.free(block)
        );

        allocator.free(run).unwrap();
        assert!(matches!(
            allocator.free(run),
            Err(AllocError::InvalidHandle { fault: HandleFault::PageFree, .. })
        ));
        assert!(matches!(
            allocator.spans(Handle::new(7, 0, 0)),
            Err(AllocError::InvalidHandle { fault: HandleFault::OutOfRange, .. })
        ));
    }

    #[test]
    fn freed_block_handle_stays_dead_after_its_page_is_reused() {
        let mut allocator = allocator(2);

        let old = allocator.allocate(8).unwrap();
        allocator.free(old).unwrap();

        let same_size = allocator.allocate(8).unwrap();
        assert_eq!((old.page(), old.slot()), (same_size.page(), same_size.slot()));
        assert_eq!(
            Err(AllocError::invalid_handle(0, 1, HandleFault::Stale)),
            allocator.free(old)
        );
        assert!(matches!(
            allocator.spans(old),
            Err(AllocError::InvalidHandle { fault: HandleFault::Stale, .. })
        ));
        allocator.free(same_size).unwrap();

        let other_size = allocator.allocate(100).unwrap();
        assert_eq!(old.page(), other_size.page());
        assert_eq!(
            Err(AllocError::invalid_handle(0, 1, HandleFault::Stale)),
            allocator.free(old)
        );
        assert_eq!(
            Some(PageState::BlockPool { block_size: 100, live: 1, issued: 1 }),
            allocator.page_state(0)
        );
        assert_eq!(1, allocator.free_pages());
    }

    #[test]
    fn freed_run_handle_stays_dead_after_its_pages_are_reused() {
        let mut allocator = allocator(6);

        let old = allocator.allocate(5000).unwrap();
        allocator.free(old).unwrap();

        let current = allocator.allocate(5000).unwrap();
        assert_eq!(old.page(), current.page());
        assert_eq!(
            Err(AllocError::invalid_handle(0, 0, HandleFault::Stale)),
            allocator.free(old)
        );

        // Pages 0 and 1 still belong to `current`.
        let next = allocator.allocate(5000).unwrap();
        assert_eq!(2, next.page());
        assert_eq!(Some(PageState::RunHead { pages: 2 }), allocator.page_state(0));

        allocator.free(current).unwrap();
        let block = allocator.allocate(4).unwrap();
        assert_eq!(0, block.page());
        assert!(matches!(
            allocator.free(old),
            Err(AllocError::InvalidHandle { fault: HandleFault::Stale, .. })
        ));
    }

    #[test]
    fn spans_are_writable_and_stay_out_of_headers() {
        let mut allocator = allocator(4);

        let block = allocator.allocate(40).unwrap();
        let run = allocator.allocate(6000).unwrap();

        for handle in [block, run] {
            for span in allocator.spans(handle).unwrap() {
                unsafe { span.cast::<u8>().as_ptr().write_bytes(0xFF, span.len()) };
            }
        }

        assert_eq!(
            Some(PageState::BlockPool { block_size: 40, live: 1, issued: 1 }),
            allocator.page_state(block.page())
        );
        assert_eq!(Some(PageState::RunHead { pages: 2 }), allocator.page_state(run.page()));
        assert_eq!(
            Some(PageState::RunContinuation { index: 1, pages: 2 }),
            allocator.page_state(run.page() + 1)
        );
    }

    /// Small deterministic generator so the sequence below is reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }
    }

    #[test]
    fn live_allocations_never_overlap() {
        let mut allocator = allocator(64);
        let mut rng = XorShift(0x2545_F491_4F6C_DD1D);
        let mut live: Vec<Handle> = Vec::new();

        let base = allocator.page_addr(0).unwrap().as_ptr() as usize;
        let headers: Vec<_> = (0..allocator.page_count())
            .map(|i| {
                let start = base + i * 4000;
                (start, start + PAGE_HEADER_SIZE)
            })
            .collect();

        for _ in 0..2000 {
            if live.is_empty() || rng.next() % 3 != 0 {
                let size = match rng.next() % 10 {
                    0 => (rng.next() % 12_000) as usize,
                    _ => (rng.next() % 256) as usize,
                };
                match allocator.allocate(size) {
                    Ok(handle) => live.push(handle),
                    Err(AllocError::OutOfSpace { .. } | AllocError::NotEnoughMemory { .. }) => {}
                    Err(err) => panic!("unexpected error {err}"),
                }
            } else {
                let victim = (rng.next() % live.len() as u64) as usize;
                allocator.free(live.swap_remove(victim)).unwrap();
            }

            let mut ranges: Vec<(usize, usize)> = live
                .iter()
                .flat_map(|&handle| allocator.spans(handle).unwrap())
                .map(|span| {
                    let start = span.cast::<u8>().as_ptr() as usize;
                    (start, start + span.len())
                })
                .collect();
            ranges.extend(headers.iter().copied());
            ranges.sort_unstable();

            assert!(ranges.windows(2).all(|w| w[0].1 <= w[1].0));
        }
    }

    #[test]
    fn dump_counts_free_pages() {
        let mut allocator = PageAlloc::init(ArenaConfig::default()).unwrap();

        let a = allocator.allocate(1).unwrap();
        allocator.allocate(5000).unwrap();
        let report = allocator.dump();

        assert_eq!(997, report.free_pages);
        assert_eq!(3, report.entries.len());
        assert_eq!(a.page(), report.entries[0].index);
    }

    #[test]
    fn reinit_starts_fresh() {
        let mut allocator = allocator(2);
        allocator.allocate(4).unwrap();

        let allocator = PageAlloc::init(*allocator.config()).unwrap();
        assert_eq!(2, allocator.free_pages());
    }
}
