use std::ptr::NonNull;

use crate::{
    arena::Arena,
    config::PAGE_HEADER_SIZE,
    error::{AllocError, HandleFault, Result},
    handle::Handle,
    header::{PageHeader, PageState},
};

/// Small-object path. Pages are turned into pools of equal-size blocks.
///
/// Each pool page is laid out like this, `b` being its block size:
///
/// ```text
/// +--------+---------+---------+---------+-----+---------+--------+
/// | header | (slot 0)| slot 1  | slot 2  | ... | slot n  | unused |
/// +--------+---------+---------+---------+-----+---------+--------+
///          <-- b --> <-- b -->
/// ```
///
/// Slot `k` starts at `page + header + k * b`. Slot 0 is never issued. Slots are handed out
/// in order (1, 2, 3, ...) and a freed slot is not reused while the page remains a pool:
/// the header keeps both the number of live blocks (`num`) and the number of slots issued
/// so far (`mark`). A pool whose issued slots reached its capacity takes no more blocks,
/// and once its last live block is freed the whole page goes back to free.
///
/// Which issued slots are still live is tracked in a bitmap per page, kept here and not in
/// the page itself, so that freeing the same block twice is caught.
pub(crate) struct BlockPools {
    live: Vec<SlotBitmap>,
}

impl BlockPools {
    pub fn new(page_count: usize) -> Self {
        Self {
            live: (0..page_count).map(|_| SlotBitmap::default()).collect(),
        }
    }

    /// Number of slots a page can issue for blocks of `block_size` bytes.
    pub fn capacity(usable_size: usize, block_size: usize) -> u16 {
        let slots = (usable_size / block_size).saturating_sub(1);
        slots.min(u16::MAX as usize) as u16
    }

    /// Hands out one block of `block_size` bytes.
    ///
    /// Pages are scanned in address order. The first pool with the same block size and room
    /// left wins, even if a free page was seen before it. Without such a pool, the first
    /// free page becomes a new pool.
    pub fn allocate(&mut self, arena: &mut Arena, block_size: usize) -> Result<Handle> {
        let Ok(size_field) = u16::try_from(block_size) else {
            log::warn!("block pools: {block_size}-byte blocks don't fit a page header");
            return Err(AllocError::OutOfSpace { block_size });
        };
        let capacity = match block_size {
            0 => 0,
            _ => Self::capacity(arena.usable_size(), block_size),
        };
        if capacity == 0 {
            log::warn!("block pools: {block_size}-byte blocks don't fit in a page");
            return Err(AllocError::OutOfSpace { block_size });
        }

        let mut free_page = None;
        let mut matching = None;

        for (index, header) in arena.headers() {
            match header.state() {
                PageState::Free => {
                    free_page.get_or_insert(index);
                }
                PageState::BlockPool {
                    block_size: size,
                    issued,
                    ..
                } if size == size_field && issued < capacity => {
                    matching = Some((index, header));
                    break;
                }
                _ => {}
            }
        }

        let (page, mut header) = match (matching, free_page) {
            (Some(found), _) => found,
            (None, Some(index)) => {
                log::debug!("block pools: page {index} becomes a pool of {block_size}-byte blocks");
                self.live[index].clear();
                arena.renew(index);
                (index, PageHeader::block_pool(size_field))
            }
            (None, None) => {
                log::warn!("block pools: no free space for a {block_size}-byte block");
                return Err(AllocError::OutOfSpace { block_size });
            }
        };

        let slot = header.mark() + 1;
        header.set_mark(slot);
        header.set_num(header.num() + 1);
        arena.set_header(page, header);
        self.live[page].insert(slot);

        Ok(Handle::new(page, slot, arena.generation(page)))
    }

    /// Gives a block back to its pool. The page returns to free with its last live block.
    pub fn free(&mut self, arena: &mut Arena, handle: Handle) -> Result<()> {
        let mut header = self.check(arena, handle)?;
        let page = handle.page();

        self.live[page].remove(handle.slot());

        match header.num() - 1 {
            0 => {
                log::debug!("block pools: page {page} has no live blocks left, releasing it");
                self.live[page].clear();
                arena.set_header(page, PageHeader::FREE);
            }
            live => {
                header.set_num(live);
                arena.set_header(page, header);
            }
        }

        Ok(())
    }

    /// Bytes of the block behind `handle`.
    pub fn block(&self, arena: &Arena, handle: Handle) -> Result<NonNull<[u8]>> {
        let header = self.check(arena, handle)?;
        let block_size = header.size() as usize;
        let offset = PAGE_HEADER_SIZE + handle.slot() as usize * block_size;

        let data = unsafe { arena.page_addr(handle.page()).add(offset) };
        Ok(NonNull::slice_from_raw_parts(data, block_size))
    }

    /// Makes sure `handle` refers to a live block of the pool currently on its page and
    /// returns the header of that page.
    fn check(&self, arena: &Arena, handle: Handle) -> Result<PageHeader> {
        let (page, slot) = (handle.page(), handle.slot());
        let reject = |fault| AllocError::invalid_handle(page, slot, fault);

        if !arena.contains_page(page) {
            return Err(reject(HandleFault::OutOfRange));
        }

        let header = arena.header(page);
        match header.state() {
            PageState::Free => Err(reject(HandleFault::PageFree)),
            _ if arena.generation(page) != handle.generation() => Err(reject(HandleFault::Stale)),
            PageState::BlockPool { issued, .. } => {
                if slot == 0 || slot > issued {
                    return Err(reject(HandleFault::UnknownSlot));
                }
                if !self.live[page].contains(slot) {
                    return Err(reject(HandleFault::DoubleFree));
                }
                Ok(header)
            }
            PageState::RunHead { .. } | PageState::RunContinuation { .. } => {
                Err(reject(HandleFault::WrongKind))
            }
        }
    }
}

/// Which slots of one page are live. Bit `k` stands for slot `k`.
#[derive(Default)]
struct SlotBitmap {
    words: Vec<u64>,
}

impl SlotBitmap {
    const BITS: usize = u64::BITS as usize;

    fn insert(&mut self, slot: u16) {
        let (word, bit) = Self::position(slot);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= bit;
    }

    fn remove(&mut self, slot: u16) {
        let (word, bit) = Self::position(slot);
        if let Some(bits) = self.words.get_mut(word) {
            *bits &= !bit;
        }
    }

    fn contains(&self, slot: u16) -> bool {
        let (word, bit) = Self::position(slot);
        self.words.get(word).is_some_and(|bits| bits & bit != 0)
    }

    fn clear(&mut self) {
        self.words.clear();
    }

    #[inline]
    fn position(slot: u16) -> (usize, u64) {
        let slot = slot as usize;
        (slot / Self::BITS, 1 << (slot % Self::BITS))
    }
}
