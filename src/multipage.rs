//! Large-object path: runs of contiguous whole pages.
//!
//! A run of `n` pages is tagged on every page it covers. The head carries index 0 and the
//! following pages their offset from the head, all of them the total count:
//!
//! ```text
//! +-------------+   +-------------+   +-------------+
//! | run(0, 3)   |   | run(1, 3)   |   | run(2, 3)   |
//! |    head     |   |             |   |             |
//! +-------------+   +-------------+   +-------------+
//! ```
//!
//! Free pages are never merged or split; a run is just the first stretch of free pages
//! that happens to be long enough.

use std::ptr::NonNull;

use crate::{
    arena::Arena,
    error::{AllocError, HandleFault, Result},
    handle::Handle,
    header::{PageHeader, PageState},
};

/// Finds the first run of `pages` consecutive free pages and claims it.
///
/// This uses the first-fit algorithm: pages are scanned in address order and the first
/// stretch of free pages reaching `pages` is taken. Shorter stretches before it are skipped.
pub(crate) fn allocate_run(arena: &mut Arena, pages: usize) -> Result<Handle> {
    let not_enough = || {
        log::warn!("multipage: not enough memory for a run of {pages} pages");
        AllocError::NotEnoughMemory { pages }
    };

    let count = match u16::try_from(pages) {
        Ok(count) if count > 0 && pages <= arena.page_count() => count,
        _ => return Err(not_enough()),
    };

    let head = find_run(arena, pages).ok_or_else(not_enough)?;

    for index in 0..count {
        let page = head + index as usize;
        arena.renew(page);
        arena.set_header(page, PageHeader::run_page(index, count));
    }

    log::debug!("multipage: pages {}..{} form a run", head, head + pages);

    Ok(Handle::new(head, 0, arena.generation(head)))
}

/// Head of the first stretch of at least `pages` free pages.
fn find_run(arena: &Arena, pages: usize) -> Option<usize> {
    let mut start = 0;
    let mut len = 0;

    for (index, header) in arena.headers() {
        if !header.is_free() {
            len = 0;
            continue;
        }

        if len == 0 {
            start = index;
        }
        len += 1;

        if len == pages {
            return Some(start);
        }
    }

    None
}

/// Releases every page of the run headed by `handle`.
///
/// The whole run is checked before anything is touched, a handle that doesn't point at an
/// intact run head leaves the arena as it was.
pub(crate) fn free_run(arena: &mut Arena, handle: Handle) -> Result<()> {
    let pages = check(arena, handle)?;

    for index in handle.page()..handle.page() + pages {
        arena.set_header(index, PageHeader::FREE);
    }

    log::debug!(
        "multipage: released pages {}..{}",
        handle.page(),
        handle.page() + pages
    );

    Ok(())
}

/// Usable area of every page of the run headed by `handle`, in address order.
pub(crate) fn run_spans(arena: &Arena, handle: Handle) -> Result<Vec<NonNull<[u8]>>> {
    let pages = check(arena, handle)?;

    let spans = (handle.page()..handle.page() + pages)
        .map(|index| NonNull::slice_from_raw_parts(arena.usable_addr(index), arena.usable_size()))
        .collect();

    Ok(spans)
}

/// Makes sure `handle` is the head of the intact run currently on its page and returns the
/// run length.
fn check(arena: &Arena, handle: Handle) -> Result<usize> {
    let (head, slot) = (handle.page(), handle.slot());
    let reject = |fault| AllocError::invalid_handle(head, slot, fault);

    if !arena.contains_page(head) {
        return Err(reject(HandleFault::OutOfRange));
    }

    let pages = match arena.header(head).state() {
        PageState::Free => return Err(reject(HandleFault::PageFree)),
        _ if arena.generation(head) != handle.generation() => {
            return Err(reject(HandleFault::Stale));
        }
        PageState::RunHead { .. } if slot != 0 => return Err(reject(HandleFault::WrongKind)),
        PageState::RunHead { pages } => pages,
        PageState::RunContinuation { .. } => return Err(reject(HandleFault::NotRunHead)),
        PageState::BlockPool { .. } => return Err(reject(HandleFault::WrongKind)),
    };

    for index in 1..pages {
        let page = head + index as usize;
        if !arena.contains_page(page)
            || arena.header(page).state() != (PageState::RunContinuation { index, pages })
        {
            return Err(reject(HandleFault::BrokenRun));
        }
    }

    Ok(pages as usize)
}
