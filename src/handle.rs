/// Identifies one live allocation: the page that owns it, its slot within that page and
/// the generation of the page when it was handed out.
///
/// Block handles carry a slot index starting at 1. Handles of multi-page runs point at the
/// run's head page and always carry slot 0.
///
/// A page's generation changes every time it is handed out again, so a handle kept past its
/// free is rejected instead of reaching whoever owns the page now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    page: usize,
    slot: u16,
    generation: u32,
}

impl Handle {
    #[inline]
    pub(crate) const fn new(page: usize, slot: u16, generation: u32) -> Self {
        Self {
            page,
            slot,
            generation,
        }
    }

    /// Index of the owning page (the head page for runs).
    #[inline]
    pub const fn page(&self) -> usize {
        self.page
    }

    #[inline]
    pub const fn slot(&self) -> u16 {
        self.slot
    }

    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    #[inline]
    pub const fn is_run(&self) -> bool {
        self.slot == 0
    }
}
