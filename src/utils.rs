//! Helper functions that don't belong to any concrete part of the allocator.

/// It aligns `to_be_aligned` up to a multiple of `alignment`.
///
/// Request sizes are aligned to [`crate::config::ALIGNMENT`] before the allocator decides
/// between the block-pool path and the multi-page path, and the arena mapping length is
/// aligned to the OS page size. `alignment` has to be a power of two.
pub fn align(to_be_aligned: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}
