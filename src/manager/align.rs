//! Alignment arithmetic shared by both backends.

/// Round `size` up to the next multiple of `align`
///
/// Zero rounds to one full unit: neither LVM nor ndctl accept empty
/// allocations.
#[inline]
pub fn align_up(size: u64, align: u64) -> u64 {
    debug_assert!(align > 0);
    let size = size.max(1);
    match size % align {
        0 => size,
        rem => size.saturating_add(align - rem),
    }
}

/// Round `size` down to a multiple of `align`
#[inline]
pub fn align_down(size: u64, align: u64) -> u64 {
    debug_assert!(align > 0);
    size / align * align
}

/// Alignment unit of a region once interleaving is accounted for
#[inline]
pub fn region_align(align: u64, interleave_ways: u64) -> u64 {
    align * interleave_ways.max(1)
}
