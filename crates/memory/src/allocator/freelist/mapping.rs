//! Size-class mapping for the two-level index.
//!
//! First level: power-of-two magnitude. Second level: 16 linear buckets per
//! magnitude. Everything below [`SMALL_BLOCK_SIZE`] lands in first level 0,
//! split linearly in 8-byte steps.

/// log2 of the payload alignment
pub(super) const ALIGN_SIZE_LOG2: u32 = 3;
/// Payload alignment and size granularity
pub(super) const ALIGN_SIZE: usize = 1 << ALIGN_SIZE_LOG2;

/// log2 of the number of second-level buckets per first level
pub(super) const SL_INDEX_COUNT_LOG2: u32 = 4;
/// Second-level buckets per first level
pub(super) const SL_INDEX_COUNT: usize = 1 << SL_INDEX_COUNT_LOG2;

/// Largest first-level magnitude (exclusive upper bound on block size)
#[cfg(target_pointer_width = "64")]
pub(super) const FL_INDEX_MAX: u32 = 32;
#[cfg(not(target_pointer_width = "64"))]
pub(super) const FL_INDEX_MAX: u32 = 30;

/// First level at which the linear small-block range ends
pub(super) const FL_INDEX_SHIFT: u32 = SL_INDEX_COUNT_LOG2 + ALIGN_SIZE_LOG2;
/// Number of first-level classes
pub(super) const FL_INDEX_COUNT: usize = (FL_INDEX_MAX - FL_INDEX_SHIFT + 1) as usize;

/// Blocks below this size share first level 0
pub(super) const SMALL_BLOCK_SIZE: usize = 1 << FL_INDEX_SHIFT;

/// Every block size must stay strictly below this
pub(super) const BLOCK_SIZE_MAX: usize = 1 << FL_INDEX_MAX;

const _: () = assert!(FL_INDEX_COUNT <= u32::BITS as usize);
const _: () = assert!(SL_INDEX_COUNT <= u32::BITS as usize);

/// Index of the highest set bit. `size` must be non-zero.
#[inline(always)]
fn fls(size: usize) -> u32 {
    debug_assert!(size != 0);
    usize::BITS - 1 - size.leading_zeros()
}

/// Bucket a block of exactly `size` bytes belongs in.
#[inline]
pub(super) fn mapping_insert(size: usize) -> (usize, usize) {
    if size < SMALL_BLOCK_SIZE {
        (0, size / (SMALL_BLOCK_SIZE / SL_INDEX_COUNT))
    } else {
        let fl = fls(size);
        let sl = (size >> (fl - SL_INDEX_COUNT_LOG2)) ^ (1 << SL_INDEX_COUNT_LOG2);
        ((fl - (FL_INDEX_SHIFT - 1)) as usize, sl)
    }
}

/// Smallest bucket whose every block is at least `size` bytes.
///
/// Rounds `size` up to the next bucket boundary before mapping, so a hit
/// never needs a size check. May return a first level past
/// [`FL_INDEX_COUNT`] for requests near [`BLOCK_SIZE_MAX`].
#[inline]
pub(super) fn mapping_search(size: usize) -> (usize, usize) {
    if size >= SMALL_BLOCK_SIZE {
        let round = (1 << (fls(size) - SL_INDEX_COUNT_LOG2)) - 1;
        mapping_insert(size + round)
    } else {
        mapping_insert(size)
    }
}
