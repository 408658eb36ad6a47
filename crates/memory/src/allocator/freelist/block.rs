//! In-place block headers.
//!
//! Every block is addressed by the offset of its header from the pool base.
//! A header is four 8-byte words:
//!
//! ```text
//! +0   prev_phys   offset of the physical predecessor (valid only while it is free)
//! +8   size|flags  low half: payload size, bit 0 = this block free,
//!                  bit 1 = predecessor free; high half: boundary tag
//! +16  next_free   free-list successor  (payload starts here when used)
//! +24  prev_free   free-list predecessor
//! ```
//!
//! The `prev_phys` word overlaps the last word of the predecessor's payload,
//! so a used block costs one word ([`BLOCK_HEADER_OVERHEAD`]). Offset 0 holds
//! the null block that terminates every free list.
//!
//! The boundary tag is a hash of the block offset salted with the pool
//! address. Block sizes fit in 32 bits, so the tag costs no space, and a
//! payload pointer that does not sit on a real block boundary is rejected
//! without walking the pool.
//!
//! All pointer arithmetic of the free-list engine lives in this file.

use core::ptr::NonNull;

use super::mapping::ALIGN_SIZE;

/// Header word width
const WORD: usize = 8;

const PREV_PHYS: usize = 0;
const SIZE: usize = WORD;
const NEXT_FREE: usize = 2 * WORD;
const PREV_FREE: usize = 3 * WORD;

const FREE_BIT: u64 = 1 << 0;
const PREV_FREE_BIT: u64 = 1 << 1;
const FLAG_MASK: u64 = FREE_BIT | PREV_FREE_BIT;
const LOW_MASK: u64 = u32::MAX as u64;
const TAG_SHIFT: u32 = 32;
const TAG_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Bytes a used block costs on top of its payload
pub(super) const BLOCK_HEADER_OVERHEAD: usize = WORD;

/// Distance from a block offset to its payload
pub(super) const BLOCK_START_OFFSET: usize = SIZE + WORD;

/// Full header size; the remainder of a split must hold one
pub(super) const BLOCK_HEADER_SIZE: usize = 4 * WORD;

/// Smallest payload a block can have: room for the free-list links plus the
/// successor's `prev_phys` word.
pub(super) const BLOCK_SIZE_MIN: usize = BLOCK_HEADER_SIZE - WORD;

/// Offset of the null block
pub(super) const NULL_BLOCK: usize = 0;

/// Offset of the first real block (right after the null block's header)
pub(super) const FIRST_BLOCK: usize = BLOCK_HEADER_SIZE;

/// Bytes of pool consumed besides the first block's payload: the null block,
/// the first block's `prev_phys` and size words, and the end sentinel's size
/// word.
pub(super) const POOL_OVERHEAD: usize = FIRST_BLOCK + BLOCK_START_OFFSET + WORD;

const _: () = assert!(BLOCK_SIZE_MIN % ALIGN_SIZE == 0);

/// Bounds-checked view of the words in a pool's memory.
///
/// Every accessor takes a block offset. Reads and writes are checked against
/// the pool length, so a corrupted link panics instead of scribbling outside
/// the pool.
#[derive(Debug, Clone, Copy)]
pub(super) struct Blocks {
    base: NonNull<u8>,
    len: usize,
    salt: u64,
}

impl Blocks {
    /// # Safety
    ///
    /// `base` must be 8-aligned and valid for reads and writes of `len`
    /// bytes for as long as the view is used.
    pub(super) unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        debug_assert!(base.as_ptr() as usize % ALIGN_SIZE == 0);
        let salt = (base.as_ptr() as usize as u64).wrapping_mul(TAG_MIX).rotate_left(29);
        Self { base, len, salt }
    }

    pub(super) fn base(self) -> NonNull<u8> {
        self.base
    }

    pub(super) fn len(self) -> usize {
        self.len
    }

    #[inline(always)]
    fn word_ptr(self, offset: usize) -> *mut u64 {
        assert!(
            offset % WORD == 0 && offset + WORD <= self.len,
            "free-list header offset {offset} outside pool of {} bytes",
            self.len
        );
        // SAFETY: offset + WORD <= len, and the pool is valid for len bytes
        unsafe { self.base.as_ptr().add(offset).cast::<u64>() }
    }

    #[inline(always)]
    fn read(self, offset: usize) -> u64 {
        // SAFETY: word_ptr bounds-checks and the base is 8-aligned
        unsafe { self.word_ptr(offset).read() }
    }

    #[inline(always)]
    fn write(self, offset: usize, value: u64) {
        // SAFETY: word_ptr bounds-checks and the base is 8-aligned
        unsafe { self.word_ptr(offset).write(value) }
    }

    // ------------------------------------------------------------------
    // Size and flags
    // ------------------------------------------------------------------

    /// Never zero, so a zeroed or small word can't pass for a header.
    #[inline(always)]
    fn tag(self, block: usize) -> u64 {
        ((block as u64 ^ self.salt).wrapping_mul(TAG_MIX) >> TAG_SHIFT) | 1
    }

    /// Size and flags without the tag
    #[inline(always)]
    fn size_word(self, block: usize) -> u64 {
        self.read(block + SIZE) & LOW_MASK
    }

    #[inline(always)]
    fn set_size_word(self, block: usize, word: u64) {
        debug_assert!(word <= LOW_MASK, "block size overflows its header");
        self.write(block + SIZE, self.tag(block) << TAG_SHIFT | word);
    }

    /// Whether `block` carries the header this view wrote for that offset.
    #[inline]
    pub(super) fn is_sealed(self, block: usize) -> bool {
        self.read(block + SIZE) >> TAG_SHIFT == self.tag(block)
    }

    #[inline]
    pub(super) fn size(self, block: usize) -> usize {
        (self.size_word(block) & !FLAG_MASK) as usize
    }

    #[inline]
    pub(super) fn set_size(self, block: usize, size: usize) {
        let flags = self.size_word(block) & FLAG_MASK;
        self.set_size_word(block, size as u64 | flags);
    }

    /// Overwrite size and both flags at once (used on fresh headers).
    #[inline]
    pub(super) fn init(self, block: usize, size: usize, free: bool, prev_free: bool) {
        let mut word = size as u64;
        if free {
            word |= FREE_BIT;
        }
        if prev_free {
            word |= PREV_FREE_BIT;
        }
        self.set_size_word(block, word);
    }

    #[inline]
    pub(super) fn is_last(self, block: usize) -> bool {
        self.size(block) == 0
    }

    #[inline]
    pub(super) fn is_free(self, block: usize) -> bool {
        self.size_word(block) & FREE_BIT != 0
    }

    #[inline]
    fn set_flag(self, block: usize, bit: u64, on: bool) {
        let word = self.size_word(block);
        self.set_size_word(block, if on { word | bit } else { word & !bit });
    }

    #[inline]
    pub(super) fn set_free(self, block: usize) {
        self.set_flag(block, FREE_BIT, true);
    }

    #[inline]
    pub(super) fn set_used(self, block: usize) {
        self.set_flag(block, FREE_BIT, false);
    }

    #[inline]
    pub(super) fn is_prev_free(self, block: usize) -> bool {
        self.size_word(block) & PREV_FREE_BIT != 0
    }

    #[inline]
    pub(super) fn set_prev_free(self, block: usize) {
        self.set_flag(block, PREV_FREE_BIT, true);
    }

    #[inline]
    pub(super) fn set_prev_used(self, block: usize) {
        self.set_flag(block, PREV_FREE_BIT, false);
    }

    // ------------------------------------------------------------------
    // Free-list links
    // ------------------------------------------------------------------

    #[inline]
    pub(super) fn next_free(self, block: usize) -> usize {
        self.read(block + NEXT_FREE) as usize
    }

    #[inline]
    pub(super) fn set_next_free(self, block: usize, next: usize) {
        self.write(block + NEXT_FREE, next as u64);
    }

    #[inline]
    pub(super) fn prev_free(self, block: usize) -> usize {
        self.read(block + PREV_FREE) as usize
    }

    #[inline]
    pub(super) fn set_prev_free_link(self, block: usize, prev: usize) {
        self.write(block + PREV_FREE, prev as u64);
    }

    // ------------------------------------------------------------------
    // Physical neighbours
    // ------------------------------------------------------------------

    /// Physical predecessor. Only meaningful while it is free.
    #[inline]
    pub(super) fn prev_phys(self, block: usize) -> usize {
        assert!(
            self.is_prev_free(block),
            "previous block of {block} must be free"
        );
        self.read(block + PREV_PHYS) as usize
    }

    /// Physical successor.
    #[inline]
    pub(super) fn next_phys(self, block: usize) -> usize {
        assert!(!self.is_last(block), "end sentinel has no successor");
        block + BLOCK_HEADER_OVERHEAD + self.size(block)
    }

    /// Physical successor, with its back link pointed at `block`.
    #[inline]
    pub(super) fn link_next(self, block: usize) -> usize {
        let next = self.next_phys(block);
        self.write(next + PREV_PHYS, block as u64);
        next
    }

    /// Flag `block` free and tell its successor.
    #[inline]
    pub(super) fn mark_as_free(self, block: usize) {
        let next = self.link_next(block);
        self.set_prev_free(next);
        self.set_free(block);
    }

    /// Flag `block` used and tell its successor.
    #[inline]
    pub(super) fn mark_as_used(self, block: usize) {
        let next = self.next_phys(block);
        self.set_prev_used(next);
        self.set_used(block);
    }

    // ------------------------------------------------------------------
    // Payload conversion
    // ------------------------------------------------------------------

    #[inline]
    pub(super) fn payload(self, block: usize) -> NonNull<u8> {
        let offset = block + BLOCK_START_OFFSET;
        debug_assert!(offset <= self.len);
        // SAFETY: offset is within the pool, so the result is in bounds and non-null
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    /// Block offset for a payload pointer, or `None` if the pointer cannot
    /// be a payload of this pool (outside it, misaligned, or inside the
    /// fixed header area).
    #[inline]
    pub(super) fn block_of(self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = ptr.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;
        let offset = addr.checked_sub(base)?;
        if offset % ALIGN_SIZE != 0
            || offset < FIRST_BLOCK + BLOCK_START_OFFSET
            || offset >= self.len
        {
            return None;
        }
        Some(offset - BLOCK_START_OFFSET)
    }

    /// Split `block` so it keeps `size` payload bytes; returns the new free
    /// remainder. The caller checks [`can_split`](Self::can_split) first.
    pub(super) fn split(self, block: usize, size: usize) -> usize {
        let remaining = block + BLOCK_HEADER_OVERHEAD + size;
        let remain_size = self.size(block) - (size + BLOCK_HEADER_OVERHEAD);

        debug_assert!(remain_size >= BLOCK_SIZE_MIN, "block split with invalid size");

        self.init(remaining, remain_size, false, false);
        self.set_size(block, size);
        self.mark_as_free(remaining);
        remaining
    }

    #[inline]
    pub(super) fn can_split(self, block: usize, size: usize) -> bool {
        self.size(block) >= BLOCK_HEADER_SIZE + size
    }

    /// Fold `block` into its physical predecessor `prev`; returns `prev`.
    pub(super) fn absorb(self, prev: usize, block: usize) -> usize {
        assert!(!self.is_last(prev), "previous block can't be last");
        let size = self.size(prev) + self.size(block) + BLOCK_HEADER_OVERHEAD;
        // The absorbed header must not pass for a boundary later.
        self.write(block + SIZE, 0);
        self.set_size(prev, size);
        self.link_next(prev);
        prev
    }

    /// Copy `len` payload bytes between two blocks of this pool.
    pub(super) fn copy_payload(self, from: NonNull<u8>, to: NonNull<u8>, len: usize) {
        // SAFETY: both pointers are payloads of distinct blocks in this pool
        // with at least `len` bytes each.
        unsafe { core::ptr::copy_nonoverlapping(from.as_ptr(), to.as_ptr(), len) };
    }
}
