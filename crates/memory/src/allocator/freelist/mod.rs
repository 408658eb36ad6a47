//! Two-level segregated free-list allocator (TLSF)
//!
//! Manages one contiguous block of memory with O(1) `malloc` and `free`.
//! Free blocks are kept in size-classed lists indexed by a two-level bitmap;
//! a lookup finds the smallest populated class that is guaranteed to fit the
//! request with two bit scans. Freed blocks are coalesced with free physical
//! neighbours immediately, so two adjacent free blocks never exist.
//!
//! Block headers live inside the managed memory (see `block.rs`); the index
//! (bitmaps and list heads) lives in the [`Pool`] value itself.
//!
//! # Examples
//!
//! ```
//! use strata_memory::allocator::freelist::Pool;
//!
//! let mut pool = Pool::with_capacity(64 * 1024)?;
//! let a = pool.malloc(64).unwrap();
//! let b = pool.malloc(64).unwrap();
//! pool.free(a);
//! // The freed block is the first fit for the same size.
//! assert_eq!(pool.malloc(64), Some(a));
//! # pool.free(b);
//! # Ok::<(), strata_memory::MemoryError>(())
//! ```

mod block;
mod mapping;

use core::marker::PhantomData;
use core::ptr::NonNull;
use std::alloc::{self, Layout};

use self::block::{
    BLOCK_HEADER_OVERHEAD, BLOCK_SIZE_MIN, Blocks, FIRST_BLOCK, NULL_BLOCK, POOL_OVERHEAD,
};
use self::mapping::{
    ALIGN_SIZE, BLOCK_SIZE_MAX, FL_INDEX_COUNT, SL_INDEX_COUNT, mapping_insert, mapping_search,
};
use super::Allocator;
use super::stats::{FragmentationStats, PoolStats};
use crate::core::traits::MemoryUsage;
use crate::error::{MemoryError, MemoryResult};
use crate::utils::{align_down, align_up};

#[cfg(feature = "logging")]
use strata_log::debug;

/// A TLSF pool over one block of memory.
///
/// The lifetime ties a pool created with [`Pool::new`] to the borrowed
/// slice. Pools that own their memory ([`Pool::with_capacity`]) are
/// `Pool<'static>`.
///
/// Not thread-safe: every mutating operation takes `&mut self`.
pub struct Pool<'a> {
    blocks: Blocks,
    /// One bit per first level with any populated second-level bucket
    fl_bitmap: u32,
    /// One bit per populated second-level bucket
    sl_bitmap: [u32; FL_INDEX_COUNT],
    /// Head of each free list (offset, `NULL_BLOCK` when empty)
    heads: [[usize; SL_INDEX_COUNT]; FL_INDEX_COUNT],
    /// Set when the pool allocated its memory itself
    owned: Option<(NonNull<u8>, Layout)>,
    _marker: PhantomData<&'a mut [u8]>,
}

// SAFETY: the pool exclusively owns (or exclusively borrows) its memory and
// holds no thread-affine state.
unsafe impl Send for Pool<'_> {}

impl core::fmt::Debug for Pool<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pool")
            .field("base", &self.blocks.base())
            .field("len", &self.blocks.len())
            .field("fl_bitmap", &format_args!("{:#034b}", self.fl_bitmap))
            .field("owned", &self.owned.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a> Pool<'a> {
    /// Smallest block of memory a pool can be created over (8-aligned).
    pub const MIN_POOL_SIZE: usize = POOL_OVERHEAD + BLOCK_SIZE_MIN;

    /// Largest block of memory a pool can be created over.
    pub const MAX_POOL_SIZE: usize = POOL_OVERHEAD + BLOCK_SIZE_MAX - ALIGN_SIZE;

    /// Largest request `malloc` can satisfy, given enough free space.
    pub const MAX_ALLOCATION: usize = BLOCK_SIZE_MAX - ALIGN_SIZE;

    /// Create a pool over a borrowed slice.
    ///
    /// The slice start is aligned up to 8 bytes; the pool fails with
    /// [`MemoryError::InvalidPoolSize`] if what remains cannot hold the fixed
    /// headers and one minimum block, or exceeds [`Self::MAX_POOL_SIZE`].
    pub fn new(memory: &'a mut [u8]) -> MemoryResult<Self> {
        let len = memory.len();
        let ptr = NonNull::from(memory).cast::<u8>();
        // SAFETY: the slice is valid for `len` bytes and borrowed for 'a
        unsafe { Self::from_raw_parts(ptr, len) }
    }

    /// Create a pool over raw memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for the
    /// lifetime `'a`, and nothing else may access that memory while the pool
    /// is alive.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> MemoryResult<Self> {
        let addr = ptr.as_ptr() as usize;
        let skew = align_up(addr, ALIGN_SIZE) - addr;
        if len < skew {
            return Err(MemoryError::invalid_pool_size(
                len,
                Self::MIN_POOL_SIZE,
                Self::MAX_POOL_SIZE,
            ));
        }
        let len = align_down(len - skew, ALIGN_SIZE);
        if !(Self::MIN_POOL_SIZE..=Self::MAX_POOL_SIZE).contains(&len) {
            return Err(MemoryError::invalid_pool_size(
                len,
                Self::MIN_POOL_SIZE,
                Self::MAX_POOL_SIZE,
            ));
        }

        // SAFETY: skew < ALIGN_SIZE and skew <= len, so the result stays in bounds
        let base = unsafe { NonNull::new_unchecked(ptr.as_ptr().add(skew)) };
        // SAFETY: base is 8-aligned and valid for len bytes per the caller
        let blocks = unsafe { Blocks::new(base, len) };

        let mut pool = Self {
            blocks,
            fl_bitmap: 0,
            sl_bitmap: [0; FL_INDEX_COUNT],
            heads: [[NULL_BLOCK; SL_INDEX_COUNT]; FL_INDEX_COUNT],
            owned: None,
            _marker: PhantomData,
        };
        pool.format();

        #[cfg(feature = "logging")]
        debug!(
            base = ?pool.blocks.base(),
            len,
            first_block = pool.blocks.size(FIRST_BLOCK),
            "free-list pool created"
        );

        Ok(pool)
    }

    /// Lay out the null block, one free block spanning the pool and the end
    /// sentinel.
    fn format(&mut self) {
        let blocks = self.blocks;

        blocks.init(NULL_BLOCK, 0, false, false);
        blocks.set_next_free(NULL_BLOCK, NULL_BLOCK);
        blocks.set_prev_free_link(NULL_BLOCK, NULL_BLOCK);

        let size = blocks.len() - POOL_OVERHEAD;
        blocks.init(FIRST_BLOCK, size, true, false);
        self.insert(FIRST_BLOCK);

        let sentinel = blocks.link_next(FIRST_BLOCK);
        blocks.init(sentinel, 0, false, true);
    }

    // ========================================================================
    // Public API
    // ========================================================================

    /// Allocate at least `size` bytes, 8-byte aligned.
    ///
    /// Returns `None` when no free block is large enough or `size` exceeds
    /// [`Self::MAX_ALLOCATION`]. A zero-byte request gets a minimum block.
    pub fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let adjusted = adjust_request_size(size)?;
        let block = self.locate_free(adjusted)?;
        Some(self.prepare_used(block, adjusted))
    }

    /// Resize an allocation.
    ///
    /// - `ptr == None` behaves like [`malloc`](Self::malloc).
    /// - `size == 0` frees `ptr` and returns `None`.
    /// - Grows in place when the physical successor is free and large enough,
    ///   shrinks in place by splitting off the tail. Otherwise allocates,
    ///   copies `min(old, new)` bytes and frees the original.
    ///
    /// If the request cannot be satisfied, `None` is returned and the
    /// original allocation is left intact.
    pub fn realloc(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.malloc(size);
        };
        if size == 0 {
            self.free(ptr);
            return None;
        }

        let blocks = self.blocks;
        let block = self.checked_used_block(ptr, "realloc");
        let next = blocks.next_phys(block);
        let current = blocks.size(block);
        let combined = current + blocks.size(next) + BLOCK_HEADER_OVERHEAD;
        let adjusted = adjust_request_size(size)?;

        if adjusted > current && (!blocks.is_free(next) || adjusted > combined) {
            let moved = self.malloc(size)?;
            blocks.copy_payload(ptr, moved, current.min(size));
            self.free(ptr);
            return Some(moved);
        }

        if adjusted > current {
            self.merge_next(block);
            blocks.mark_as_used(block);
        }
        self.trim_used(block, adjusted);
        Some(ptr)
    }

    /// Return an allocation to the pool.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not a live allocation of this pool (foreign
    /// pointer, pointer into the middle of a block, or double free).
    pub fn free(&mut self, ptr: NonNull<u8>) {
        let blocks = self.blocks;
        let block = self.checked_used_block(ptr, "free");

        blocks.mark_as_free(block);
        let block = self.merge_prev(block);
        let block = self.merge_next(block);
        self.insert(block);
    }

    /// Usable payload size of a live allocation (at least what was asked).
    pub fn block_size(&self, ptr: NonNull<u8>) -> usize {
        let block = self.checked_used_block(ptr, "block_size");
        self.blocks.size(block)
    }

    /// Visit every block front to back: `(payload, size, is_used)`.
    pub fn walk(&self, mut visitor: impl FnMut(NonNull<u8>, usize, bool)) {
        let blocks = self.blocks;
        let mut block = FIRST_BLOCK;
        while !blocks.is_last(block) {
            visitor(
                blocks.payload(block),
                blocks.size(block),
                !blocks.is_free(block),
            );
            block = blocks.next_phys(block);
        }
    }

    /// Summary of used and free space.
    pub fn stats(&self) -> PoolStats {
        let mut used_bytes = 0;
        let mut used_blocks = 0;
        let mut free_bytes = 0;
        let mut free_blocks = 0;
        let mut largest = 0;

        self.walk(|_, size, used| {
            if used {
                used_bytes += size;
                used_blocks += 1;
            } else {
                free_bytes += size;
                free_blocks += 1;
                largest = largest.max(size);
            }
        });

        PoolStats {
            used_bytes,
            used_blocks,
            overhead_bytes: (used_blocks + free_blocks) * BLOCK_HEADER_OVERHEAD,
            fragmentation: FragmentationStats::calculate(free_bytes, largest, free_blocks),
        }
    }

    /// Bytes of managed memory (after base alignment).
    pub fn capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Validate the index against the physical block chain.
    ///
    /// Checks that bitmaps agree with list heads, every listed block is free
    /// and filed under its own size class, no two free blocks are adjacent,
    /// every `prev_is_free` flag matches its predecessor, and every free block
    /// is reachable from the index.
    pub fn check_integrity(&self) -> MemoryResult<()> {
        let blocks = self.blocks;
        let mut listed = 0usize;

        for fl in 0..FL_INDEX_COUNT {
            let fl_set = self.fl_bitmap & (1 << fl) != 0;
            let sl_list = self.sl_bitmap[fl];

            if !fl_set && sl_list != 0 {
                return Err(corrupt(format!(
                    "second-level bitmap of class {fl} is {sl_list:#x} with first-level bit clear"
                )));
            }
            if fl_set && sl_list == 0 {
                return Err(corrupt(format!(
                    "first-level bit {fl} set with empty second level"
                )));
            }

            for sl in 0..SL_INDEX_COUNT {
                let sl_set = sl_list & (1 << sl) != 0;
                let head = self.heads[fl][sl];

                if !sl_set {
                    if head != NULL_BLOCK {
                        return Err(corrupt(format!(
                            "bucket ({fl},{sl}) has head {head} with bitmap bit clear"
                        )));
                    }
                    continue;
                }
                if head == NULL_BLOCK {
                    return Err(corrupt(format!("bucket ({fl},{sl}) flagged but empty")));
                }

                let mut prev = NULL_BLOCK;
                let mut block = head;
                while block != NULL_BLOCK {
                    listed += 1;
                    if listed > blocks.len() / BLOCK_SIZE_MIN {
                        return Err(corrupt(format!("cycle in free list ({fl},{sl})")));
                    }
                    if !blocks.is_free(block) {
                        return Err(corrupt(format!("used block {block} in free list ({fl},{sl})")));
                    }
                    if blocks.prev_free(block) != prev {
                        return Err(corrupt(format!("broken back link at block {block}")));
                    }
                    if blocks.is_prev_free(block) {
                        return Err(corrupt(format!("free block {block} follows a free block")));
                    }
                    let size = blocks.size(block);
                    if size < BLOCK_SIZE_MIN {
                        return Err(corrupt(format!("block {block} below minimum size")));
                    }
                    if mapping_insert(size) != (fl, sl) {
                        return Err(corrupt(format!(
                            "block {block} of {size} bytes filed under ({fl},{sl})"
                        )));
                    }
                    prev = block;
                    block = blocks.next_free(block);
                }
            }
        }

        let mut physical_free = 0usize;
        let mut prev_free = false;
        let mut block = FIRST_BLOCK;
        loop {
            if !blocks.is_sealed(block) {
                return Err(corrupt(format!("header of block {block} was overwritten")));
            }
            if blocks.is_prev_free(block) != prev_free {
                return Err(corrupt(format!(
                    "prev_is_free flag of block {block} disagrees with its predecessor"
                )));
            }
            if blocks.is_last(block) {
                break;
            }
            let free = blocks.is_free(block);
            if free {
                if prev_free {
                    return Err(corrupt(format!("adjacent free blocks ending at {block}")));
                }
                physical_free += 1;
            }
            prev_free = free;
            block = blocks.next_phys(block);
        }

        if physical_free != listed {
            return Err(corrupt(format!(
                "{physical_free} free blocks in the pool but {listed} in the index"
            )));
        }

        Ok(())
    }

    // ========================================================================
    // Index maintenance
    // ========================================================================

    fn insert(&mut self, block: usize) {
        let (fl, sl) = mapping_insert(self.blocks.size(block));
        self.insert_free_block(block, fl, sl);
    }

    fn remove(&mut self, block: usize) {
        let (fl, sl) = mapping_insert(self.blocks.size(block));
        self.remove_free_block(block, fl, sl);
    }

    fn insert_free_block(&mut self, block: usize, fl: usize, sl: usize) {
        let blocks = self.blocks;
        let current = self.heads[fl][sl];
        blocks.set_next_free(block, current);
        blocks.set_prev_free_link(block, NULL_BLOCK);
        blocks.set_prev_free_link(current, block);

        self.heads[fl][sl] = block;
        self.fl_bitmap |= 1 << fl;
        self.sl_bitmap[fl] |= 1 << sl;
    }

    fn remove_free_block(&mut self, block: usize, fl: usize, sl: usize) {
        let blocks = self.blocks;
        let prev = blocks.prev_free(block);
        let next = blocks.next_free(block);
        blocks.set_prev_free_link(next, prev);
        blocks.set_next_free(prev, next);

        if self.heads[fl][sl] == block {
            self.heads[fl][sl] = next;
            if next == NULL_BLOCK {
                self.sl_bitmap[fl] &= !(1 << sl);
                if self.sl_bitmap[fl] == 0 {
                    self.fl_bitmap &= !(1 << fl);
                }
            }
        }
    }

    /// Smallest populated bucket at or above `(fl, sl)`.
    fn search_suitable_block(&self, fl: usize, sl: usize) -> Option<(usize, usize)> {
        if fl >= FL_INDEX_COUNT {
            return None;
        }

        let mut fl = fl;
        let mut sl_map = self.sl_bitmap[fl] & (u32::MAX << sl);
        if sl_map == 0 {
            let fl_map = self.fl_bitmap & u32::MAX.checked_shl(fl as u32 + 1).unwrap_or(0);
            if fl_map == 0 {
                return None;
            }
            fl = fl_map.trailing_zeros() as usize;
            sl_map = self.sl_bitmap[fl];
        }
        debug_assert!(sl_map != 0, "second level bitmap is null");
        Some((fl, sl_map.trailing_zeros() as usize))
    }

    fn locate_free(&mut self, size: usize) -> Option<usize> {
        let (fl, sl) = mapping_search(size);
        let (fl, sl) = self.search_suitable_block(fl, sl)?;
        let block = self.heads[fl][sl];
        debug_assert!(self.blocks.size(block) >= size);
        self.remove_free_block(block, fl, sl);
        Some(block)
    }

    // ========================================================================
    // Split and coalesce
    // ========================================================================

    fn merge_prev(&mut self, block: usize) -> usize {
        let blocks = self.blocks;
        if blocks.is_prev_free(block) {
            let prev = blocks.prev_phys(block);
            debug_assert!(blocks.is_free(prev), "prev block is not free though marked as such");
            self.remove(prev);
            blocks.absorb(prev, block)
        } else {
            block
        }
    }

    fn merge_next(&mut self, block: usize) -> usize {
        let blocks = self.blocks;
        let next = blocks.next_phys(block);
        if blocks.is_free(next) {
            self.remove(next);
            blocks.absorb(block, next)
        } else {
            block
        }
    }

    /// Give back the tail of a free block that is about to be used.
    fn trim_free(&mut self, block: usize, size: usize) {
        let blocks = self.blocks;
        debug_assert!(blocks.is_free(block), "block must be free");
        if blocks.can_split(block, size) {
            let remaining = blocks.split(block, size);
            blocks.link_next(block);
            blocks.set_prev_free(remaining);
            self.insert(remaining);
        }
    }

    /// Give back the tail of a used block.
    fn trim_used(&mut self, block: usize, size: usize) {
        let blocks = self.blocks;
        debug_assert!(!blocks.is_free(block), "block must be used");
        if blocks.can_split(block, size) {
            let remaining = blocks.split(block, size);
            blocks.set_prev_used(remaining);
            let remaining = self.merge_next(remaining);
            self.insert(remaining);
        }
    }

    fn prepare_used(&mut self, block: usize, size: usize) -> NonNull<u8> {
        self.trim_free(block, size);
        self.blocks.mark_as_used(block);
        self.blocks.payload(block)
    }

    /// Resolve a payload pointer to its used block or panic.
    fn checked_used_block(&self, ptr: NonNull<u8>, op: &str) -> usize {
        let blocks = self.blocks;
        let Some(block) = blocks.block_of(ptr) else {
            panic!("{op}: pointer {ptr:p} does not belong to this pool");
        };
        if !blocks.is_sealed(block) {
            panic!("{op}: pointer {ptr:p} is not at a block boundary");
        }
        if blocks.is_free(block) {
            panic!("{op}: pointer {ptr:p} is not allocated (double free?)");
        }
        let size = blocks.size(block);
        if size < BLOCK_SIZE_MIN
            || size % ALIGN_SIZE != 0
            || block + BLOCK_HEADER_OVERHEAD + size >= blocks.len()
        {
            panic!("{op}: pointer {ptr:p} is not at a block boundary");
        }
        block
    }
}

impl Pool<'static> {
    /// Create a pool that owns `len` bytes from the global allocator.
    pub fn with_capacity(len: usize) -> MemoryResult<Self> {
        if !(Self::MIN_POOL_SIZE..=Self::MAX_POOL_SIZE).contains(&len) {
            return Err(MemoryError::invalid_pool_size(
                len,
                Self::MIN_POOL_SIZE,
                Self::MAX_POOL_SIZE,
            ));
        }
        let layout = Layout::from_size_align(len, ALIGN_SIZE)
            .map_err(|_| MemoryError::invalid_pool_size(len, Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE))?;

        // SAFETY: layout has non-zero size (len >= MIN_POOL_SIZE). Zeroed so
        // header checks on stray pointers never read uninitialized memory.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };

        // SAFETY: freshly allocated, exclusively owned until Drop
        match unsafe { Self::from_raw_parts(ptr, len) } {
            Ok(mut pool) => {
                pool.owned = Some((ptr, layout));
                Ok(pool)
            }
            Err(e) => {
                // SAFETY: allocated above with this layout
                unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
                Err(e)
            }
        }
    }

    /// Create an owned pool sized by configuration.
    pub fn from_config(config: &crate::core::config::FreeListConfig) -> MemoryResult<Self> {
        config.validate()?;
        Self::with_capacity(config.pool_size)
    }
}

impl Drop for Pool<'_> {
    fn drop(&mut self) {
        if let Some((ptr, layout)) = self.owned.take() {
            // SAFETY: allocated in with_capacity with this layout
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

impl MemoryUsage for Pool<'_> {
    fn used_memory(&self) -> usize {
        let stats = self.stats();
        stats.used_bytes + stats.overhead_bytes
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.capacity() - self.used_memory())
    }
}

// SAFETY: payloads are 8-aligned, in bounds, and handed out at most once
// until freed.
unsafe impl Allocator for Pool<'_> {
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.malloc(size)
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        _old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        if new_size == 0 {
            // Keep the Allocator contract: a zero-size resize still hands
            // back a live allocation.
            return self.realloc(Some(ptr), ALIGN_SIZE);
        }
        self.realloc(Some(ptr), new_size)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, _size: usize) {
        self.free(ptr);
    }
}

/// Round a request to the allocation granularity and minimum block size.
fn adjust_request_size(size: usize) -> Option<usize> {
    if size >= BLOCK_SIZE_MAX {
        return None;
    }
    Some(align_up(size, ALIGN_SIZE).max(BLOCK_SIZE_MIN))
}

fn corrupt(details: String) -> MemoryError {
    MemoryError::corruption("free-list pool", &details)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(len: usize) -> Pool<'static> {
        Pool::with_capacity(len).unwrap()
    }

    #[test]
    fn fresh_pool_is_one_free_block() {
        let pool = pool(4096);
        let mut seen = Vec::new();
        pool.walk(|_, size, used| seen.push((size, used)));
        assert_eq!(seen, vec![(4096 - POOL_OVERHEAD, false)]);
        pool.check_integrity().unwrap();
    }

    #[test]
    fn too_small_is_rejected() {
        let err = Pool::with_capacity(Pool::MIN_POOL_SIZE - 8).unwrap_err();
        assert_eq!(err.code(), "MEM:POOL:SIZE");
        assert!(Pool::with_capacity(Pool::MIN_POOL_SIZE).is_ok());
    }

    #[test]
    fn minimum_pool_serves_one_minimum_block() {
        let mut pool = pool(Pool::MIN_POOL_SIZE);
        let p = pool.malloc(1).unwrap();
        assert!(pool.malloc(1).is_none());
        pool.free(p);
        pool.check_integrity().unwrap();
    }

    #[test]
    fn unaligned_slice_is_aligned_up() {
        let mut backing = vec![0u64; 128];
        // SAFETY: 3 + 1000 bytes lie inside the 1024-byte buffer
        let bytes: &mut [u8] = unsafe {
            core::slice::from_raw_parts_mut(backing.as_mut_ptr().cast::<u8>().add(3), 1000)
        };
        let mut pool = Pool::new(bytes).unwrap();
        assert_eq!(pool.capacity(), align_down(1000 - 5, 8));
        let p = pool.malloc(10).unwrap();
        assert_eq!(p.as_ptr() as usize % 8, 0);
        pool.free(p);
    }

    #[test]
    fn split_leaves_remainder_in_index() {
        let mut pool = pool(4096);
        let p = pool.malloc(100).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.used_blocks, 1);
        assert_eq!(stats.used_bytes, 104);
        assert_eq!(stats.free_blocks(), 1);
        pool.check_integrity().unwrap();
        pool.free(p);
        assert_eq!(pool.stats().free_blocks(), 1);
    }

    #[test]
    fn free_coalesces_both_sides() {
        let mut pool = pool(4096);
        let a = pool.malloc(64).unwrap();
        let b = pool.malloc(64).unwrap();
        let c = pool.malloc(64).unwrap();
        let guard = pool.malloc(64).unwrap();

        pool.free(a);
        pool.free(c);
        assert_eq!(pool.stats().free_blocks(), 3);
        pool.free(b);
        // a+b+c merged, plus the tail after `guard`
        assert_eq!(pool.stats().free_blocks(), 2);
        pool.check_integrity().unwrap();
        pool.free(guard);
        assert_eq!(pool.stats().free_blocks(), 1);
    }

    #[test]
    fn realloc_grows_in_place_into_free_successor() {
        let mut pool = pool(4096);
        let a = pool.malloc(32).unwrap();
        let grown = pool.realloc(Some(a), 512).unwrap();
        assert_eq!(grown, a);
        assert!(pool.block_size(a) >= 512);
        pool.check_integrity().unwrap();
    }

    #[test]
    fn realloc_moves_and_copies_when_blocked() {
        let mut pool = pool(4096);
        let a = pool.malloc(32).unwrap();
        let _b = pool.malloc(32).unwrap();
        // SAFETY: a is a live 32-byte allocation
        unsafe { a.as_ptr().copy_from_nonoverlapping(b"0123456789abcdef".as_ptr(), 16) };

        let moved = pool.realloc(Some(a), 256).unwrap();
        assert_ne!(moved, a);
        // SAFETY: moved holds at least 256 bytes, the first 16 copied
        let head = unsafe { core::slice::from_raw_parts(moved.as_ptr(), 16) };
        assert_eq!(head, b"0123456789abcdef");
        pool.check_integrity().unwrap();
    }

    #[test]
    fn realloc_shrink_returns_tail() {
        let mut pool = pool(4096);
        let a = pool.malloc(1024).unwrap();
        let _b = pool.malloc(64).unwrap();
        let before = pool.stats().free_bytes();
        assert_eq!(pool.realloc(Some(a), 64), Some(a));
        assert!(pool.stats().free_bytes() > before);
        pool.check_integrity().unwrap();
    }

    #[test]
    fn realloc_failure_keeps_original() {
        let mut pool = pool(1024);
        let a = pool.malloc(64).unwrap();
        assert!(pool.realloc(Some(a), 1 << 20).is_none());
        assert_eq!(pool.block_size(a), 64);
        pool.free(a);
    }

    #[test]
    fn realloc_edge_cases() {
        let mut pool = pool(4096);
        let a = pool.realloc(None, 40).unwrap();
        assert!(pool.realloc(Some(a), 0).is_none());
        assert_eq!(pool.stats().used_blocks, 0);
    }

    #[test]
    fn oversized_request_returns_none() {
        let mut pool = pool(4096);
        assert!(pool.malloc(8192).is_none());
        assert!(pool.malloc(usize::MAX).is_none());
        pool.check_integrity().unwrap();
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mut pool = pool(4096);
        let a = pool.malloc(64).unwrap();
        let _b = pool.malloc(64).unwrap();
        pool.free(a);
        pool.free(a);
    }

    #[test]
    #[should_panic(expected = "does not belong")]
    fn foreign_pointer_panics() {
        let mut pool = pool(4096);
        let mut other = 0u64;
        pool.free(NonNull::from(&mut other).cast());
    }

    #[test]
    #[should_panic(expected = "block boundary")]
    fn interior_pointer_panics() {
        let mut pool = pool(4096);
        let a = pool.malloc(256).unwrap();
        // SAFETY: in bounds of the 256-byte allocation
        let inner = unsafe { NonNull::new_unchecked(a.as_ptr().add(64)) };
        pool.free(inner);
    }

    #[test]
    fn unmerged_neighbours_are_reported() {
        let mut pool = pool(4096);
        let a = pool.malloc(64).unwrap();
        let b = pool.malloc(64).unwrap();
        let _c = pool.malloc(64).unwrap();
        pool.free(a);

        // Flag b free behind the allocator's back so it sits next to a.
        let block = pool.blocks.block_of(b).unwrap();
        pool.blocks.mark_as_free(block);

        let err = pool.check_integrity().unwrap_err();
        assert!(err.to_string().contains("adjacent free blocks"), "{err}");
    }

    #[test]
    fn overwritten_header_is_reported() {
        let mut pool = pool(4096);
        let a = pool.malloc(64).unwrap();
        let _b = pool.malloc(64).unwrap();
        // SAFETY: b's size word sits 64 bytes past a's payload, inside the pool
        unsafe { a.as_ptr().add(64).cast::<u64>().write(64) };

        let err = pool.check_integrity().unwrap_err();
        assert!(err.to_string().contains("was overwritten"), "{err}");
    }

    #[test]
    fn corrupted_bitmap_is_reported() {
        let mut pool = pool(4096);
        pool.fl_bitmap |= 1 << 3;
        let err = pool.check_integrity().unwrap_err();
        assert_eq!(err.code(), "MEM:SYSTEM:CORRUPTION");
    }
}
