//! Virtual-memory arenas
//!
//! [`VirtualArena`] reserves one address range up front and commits pages
//! lazily as a bump cursor advances through it. Because the range never
//! moves, pointers stay valid until the arena is reset or dropped, and the
//! most recent allocation can grow in place with [`VirtualArena::extend`].
//!
//! [`TempAllocator`] strings independently reserved chunks together for
//! scratch memory that is thrown away wholesale with [`TempAllocator::reset`].
//!
//! # Examples
//!
//! ```
//! use strata_memory::arena::VirtualArena;
//!
//! let mut arena = VirtualArena::new(1 << 20)?;
//! let mark = arena.mark();
//! let a = arena.alloc(100);
//! assert!(arena.extend(a, 100, 200));
//! arena.reset(mark);
//! assert_eq!(arena.used(), 0);
//! # Ok::<(), strata_memory::MemoryError>(())
//! ```

mod scope;
mod temp;

pub use scope::ArenaGuard;
pub use temp::{TempAllocator, TempStats};

use core::ptr::NonNull;

use crate::allocator::Allocator;
use crate::core::config::ArenaConfig;
use crate::core::traits::{MemoryUsage, Resettable};
use crate::error::{MemoryError, MemoryResult};
use crate::syscalls::{SystemVirtualMemory, VirtualMemory};
use crate::utils::{align_down, align_up, checked_align_up};

#[cfg(feature = "logging")]
use strata_log::trace;

/// Bump allocator over a single reserved, incrementally committed range.
///
/// Offsets satisfy `0 <= used <= committed <= reserved` at all times. The
/// bump cursor only moves backwards through [`reset`](Self::reset) or when
/// [`extend`](Self::extend) shrinks the newest allocation.
pub struct VirtualArena<V: VirtualMemory = SystemVirtualMemory> {
    vm: V,
    begin: NonNull<u8>,
    /// Bump cursor
    end: usize,
    /// Bytes from `begin` backed by committed pages
    committed: usize,
    /// Bytes of address space owned by this arena
    reserved: usize,
    commit_floor: usize,
    alignment: usize,
}

// SAFETY: the arena exclusively owns its reservation; V decides the rest.
unsafe impl<V: VirtualMemory + Send> Send for VirtualArena<V> {}

impl<V: VirtualMemory> core::fmt::Debug for VirtualArena<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VirtualArena")
            .field("begin", &self.begin)
            .field("used", &self.end)
            .field("committed", &self.committed)
            .field("reserved", &self.reserved)
            .finish_non_exhaustive()
    }
}

impl VirtualArena<SystemVirtualMemory> {
    /// Reserve `reserve_size` bytes (rounded up to the page size) from the OS.
    ///
    /// Nothing is committed until the first allocation.
    pub fn new(reserve_size: usize) -> MemoryResult<Self> {
        Self::with_config(ArenaConfig::with_reserve(reserve_size), SystemVirtualMemory::new())
    }
}

impl<V: VirtualMemory> VirtualArena<V> {
    /// Create an arena from configuration over the given provider.
    pub fn with_config(config: ArenaConfig, vm: V) -> MemoryResult<Self> {
        config.validate()?;
        let page = vm.page_size();
        let reserved = checked_align_up(config.reserve_size, page)
            .ok_or_else(|| MemoryError::invalid_config("reserve_size overflows when page aligned"))?;
        let begin = vm.reserve(reserved)?;

        #[cfg(feature = "logging")]
        trace!(?begin, reserved, "arena reserved");

        Ok(Self {
            vm,
            begin,
            end: 0,
            committed: 0,
            reserved,
            commit_floor: config.commit_floor,
            alignment: config.alignment,
        })
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Bump-allocate `size` bytes (rounded up to the arena alignment; a
    /// zero-byte request still takes one aligned unit).
    ///
    /// # Panics
    ///
    /// Panics when the reservation cannot hold the request or the provider
    /// refuses to commit. Use [`try_alloc`](Self::try_alloc) to observe
    /// those as errors.
    pub fn alloc(&mut self, size: usize) -> NonNull<u8> {
        match self.try_alloc(size) {
            Ok(ptr) => ptr,
            Err(e) => panic!("virtual arena allocation of {size} bytes failed: {e}"),
        }
    }

    /// Fallible form of [`alloc`](Self::alloc).
    pub fn try_alloc(&mut self, size: usize) -> MemoryResult<NonNull<u8>> {
        let size = checked_align_up(size.max(1), self.alignment)
            .ok_or_else(|| MemoryError::arena_exhausted(size, self.remaining()))?;
        let new_end = self
            .end
            .checked_add(size)
            .filter(|&e| e <= self.reserved)
            .ok_or_else(|| MemoryError::arena_exhausted(size, self.remaining()))?;

        self.ensure_committed(new_end)?;

        let ptr = self.ptr_at(self.end);
        self.end = new_end;
        Ok(ptr)
    }

    /// Resize the most recent allocation in place.
    ///
    /// Succeeds only when `ptr` is the newest allocation of `old_size` bytes;
    /// the cursor is rewound to `ptr` and re-advanced by `new_size`, growing
    /// the commit if needed. Returns `false` (and changes nothing) otherwise.
    pub fn extend(&mut self, ptr: NonNull<u8>, old_size: usize, new_size: usize) -> bool {
        let Some(old) = checked_align_up(old_size.max(1), self.alignment) else {
            return false;
        };
        let Some(start) = self.end.checked_sub(old) else {
            return false;
        };
        if ptr != self.ptr_at(start) {
            return false;
        }
        let Some(new_end) = checked_align_up(new_size.max(1), self.alignment)
            .and_then(|n| start.checked_add(n))
            .filter(|&e| e <= self.reserved)
        else {
            return false;
        };
        if self.ensure_committed(new_end).is_err() {
            return false;
        }
        self.end = new_end;
        true
    }

    /// Checkpoint of the bump cursor.
    pub fn mark(&self) -> u64 {
        self.end as u64
    }

    /// Roll the cursor back (or forward) to a checkpoint.
    ///
    /// Everything allocated after the mark is invalidated. Committed pages
    /// are kept for reuse; see [`trim`](Self::trim).
    ///
    /// # Panics
    ///
    /// Panics if `mark` lies beyond the committed region.
    pub fn reset(&mut self, mark: u64) {
        assert!(
            mark <= self.committed as u64,
            "arena mark {mark} is beyond the committed size {}",
            self.committed
        );
        self.end = mark as usize;
    }

    /// Decommit whole pages above the cursor, keeping at least the commit
    /// floor. Returns the number of bytes given back.
    pub fn trim(&mut self) -> MemoryResult<usize> {
        let page = self.vm.page_size();
        let keep = align_up(self.end.max(self.commit_floor), page).min(self.committed);
        if keep >= self.committed {
            return Ok(0);
        }
        let released = self.committed - keep;
        // SAFETY: [keep, committed) is page aligned and inside our reservation;
        // nothing live sits above the cursor.
        unsafe { self.vm.decommit(self.ptr_at(keep), released)? };
        self.committed = keep;

        #[cfg(feature = "logging")]
        trace!(released, committed = self.committed, "arena trimmed");

        Ok(released)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Bytes handed out since creation or the last reset.
    pub fn used(&self) -> usize {
        self.end
    }

    /// Bytes backed by committed pages.
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Bytes of reserved address space.
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Bytes still available before the reservation is exhausted.
    pub fn remaining(&self) -> usize {
        self.reserved - self.end
    }

    /// Whether `ptr` points into the handed-out part of the arena.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        let begin = self.begin.as_ptr() as usize;
        addr >= begin && addr < begin + self.end
    }

    /// The virtual-memory provider.
    pub fn provider(&self) -> &V {
        &self.vm
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.reserved);
        // SAFETY: offset lies within the reservation
        unsafe { NonNull::new_unchecked(self.begin.as_ptr().add(offset)) }
    }

    /// Grow the commit so `[0, required)` is backed, in one provider call.
    ///
    /// The new committed size doubles from the current one (at least the
    /// commit floor) until it covers `required`, then is rounded to the page
    /// size and clamped to the reservation.
    fn ensure_committed(&mut self, required: usize) -> MemoryResult<()> {
        if required <= self.committed {
            return Ok(());
        }

        let page = self.vm.page_size();
        let mut target = self.committed.max(self.commit_floor);
        while target < required {
            target = target.saturating_mul(2);
        }
        let target = align_up(target.min(align_down(usize::MAX, page)), page).min(self.reserved);
        debug_assert!(target >= required);

        let grow = target - self.committed;
        // SAFETY: [committed, target) is page aligned and inside the reservation
        unsafe { self.vm.commit(self.ptr_at(self.committed), grow)? };

        #[cfg(feature = "logging")]
        trace!(from = self.committed, to = target, "arena commit grown");

        self.committed = target;
        Ok(())
    }
}

impl<V: VirtualMemory> Drop for VirtualArena<V> {
    fn drop(&mut self) {
        // SAFETY: begin/reserved are exactly what reserve returned and requested
        unsafe { self.vm.release(self.begin, self.reserved) };
    }
}

impl<V: VirtualMemory> MemoryUsage for VirtualArena<V> {
    fn used_memory(&self) -> usize {
        self.end
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.remaining())
    }
}

impl<V: VirtualMemory> Resettable for VirtualArena<V> {
    fn reset_all(&mut self) {
        self.end = 0;
    }
}

// SAFETY: pointers come from disjoint ranges of the bump cursor and are
// aligned to at least 8 (validated in ArenaConfig).
unsafe impl<V: VirtualMemory> Allocator for VirtualArena<V> {
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        Some(self.alloc(size))
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        if self.extend(ptr, old_size, new_size) {
            return Some(ptr);
        }
        let moved = self.try_alloc(new_size).ok()?;
        // SAFETY: both ranges are live arena allocations of at least the copied length
        unsafe { core::ptr::copy_nonoverlapping(ptr.as_ptr(), moved.as_ptr(), old_size.min(new_size)) };
        Some(moved)
    }

    /// Arenas release memory only through `reset`.
    unsafe fn deallocate(&mut self, _ptr: NonNull<u8>, _size: usize) {}
}
