//! RAII helper for scoped arena allocations

use core::ptr::NonNull;

use super::VirtualArena;
use crate::syscalls::VirtualMemory;

/// RAII guard that rewinds a [`VirtualArena`] to a saved mark on drop.
///
/// # Examples
///
/// ```
/// use strata_memory::arena::{ArenaGuard, VirtualArena};
///
/// let mut arena = VirtualArena::new(1 << 20)?;
/// arena.alloc(64);
///
/// {
///     let mut guard = ArenaGuard::new(&mut arena);
///     guard.alloc(4096);
///     // scratch space is reclaimed when the guard drops
/// }
///
/// assert_eq!(arena.used(), 64);
/// # Ok::<(), strata_memory::MemoryError>(())
/// ```
#[must_use = "ArenaGuard does nothing unless held"]
pub struct ArenaGuard<'a, V: VirtualMemory> {
    arena: &'a mut VirtualArena<V>,
    mark: u64,
    active: bool,
}

impl<'a, V: VirtualMemory> ArenaGuard<'a, V> {
    /// Creates a guard that will reset to the current mark on drop
    pub fn new(arena: &'a mut VirtualArena<V>) -> Self {
        let mark = arena.mark();
        Self {
            arena,
            mark,
            active: true,
        }
    }

    /// Allocate from the guarded arena
    pub fn alloc(&mut self, size: usize) -> NonNull<u8> {
        self.arena.alloc(size)
    }

    /// Rewind now instead of on drop
    ///
    /// After calling this, the guard will not reset again on drop.
    pub fn reset(&mut self) {
        if self.active {
            self.arena.reset(self.mark);
            self.active = false;
        }
    }

    /// Keep everything allocated under the guard
    pub fn leak(mut self) {
        self.active = false;
    }

    /// The saved mark
    #[must_use]
    pub fn mark(&self) -> u64 {
        self.mark
    }

    /// Returns a mutable reference to the arena
    pub fn arena_mut(&mut self) -> &mut VirtualArena<V> {
        self.arena
    }
}

impl<V: VirtualMemory> Drop for ArenaGuard<'_, V> {
    fn drop(&mut self) {
        if self.active {
            self.arena.reset(self.mark);
        }
    }
}
