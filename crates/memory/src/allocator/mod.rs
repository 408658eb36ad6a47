//! Allocation sources
//!
//! [`Allocator`] is the seam the scope registry sits on: anything that can
//! hand out, resize and take back 8-aligned byte ranges. The free-list
//! [`Pool`](freelist::Pool), the [`VirtualArena`](crate::arena::VirtualArena)
//! and the [`TempAllocator`](crate::arena::TempAllocator) all implement it.

use core::ptr::NonNull;

pub mod freelist;
pub mod stats;

pub use freelist::Pool;
pub use stats::{FragmentationStats, PoolStats};

/// A source of raw, 8-byte aligned memory.
///
/// Sizes passed to `reallocate` and `deallocate` are the sizes the caller
/// last requested for that pointer.
///
/// # Safety
///
/// Implementors must return pointers that are aligned to at least 8 bytes,
/// valid for reads and writes of the requested size, and not aliased by any
/// other live allocation from the same source.
pub unsafe trait Allocator {
    /// Allocate `size` bytes. `None` means the source is exhausted.
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// Resize an allocation, moving it if needed.
    ///
    /// On `None` the original allocation is untouched and still owned by the
    /// caller.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation from this source of `old_size` bytes.
    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>>;

    /// Return an allocation to the source.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation from this source of `size` bytes and
    /// must not be used afterwards.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize);
}

// SAFETY: forwards to the underlying allocator
unsafe impl<A: Allocator + ?Sized> Allocator for &mut A {
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        (**self).allocate(size)
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded contract
        unsafe { (**self).reallocate(ptr, old_size, new_size) }
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded contract
        unsafe { (**self).deallocate(ptr, size) }
    }
}

// SAFETY: forwards to the boxed allocator
unsafe impl<A: Allocator + ?Sized> Allocator for Box<A> {
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        (**self).allocate(size)
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded contract
        unsafe { (**self).reallocate(ptr, old_size, new_size) }
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded contract
        unsafe { (**self).deallocate(ptr, size) }
    }
}
