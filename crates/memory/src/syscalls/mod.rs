//! Virtual-memory providers for the arenas
//!
//! The arenas never talk to the OS directly. They go through the
//! [`VirtualMemory`] trait so that targets without virtual memory (and tests
//! that want to observe commit traffic) can substitute their own provider.
//!
//! - **direct.rs** - [`SystemVirtualMemory`]: mmap / VirtualAlloc wrappers
//! - **heap.rs** - [`HeapVirtualMemory`]: global-allocator fallback
//! - **info.rs** - page size query
//!
//! # Safety
//!
//! `commit`, `decommit` and `release` take raw ranges and are `unsafe`: the
//! range must lie inside a reservation obtained from the same provider.

use core::ptr::NonNull;

use crate::error::MemoryResult;

mod direct;
mod heap;
mod info;

pub use direct::SystemVirtualMemory;
pub use heap::HeapVirtualMemory;
pub use info::get_page_size;

/// Reserve/commit interface to an address-space provider.
///
/// Sizes handed to every method are multiples of [`page_size`](Self::page_size)
/// and pointers are page aligned; callers round before calling.
pub trait VirtualMemory {
    /// Commit granularity in bytes (a power of two)
    fn page_size(&self) -> usize;

    /// Reserve `size` bytes of address space without backing it.
    fn reserve(&self, size: usize) -> MemoryResult<NonNull<u8>>;

    /// Back `[ptr, ptr + size)` with readable and writable memory.
    ///
    /// # Safety
    ///
    /// The range must lie inside a live reservation from this provider.
    unsafe fn commit(&self, ptr: NonNull<u8>, size: usize) -> MemoryResult<()>;

    /// Return the physical pages of `[ptr, ptr + size)` to the OS while
    /// keeping the address range reserved.
    ///
    /// # Safety
    ///
    /// The range must lie inside a live reservation from this provider and
    /// nothing may reference its contents afterwards.
    unsafe fn decommit(&self, ptr: NonNull<u8>, size: usize) -> MemoryResult<()>;

    /// Release a whole reservation.
    ///
    /// # Safety
    ///
    /// `ptr` and `size` must be exactly what an earlier `reserve` returned
    /// and requested, and the reservation must not be used again.
    unsafe fn release(&self, ptr: NonNull<u8>, size: usize);
}

impl<V: VirtualMemory + ?Sized> VirtualMemory for &V {
    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn reserve(&self, size: usize) -> MemoryResult<NonNull<u8>> {
        (**self).reserve(size)
    }

    unsafe fn commit(&self, ptr: NonNull<u8>, size: usize) -> MemoryResult<()> {
        // SAFETY: forwarded contract
        unsafe { (**self).commit(ptr, size) }
    }

    unsafe fn decommit(&self, ptr: NonNull<u8>, size: usize) -> MemoryResult<()> {
        // SAFETY: forwarded contract
        unsafe { (**self).decommit(ptr, size) }
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded contract
        unsafe { (**self).release(ptr, size) }
    }
}
