//! Global-allocator fallback provider.

use core::ptr::NonNull;
use std::alloc::{self, Layout};

use super::VirtualMemory;
use super::info::get_page_size;
use crate::error::{MemoryError, MemoryResult};

/// "Virtual" memory carved from the global allocator.
///
/// The whole reservation is allocated (zeroed) up front, commit and
/// decommit are no-ops. Suitable for targets without an MMU story and for
/// tests that wrap a provider to observe calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapVirtualMemory;

impl HeapVirtualMemory {
    /// Create the provider
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn layout(size: usize) -> MemoryResult<Layout> {
        Layout::from_size_align(size.max(1), get_page_size())
            .map_err(|_| MemoryError::invalid_config(&format!("reservation of {size} bytes")))
    }
}

impl VirtualMemory for HeapVirtualMemory {
    fn page_size(&self) -> usize {
        get_page_size()
    }

    fn reserve(&self, size: usize) -> MemoryResult<NonNull<u8>> {
        let layout = Self::layout(size)?;
        // SAFETY: layout has non-zero size
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or_else(|| {
            MemoryError::virtual_memory(
                "reserve",
                size,
                &std::io::Error::from(std::io::ErrorKind::OutOfMemory),
            )
        })
    }

    unsafe fn commit(&self, _ptr: NonNull<u8>, _size: usize) -> MemoryResult<()> {
        Ok(())
    }

    unsafe fn decommit(&self, _ptr: NonNull<u8>, _size: usize) -> MemoryResult<()> {
        Ok(())
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        if let Ok(layout) = Self::layout(size) {
            // SAFETY: ptr was returned by reserve with this exact layout
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}
