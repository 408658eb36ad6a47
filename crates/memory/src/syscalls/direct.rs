//! Direct system call wrappers for reserve/commit
//!
//! # Safety
//!
//! All functions in this module perform unsafe FFI calls to OS primitives:
//! - **Unix**: libc functions (mmap, mprotect, madvise, munmap)
//! - **Windows**: `WinAPI` functions (`VirtualAlloc`, `VirtualFree`)
//! - **Fallback**: [`HeapVirtualMemory`] on everything else
//!
//! The OS validates parameters and returns errors for invalid inputs, but
//! callers remain responsible for only touching committed ranges.

use core::ptr::NonNull;
use std::io;

use super::VirtualMemory;
#[cfg(not(any(unix, windows)))]
use super::HeapVirtualMemory;
use super::info::get_page_size;
use crate::error::{MemoryError, MemoryResult};

/// Virtual memory straight from the operating system.
///
/// Reservations are inaccessible address ranges; commits make sub-ranges
/// readable and writable. Zero-sized: every arena can own its own copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemVirtualMemory;

impl SystemVirtualMemory {
    /// Create the provider
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl VirtualMemory for SystemVirtualMemory {
    fn page_size(&self) -> usize {
        get_page_size()
    }

    fn reserve(&self, size: usize) -> MemoryResult<NonNull<u8>> {
        let ptr = reserve_range(size).map_err(|e| MemoryError::virtual_memory("reserve", size, &e))?;
        NonNull::new(ptr).ok_or_else(|| {
            MemoryError::virtual_memory("reserve", size, &io::Error::from(io::ErrorKind::OutOfMemory))
        })
    }

    unsafe fn commit(&self, ptr: NonNull<u8>, size: usize) -> MemoryResult<()> {
        // SAFETY: caller guarantees the range is inside one of our reservations
        unsafe { commit_range(ptr.as_ptr(), size) }
            .map_err(|e| MemoryError::virtual_memory("commit", size, &e))
    }

    unsafe fn decommit(&self, ptr: NonNull<u8>, size: usize) -> MemoryResult<()> {
        // SAFETY: caller guarantees the range is inside one of our reservations
        unsafe { decommit_range(ptr.as_ptr(), size) }
            .map_err(|e| MemoryError::virtual_memory("decommit", size, &e))
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: caller passes back an untouched reservation
        let result = unsafe { release_range(ptr.as_ptr(), size) };
        debug_assert!(result.is_ok(), "releasing reservation failed: {result:?}");
    }
}

// ============================================================================
// Platform back ends
// ============================================================================

#[cfg(unix)]
fn reserve_range(size: usize) -> io::Result<*mut u8> {
    use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_NONE, mmap};

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let flags = MAP_PRIVATE | MAP_ANONYMOUS | libc::MAP_NORESERVE;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let flags = MAP_PRIVATE | MAP_ANONYMOUS;

    // SAFETY: FFI call to libc mmap. We pass:
    // - addr: null, the OS picks the placement
    // - prot: PROT_NONE so nothing is backed until commit
    // - fd=-1, offset=0: anonymous mapping (no file)
    // OS validates all parameters and returns MAP_FAILED on error.
    let ptr = unsafe { mmap(core::ptr::null_mut(), size, PROT_NONE, flags, -1, 0) };

    if ptr == MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(ptr.cast::<u8>())
    }
}

#[cfg(unix)]
unsafe fn commit_range(ptr: *mut u8, size: usize) -> io::Result<()> {
    use libc::{PROT_READ, PROT_WRITE, mprotect};

    // SAFETY: FFI call to libc mprotect on a page-aligned range the caller
    // guarantees is inside a live reservation.
    let result = unsafe { mprotect(ptr.cast::<libc::c_void>(), size, PROT_READ | PROT_WRITE) };

    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
unsafe fn decommit_range(ptr: *mut u8, size: usize) -> io::Result<()> {
    use libc::{MADV_DONTNEED, PROT_NONE, madvise, mprotect};

    // SAFETY: FFI calls on a page-aligned range inside a live reservation.
    // MADV_DONTNEED drops the pages; PROT_NONE makes stray accesses fault.
    unsafe {
        if madvise(ptr.cast::<libc::c_void>(), size, MADV_DONTNEED) != 0 {
            return Err(io::Error::last_os_error());
        }
        if mprotect(ptr.cast::<libc::c_void>(), size, PROT_NONE) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(unix)]
unsafe fn release_range(ptr: *mut u8, size: usize) -> io::Result<()> {
    // SAFETY: FFI call to libc munmap with the exact mapping from reserve.
    let result = unsafe { libc::munmap(ptr.cast::<libc::c_void>(), size) };

    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(windows)]
fn reserve_range(size: usize) -> io::Result<*mut u8> {
    use winapi::um::memoryapi::VirtualAlloc;
    use winapi::um::winnt::{MEM_RESERVE, PAGE_NOACCESS};

    // SAFETY: FFI call to Windows VirtualAlloc. We pass:
    // - addr: null (OS chooses)
    // - MEM_RESERVE | PAGE_NOACCESS: address space only, nothing backed
    // OS validates parameters and returns null on error.
    let ptr = unsafe { VirtualAlloc(core::ptr::null_mut(), size, MEM_RESERVE, PAGE_NOACCESS) };

    if ptr.is_null() {
        Err(io::Error::last_os_error())
    } else {
        Ok(ptr.cast::<u8>())
    }
}

#[cfg(windows)]
unsafe fn commit_range(ptr: *mut u8, size: usize) -> io::Result<()> {
    use winapi::um::memoryapi::VirtualAlloc;
    use winapi::um::winnt::{MEM_COMMIT, PAGE_READWRITE};

    // SAFETY: FFI call to VirtualAlloc(MEM_COMMIT) on a sub-range of a live
    // reservation, as guaranteed by the caller.
    let result = unsafe {
        VirtualAlloc(
            ptr.cast::<winapi::ctypes::c_void>(),
            size,
            MEM_COMMIT,
            PAGE_READWRITE,
        )
    };

    if result.is_null() {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(windows)]
unsafe fn decommit_range(ptr: *mut u8, size: usize) -> io::Result<()> {
    use winapi::um::memoryapi::VirtualFree;
    use winapi::um::winnt::MEM_DECOMMIT;

    // SAFETY: FFI call to VirtualFree(MEM_DECOMMIT) on a committed sub-range.
    let result = unsafe { VirtualFree(ptr.cast::<winapi::ctypes::c_void>(), size, MEM_DECOMMIT) };

    if result == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(windows)]
unsafe fn release_range(ptr: *mut u8, _size: usize) -> io::Result<()> {
    use winapi::um::memoryapi::VirtualFree;
    use winapi::um::winnt::MEM_RELEASE;

    // SAFETY: FFI call to VirtualFree(MEM_RELEASE). Size must be 0 and ptr
    // the base returned by VirtualAlloc(MEM_RESERVE).
    let result = unsafe { VirtualFree(ptr.cast::<winapi::ctypes::c_void>(), 0, MEM_RELEASE) };

    if result == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(any(unix, windows)))]
fn reserve_range(size: usize) -> io::Result<*mut u8> {
    HeapVirtualMemory::new()
        .reserve(size)
        .map(NonNull::as_ptr)
        .map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))
}

#[cfg(not(any(unix, windows)))]
unsafe fn commit_range(_ptr: *mut u8, _size: usize) -> io::Result<()> {
    Ok(())
}

#[cfg(not(any(unix, windows)))]
unsafe fn decommit_range(_ptr: *mut u8, _size: usize) -> io::Result<()> {
    Ok(())
}

#[cfg(not(any(unix, windows)))]
unsafe fn release_range(ptr: *mut u8, size: usize) -> io::Result<()> {
    if let Some(ptr) = NonNull::new(ptr) {
        // SAFETY: the range came from the heap fallback in reserve_range
        unsafe { HeapVirtualMemory::new().release(ptr, size) };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_commit_write_release() {
        let vm = SystemVirtualMemory::new();
        let page = vm.page_size();
        let ptr = vm.reserve(page * 4).unwrap();

        // SAFETY: first page of our own reservation
        unsafe {
            vm.commit(ptr, page).unwrap();
            ptr.as_ptr().write_bytes(0xAB, page);
            assert_eq!(*ptr.as_ptr().add(page - 1), 0xAB);
            vm.decommit(ptr, page).unwrap();
            vm.release(ptr, page * 4);
        }
    }
}
