//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

use strata_memory::MemoryResult;
use strata_memory::syscalls::{HeapVirtualMemory, VirtualMemory};

/// Heap-backed provider with 4 KiB pages that records every call.
#[derive(Debug, Default)]
pub struct CountingVm {
    inner: HeapVirtualMemory,
    pub reserves: RefCell<Vec<usize>>,
    pub commits: RefCell<Vec<usize>>,
    pub decommits: RefCell<Vec<usize>>,
    pub releases: Cell<usize>,
}

impl CountingVm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> Vec<usize> {
        self.commits.borrow().clone()
    }

    pub fn decommits(&self) -> Vec<usize> {
        self.decommits.borrow().clone()
    }
}

impl VirtualMemory for CountingVm {
    fn page_size(&self) -> usize {
        4096
    }

    fn reserve(&self, size: usize) -> MemoryResult<NonNull<u8>> {
        self.reserves.borrow_mut().push(size);
        self.inner.reserve(size)
    }

    unsafe fn commit(&self, ptr: NonNull<u8>, size: usize) -> MemoryResult<()> {
        self.commits.borrow_mut().push(size);
        // SAFETY: forwarded contract
        unsafe { self.inner.commit(ptr, size) }
    }

    unsafe fn decommit(&self, ptr: NonNull<u8>, size: usize) -> MemoryResult<()> {
        self.decommits.borrow_mut().push(size);
        // SAFETY: forwarded contract
        unsafe { self.inner.decommit(ptr, size) }
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        self.releases.set(self.releases.get() + 1);
        // SAFETY: forwarded contract
        unsafe { self.inner.release(ptr, size) }
    }
}
