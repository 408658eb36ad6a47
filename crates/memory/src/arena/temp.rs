//! Chunked scratch allocator
//!
//! Bump allocation across a list of independently reserved chunks. Regular
//! chunks are kept across [`TempAllocator::reset`] and reused; requests
//! larger than a chunk get a dedicated chunk that lives until the next reset.

use core::fmt;
use core::ptr::NonNull;

use crate::allocator::Allocator;
use crate::core::config::TempConfig;
use crate::core::traits::{MemoryUsage, Resettable};
use crate::error::{MemoryError, MemoryResult};
use crate::syscalls::{SystemVirtualMemory, VirtualMemory};
use crate::utils::{align_up, checked_align_up, format_bytes};

#[cfg(feature = "logging")]
use strata_log::debug;

const ALIGN: usize = crate::core::types::alignment::MIN_ALIGN;

struct TempChunk {
    base: NonNull<u8>,
    size: usize,
    used: usize,
}

impl TempChunk {
    fn remaining(&self) -> usize {
        self.size - self.used
    }

    fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = (ptr.as_ptr() as usize).checked_sub(self.base.as_ptr() as usize)?;
        (offset <= self.used).then_some(offset)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ChunkRef {
    Regular(usize),
    Oversized(usize),
}

/// Snapshot of a [`TempAllocator`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TempStats {
    /// Bytes handed out since the last reset
    pub used_bytes: usize,
    /// Bytes held in chunks, regular and oversized
    pub chunk_bytes: usize,
    /// Regular chunks retained for reuse
    pub regular_chunks: usize,
    /// Live dedicated chunks
    pub oversized_chunks: usize,
}

impl fmt::Display for TempStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} used of {} in {} chunks (+{} oversized)",
            format_bytes(self.used_bytes),
            format_bytes(self.chunk_bytes),
            self.regular_chunks,
            self.oversized_chunks
        )
    }
}

/// Scratch allocator made of chained bump chunks.
///
/// # Examples
///
/// ```
/// use strata_memory::arena::TempAllocator;
///
/// let mut temp = TempAllocator::new();
/// let p = temp.alloc(16);
/// // the newest allocation grows in place
/// assert_eq!(temp.realloc(p, 16, 4000), p);
/// temp.reset();
/// assert_eq!(temp.stats().used_bytes, 0);
/// ```
pub struct TempAllocator<V: VirtualMemory = SystemVirtualMemory> {
    vm: V,
    chunk_size: usize,
    chunks: Vec<TempChunk>,
    current: usize,
    oversized: Vec<TempChunk>,
    last: Option<(NonNull<u8>, ChunkRef)>,
}

// SAFETY: chunks are exclusively owned by the allocator
unsafe impl<V: VirtualMemory + Send> Send for TempAllocator<V> {}

impl<V: VirtualMemory> fmt::Debug for TempAllocator<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempAllocator")
            .field("chunk_size", &self.chunk_size)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl TempAllocator<SystemVirtualMemory> {
    /// Scratch allocator with 64 KiB chunks from the OS
    pub fn new() -> Self {
        let chunk_size = align_up(TempConfig::default().chunk_size, SystemVirtualMemory.page_size());
        Self::from_parts(SystemVirtualMemory::new(), chunk_size)
    }
}

impl Default for TempAllocator<SystemVirtualMemory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: VirtualMemory> TempAllocator<V> {
    /// Create from configuration over the given provider.
    ///
    /// The chunk size is rounded up to the provider's page size. No memory
    /// is reserved until the first allocation.
    pub fn with_config(config: TempConfig, vm: V) -> MemoryResult<Self> {
        config.validate()?;
        let chunk_size = checked_align_up(config.chunk_size, vm.page_size())
            .ok_or_else(|| MemoryError::invalid_config("chunk_size overflows when page aligned"))?;
        Ok(Self::from_parts(vm, chunk_size))
    }

    fn from_parts(vm: V, chunk_size: usize) -> Self {
        Self {
            vm,
            chunk_size,
            chunks: Vec::new(),
            current: 0,
            oversized: Vec::new(),
            last: None,
        }
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Bump-allocate `size` bytes (rounded up to 8, at least 8).
    ///
    /// # Panics
    ///
    /// Panics when the provider cannot supply a new chunk.
    pub fn alloc(&mut self, size: usize) -> NonNull<u8> {
        match self.try_alloc(size) {
            Ok(ptr) => ptr,
            Err(e) => panic!("temp allocation of {size} bytes failed: {e}"),
        }
    }

    /// Fallible form of [`alloc`](Self::alloc).
    pub fn try_alloc(&mut self, size: usize) -> MemoryResult<NonNull<u8>> {
        // Zero-byte requests take space too, so every pointer is distinct.
        let size = checked_align_up(size.max(1), ALIGN)
            .ok_or_else(|| MemoryError::arena_exhausted(size, 0))?;

        if size > self.chunk_size {
            return self.alloc_oversized(size);
        }

        loop {
            if let Some(chunk) = self.chunks.get_mut(self.current) {
                if chunk.remaining() >= size {
                    let ptr = bump(chunk, size);
                    self.last = Some((ptr, ChunkRef::Regular(self.current)));
                    return Ok(ptr);
                }
                if self.current + 1 < self.chunks.len() {
                    // Retained chunks past `current` are always empty.
                    self.current += 1;
                    continue;
                }
            }
            let chunk = self.new_chunk(self.chunk_size)?;
            self.chunks.push(chunk);
            self.current = self.chunks.len() - 1;
        }
    }

    /// Resize an allocation.
    ///
    /// Grows or shrinks in place when `ptr` is the newest allocation and its
    /// chunk has room; otherwise allocates anew and copies `min(old, new)`
    /// bytes. The old block is reclaimed only by [`reset`](Self::reset).
    ///
    /// # Panics
    ///
    /// Panics when a new chunk is needed and the provider cannot supply it.
    pub fn realloc(&mut self, ptr: NonNull<u8>, old_size: usize, new_size: usize) -> NonNull<u8> {
        match self.try_realloc(ptr, old_size, new_size) {
            Ok(ptr) => ptr,
            Err(e) => panic!("temp reallocation to {new_size} bytes failed: {e}"),
        }
    }

    /// Fallible form of [`realloc`](Self::realloc).
    pub fn try_realloc(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> MemoryResult<NonNull<u8>> {
        if let Some(chunk) = self.last_chunk_of(ptr) {
            let end = chunk.offset_of(ptr).and_then(|offset| {
                checked_align_up(new_size.max(1), ALIGN).and_then(|n| offset.checked_add(n))
            });
            if let Some(end) = end.filter(|&end| end <= chunk.size) {
                chunk.used = end;
                return Ok(ptr);
            }
        }

        let moved = self.try_alloc(new_size)?;
        // SAFETY: ptr is a live temp allocation of old_size bytes; moved is a
        // fresh, disjoint allocation of at least new_size bytes.
        unsafe {
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), moved.as_ptr(), old_size.min(new_size));
        }
        Ok(moved)
    }

    /// Release an allocation. Only the newest allocation is actually rewound.
    pub fn free(&mut self, ptr: NonNull<u8>, _size: usize) {
        let Some(chunk) = self.last_chunk_of(ptr) else {
            return;
        };
        if let Some(offset) = chunk.offset_of(ptr) {
            chunk.used = offset;
            self.last = None;
        }
    }

    /// Rewind every regular chunk and release the oversized ones.
    pub fn reset(&mut self) {
        for chunk in &mut self.chunks {
            chunk.used = 0;
        }
        self.current = 0;
        self.last = None;

        #[cfg(feature = "logging")]
        if !self.oversized.is_empty() {
            debug!(count = self.oversized.len(), "releasing oversized temp chunks");
        }

        for chunk in core::mem::take(&mut self.oversized) {
            self.release_chunk(&chunk);
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Size of regular chunks after page rounding
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Current usage
    pub fn stats(&self) -> TempStats {
        let all = || self.chunks.iter().chain(&self.oversized);
        TempStats {
            used_bytes: all().map(|c| c.used).sum(),
            chunk_bytes: all().map(|c| c.size).sum(),
            regular_chunks: self.chunks.len(),
            oversized_chunks: self.oversized.len(),
        }
    }

    /// The virtual-memory provider
    pub fn provider(&self) -> &V {
        &self.vm
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn last_chunk_of(&mut self, ptr: NonNull<u8>) -> Option<&mut TempChunk> {
        match self.last {
            Some((last, ChunkRef::Regular(i))) if last == ptr => self.chunks.get_mut(i),
            Some((last, ChunkRef::Oversized(i))) if last == ptr => self.oversized.get_mut(i),
            _ => None,
        }
    }

    fn alloc_oversized(&mut self, size: usize) -> MemoryResult<NonNull<u8>> {
        let bytes = checked_align_up(size, self.vm.page_size())
            .ok_or_else(|| MemoryError::arena_exhausted(size, 0))?;
        let mut chunk = self.new_chunk(bytes)?;
        let ptr = bump(&mut chunk, size);
        self.oversized.push(chunk);
        self.last = Some((ptr, ChunkRef::Oversized(self.oversized.len() - 1)));
        Ok(ptr)
    }

    fn new_chunk(&self, size: usize) -> MemoryResult<TempChunk> {
        let base = self.vm.reserve(size)?;
        // SAFETY: whole, page-aligned range just reserved
        if let Err(e) = unsafe { self.vm.commit(base, size) } {
            // SAFETY: nothing else refers to the reservation yet
            unsafe { self.vm.release(base, size) };
            return Err(e);
        }

        #[cfg(feature = "logging")]
        debug!(size, "temp chunk created");

        Ok(TempChunk { base, size, used: 0 })
    }

    fn release_chunk(&self, chunk: &TempChunk) {
        // SAFETY: chunk was produced by new_chunk and is released exactly once
        unsafe { self.vm.release(chunk.base, chunk.size) };
    }
}

fn bump(chunk: &mut TempChunk, size: usize) -> NonNull<u8> {
    debug_assert!(chunk.remaining() >= size);
    // SAFETY: used + size <= chunk.size
    let ptr = unsafe { NonNull::new_unchecked(chunk.base.as_ptr().add(chunk.used)) };
    chunk.used += size;
    ptr
}

impl<V: VirtualMemory> Drop for TempAllocator<V> {
    fn drop(&mut self) {
        for chunk in self.chunks.iter().chain(&self.oversized) {
            self.release_chunk(chunk);
        }
    }
}

impl<V: VirtualMemory> MemoryUsage for TempAllocator<V> {
    fn used_memory(&self) -> usize {
        self.stats().used_bytes
    }

    fn available_memory(&self) -> Option<usize> {
        None
    }
}

impl<V: VirtualMemory> Resettable for TempAllocator<V> {
    fn reset_all(&mut self) {
        self.reset();
    }
}

// SAFETY: allocations are disjoint bump ranges aligned to 8
unsafe impl<V: VirtualMemory> Allocator for TempAllocator<V> {
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.try_alloc(size).ok()
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        self.try_realloc(ptr, old_size, new_size).ok()
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
        self.free(ptr, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscalls::HeapVirtualMemory;
    use pretty_assertions::assert_eq;

    fn temp(chunk_size: usize) -> TempAllocator<HeapVirtualMemory> {
        TempAllocator::with_config(TempConfig { chunk_size }, HeapVirtualMemory::new()).unwrap()
    }

    #[test]
    fn lazily_creates_first_chunk() {
        let mut t = temp(4096);
        assert_eq!(t.stats().regular_chunks, 0);
        t.alloc(8);
        assert_eq!(t.stats().regular_chunks, 1);
    }

    #[test]
    fn spills_into_new_chunk() {
        let mut t = temp(4096);
        let chunk = t.chunk_size();
        t.alloc(chunk - 8);
        t.alloc(16);
        assert_eq!(t.stats().regular_chunks, 2);
    }

    #[test]
    fn reset_reuses_retained_chunks() {
        let mut t = temp(4096);
        let chunk = t.chunk_size();
        let first = t.alloc(chunk);
        t.alloc(chunk);
        t.reset();

        assert_eq!(t.alloc(8), first);
        t.alloc(chunk);
        assert_eq!(t.stats().regular_chunks, 2);
    }

    #[test]
    fn oversized_chunks_released_on_reset() {
        let mut t = temp(4096);
        let big = t.chunk_size() * 3 + 1;
        t.alloc(big);
        let stats = t.stats();
        assert_eq!(stats.oversized_chunks, 1);
        assert!(stats.chunk_bytes >= big);

        t.reset();
        assert_eq!(t.stats().oversized_chunks, 0);
    }

    #[test]
    fn realloc_moves_when_not_last() {
        let mut t = temp(4096);
        let a = t.alloc(8);
        // SAFETY: a is an 8-byte allocation
        unsafe { a.as_ptr().cast::<u64>().write(0xDEAD_BEEF) };
        let _b = t.alloc(8);

        let moved = t.realloc(a, 8, 64);
        assert_ne!(moved, a);
        // SAFETY: moved holds at least the 8 copied bytes
        assert_eq!(unsafe { moved.as_ptr().cast::<u64>().read() }, 0xDEAD_BEEF);
    }

    #[test]
    fn realloc_moves_when_chunk_full() {
        let mut t = temp(4096);
        let chunk = t.chunk_size();
        let a = t.alloc(chunk - 16);
        let moved = t.realloc(a, chunk - 16, chunk);
        assert_ne!(moved, a);
    }

    #[test]
    fn free_rewinds_only_last() {
        let mut t = temp(4096);
        let a = t.alloc(32);
        let b = t.alloc(32);

        t.free(a, 32);
        assert_eq!(t.stats().used_bytes, 64);

        t.free(b, 32);
        assert_eq!(t.stats().used_bytes, 32);
        assert_eq!(t.alloc(32), b);
    }
}
