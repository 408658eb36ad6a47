//! Scope slot table and allocation bookkeeping

use core::ptr::NonNull;

use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;

use super::sink::{LeakReportSink, default_sink};
use super::trace::{LiveAllocation, TraceKey, TraceStats};
use super::{ScopeHandle, ScopeInfo};
use crate::allocator::Allocator;
use crate::core::config::ScopeConfig;
use crate::core::traits::MemoryUsage;
use crate::core::types::SourceLocation;
use crate::error::MemoryResult;

#[cfg(feature = "logging")]
use strata_log::trace;

const ROOT_NAME: &str = "root";

#[derive(Debug, Default)]
struct ScopeSlot {
    name: String,
    bytes_live: usize,
    allocs_live: usize,
    parent: Option<ScopeHandle>,
    /// Open children, oldest first
    children: Vec<ScopeHandle>,
    /// Call sites of this scope, first seen first
    traces: IndexMap<SourceLocation, TraceStats>,
    /// Addresses of this scope's entries in the registry's live map
    live: HashSet<usize>,
    active: bool,
}

impl ScopeSlot {
    fn is_balanced(&self) -> bool {
        self.bytes_live == 0 && self.allocs_live == 0
    }
}

/// Attributes allocations from an [`Allocator`] to named, nestable scopes.
///
/// Each tracked allocation is recorded against its scope and against the
/// source line that made it. [`ScopeHandle::ROOT`] is exempt: its traffic
/// goes straight to the source.
///
/// The registry is an ordinary value. Sharing one between threads means
/// wrapping it in a lock such as `parking_lot::Mutex`.
pub struct ScopeRegistry<A: Allocator> {
    source: A,
    slots: Vec<ScopeSlot>,
    /// Unused slot indices, popped from the back
    free_slots: Vec<u32>,
    /// Live pointer address -> owning trace
    live: HashMap<usize, LiveAllocation>,
    sink: Box<dyn LeakReportSink>,
}

impl<A: Allocator> core::fmt::Debug for ScopeRegistry<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScopeRegistry")
            .field("capacity", &self.slots.len())
            .field("active", &(self.slots.len() - self.free_slots.len()))
            .field("live", &self.live.len())
            .finish_non_exhaustive()
    }
}

impl<A: Allocator> ScopeRegistry<A> {
    /// Registry with the default slot capacity
    pub fn new(source: A) -> Self {
        Self::build(source, ScopeConfig::default().capacity)
    }

    /// Registry with a configured slot capacity
    pub fn with_config(source: A, config: &ScopeConfig) -> MemoryResult<Self> {
        config.validate()?;
        Ok(Self::build(source, config.capacity))
    }

    fn build(source: A, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, ScopeSlot::default);
        slots[ScopeHandle::ROOT.index()] = ScopeSlot {
            name: ROOT_NAME.to_owned(),
            active: true,
            ..ScopeSlot::default()
        };

        Self {
            source,
            slots,
            free_slots: (1..capacity as u32).rev().collect(),
            live: HashMap::new(),
            sink: default_sink(),
        }
    }

    /// Replace the leak-report sink
    pub fn set_leak_report_sink(&mut self, sink: Box<dyn LeakReportSink>) {
        self.sink = sink;
    }

    // ========================================================================
    // Scope lifecycle
    // ========================================================================

    /// Open a scope, optionally nested under `parent`.
    ///
    /// # Panics
    ///
    /// Panics when every slot is in use or `parent` is not an open scope.
    /// Neither panic leaves the registry modified.
    pub fn create(&mut self, name: impl Into<String>, parent: Option<ScopeHandle>) -> ScopeHandle {
        if let Some(parent) = parent {
            self.slot(parent);
        }
        let Some(index) = self.free_slots.pop() else {
            panic!("scope registry exhausted: all {} slots in use", self.slots.len());
        };
        let handle = ScopeHandle(index);
        if let Some(parent) = parent {
            self.slots[parent.index()].children.push(handle);
        }
        self.slots[handle.index()] = ScopeSlot {
            name: name.into(),
            parent,
            active: true,
            ..ScopeSlot::default()
        };

        #[cfg(feature = "logging")]
        trace!(%handle, name = %self.slots[handle.index()].name, ?parent, "scope created");

        handle
    }

    /// Close a scope and recycle its slot.
    ///
    /// A scope with live allocations is reported to the leak sink first,
    /// open children included. A balanced scope is recycled silently even
    /// with children still open. Either way open children lose their parent
    /// link and the scope's traces are discarded. The work is proportional
    /// to this scope's own entries.
    ///
    /// # Panics
    ///
    /// Panics for [`ScopeHandle::ROOT`] and for handles of closed scopes.
    pub fn destroy(&mut self, handle: ScopeHandle) {
        assert!(!handle.is_root(), "the root scope cannot be destroyed");
        let slot = self.slot(handle);
        let balanced = slot.is_balanced();

        if !balanced {
            self.report_leaks(handle);
        }

        let slot = core::mem::take(&mut self.slots[handle.index()]);
        for child in &slot.children {
            self.slots[child.index()].parent = None;
        }
        for address in &slot.live {
            self.live.remove(address);
        }
        if let Some(parent) = slot.parent {
            self.slots[parent.index()].children.retain(|&c| c != handle);
        }
        self.free_slots.push(handle.0);

        #[cfg(feature = "logging")]
        trace!(%handle, balanced, "scope destroyed");
    }

    fn report_leaks(&mut self, handle: ScopeHandle) {
        let scope = &self.slots[handle.index()];
        self.sink
            .begin(&scope.name, scope.bytes_live, scope.allocs_live, scope.children.len());

        for (site, stats) in scope.traces.iter().filter(|(_, stats)| !stats.is_empty()) {
            self.sink.alloc(site.file, site.line, stats.bytes, stats.allocs);
        }

        for child in scope.children.iter().map(|c| &self.slots[c.index()]) {
            self.sink.child(&child.name, child.bytes_live, child.allocs_live);
        }

        self.sink.end();
    }

    // ========================================================================
    // Tracked allocation
    // ========================================================================

    /// Allocate through a scope, attributed to the caller's source line.
    ///
    /// `None` when the source is exhausted.
    #[track_caller]
    pub fn alloc(&mut self, handle: ScopeHandle, size: usize) -> Option<NonNull<u8>> {
        self.alloc_at(handle, size, SourceLocation::caller())
    }

    /// [`alloc`](Self::alloc) with an explicit call site.
    #[track_caller]
    pub fn alloc_at(
        &mut self,
        handle: ScopeHandle,
        size: usize,
        location: SourceLocation,
    ) -> Option<NonNull<u8>> {
        if handle.is_root() {
            return self.source.allocate(size);
        }
        self.slot(handle);

        let ptr = self.source.allocate(size)?;
        self.track(handle, ptr, size, location);
        Some(ptr)
    }

    /// Resize an allocation made through `handle`.
    ///
    /// On success the allocation is re-attributed to the caller's source
    /// line. On `None` the original allocation and its bookkeeping are left
    /// untouched.
    ///
    /// # Safety
    ///
    /// For [`ScopeHandle::ROOT`], `ptr` must be a live allocation of
    /// `old_size` bytes made through the root scope. Tracked scopes verify
    /// ownership and size and panic on mismatch.
    #[track_caller]
    pub unsafe fn realloc(
        &mut self,
        handle: ScopeHandle,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded contract
        unsafe { self.realloc_at(handle, ptr, old_size, new_size, SourceLocation::caller()) }
    }

    /// [`realloc`](Self::realloc) with an explicit call site.
    ///
    /// # Safety
    ///
    /// Same as [`realloc`](Self::realloc).
    #[track_caller]
    pub unsafe fn realloc_at(
        &mut self,
        handle: ScopeHandle,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        location: SourceLocation,
    ) -> Option<NonNull<u8>> {
        if handle.is_root() {
            self.assert_untracked(ptr);
            // SAFETY: caller guarantees ptr is a root allocation of old_size
            return unsafe { self.source.reallocate(ptr, old_size, new_size) };
        }
        self.slot(handle);
        self.check_owner(handle, ptr, old_size);

        // SAFETY: the live map proves ptr is an outstanding allocation of
        // old_size bytes from this source
        let moved = unsafe { self.source.reallocate(ptr, old_size, new_size) }?;
        self.untrack(handle, ptr, old_size);
        self.track(handle, moved, new_size, location);
        Some(moved)
    }

    /// Release an allocation made through `handle`.
    ///
    /// # Safety
    ///
    /// For [`ScopeHandle::ROOT`], `ptr` must be a live allocation of `size`
    /// bytes made through the root scope. Tracked scopes verify ownership and
    /// size and panic on mismatch.
    ///
    /// # Panics
    ///
    /// Panics when `ptr` is not live, belongs to another scope, or was
    /// allocated with a different size.
    #[track_caller]
    pub unsafe fn free(&mut self, handle: ScopeHandle, ptr: NonNull<u8>, size: usize) {
        if handle.is_root() {
            self.assert_untracked(ptr);
            // SAFETY: caller guarantees ptr is a root allocation of size
            unsafe { self.source.deallocate(ptr, size) };
            return;
        }
        self.slot(handle);
        self.check_owner(handle, ptr, size);
        self.untrack(handle, ptr, size);
        // SAFETY: ownership and size were verified against the live map
        unsafe { self.source.deallocate(ptr, size) };
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Snapshot of an open scope
    pub fn scope_info(&self, handle: ScopeHandle) -> Option<ScopeInfo> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.active)
            .map(|slot| ScopeInfo {
                name: slot.name.clone(),
                bytes_live: slot.bytes_live,
                allocs_live: slot.allocs_live,
                children_count: slot.children.len(),
                parent: slot.parent,
            })
    }

    /// Every open scope except the root
    pub fn active_scopes(&self) -> impl Iterator<Item = ScopeHandle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, slot)| slot.active)
            .map(|(index, _)| ScopeHandle(index as u32))
    }

    /// Call sites of `handle` with outstanding allocations, oldest first
    pub fn traces(&self, handle: ScopeHandle) -> impl Iterator<Item = (SourceLocation, TraceStats)> + '_ {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.active)
            .into_iter()
            .flat_map(|slot| slot.traces.iter())
            .filter(|(_, stats)| !stats.is_empty())
            .map(|(site, stats)| (*site, *stats))
    }

    /// Number of tracked live allocations across all scopes
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    /// Number of scope slots, root included
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The allocation source
    pub fn source(&self) -> &A {
        &self.source
    }

    /// The allocation source, mutably. Memory taken from it directly is not
    /// tracked.
    pub fn source_mut(&mut self) -> &mut A {
        &mut self.source
    }

    // ========================================================================
    // Internals
    // ========================================================================

    #[track_caller]
    fn slot(&self, handle: ScopeHandle) -> &ScopeSlot {
        match self.slots.get(handle.index()) {
            Some(slot) if slot.active => slot,
            _ => panic!("{handle} is not an open scope"),
        }
    }

    #[track_caller]
    fn slot_mut(&mut self, handle: ScopeHandle) -> &mut ScopeSlot {
        match self.slots.get_mut(handle.index()) {
            Some(slot) if slot.active => slot,
            _ => panic!("{handle} is not an open scope"),
        }
    }

    #[track_caller]
    fn assert_untracked(&self, ptr: NonNull<u8>) {
        if let Some(entry) = self.live.get(&(ptr.as_ptr() as usize)) {
            panic!("{ptr:p} belongs to {} but was released through the root scope", entry.trace.scope);
        }
    }

    #[track_caller]
    fn check_owner(&self, handle: ScopeHandle, ptr: NonNull<u8>, size: usize) {
        let Some(entry) = self.live.get(&(ptr.as_ptr() as usize)) else {
            panic!("{ptr:p} is not a live allocation of any scope");
        };
        assert!(
            entry.trace.scope == handle,
            "{ptr:p} belongs to {} but was released through {handle}",
            entry.trace.scope
        );
        assert!(
            entry.size == size,
            "{ptr:p} was allocated with {} bytes but released as {size}",
            entry.size
        );
    }

    fn track(&mut self, handle: ScopeHandle, ptr: NonNull<u8>, size: usize, location: SourceLocation) {
        let address = ptr.as_ptr() as usize;
        let entry = LiveAllocation {
            trace: TraceKey::new(handle, location),
            size,
        };
        let previous = self.live.insert(address, entry);
        assert!(previous.is_none(), "allocation source handed out live pointer {ptr:p} twice");

        let slot = &mut self.slots[handle.index()];
        slot.bytes_live += size;
        slot.allocs_live += 1;
        slot.traces.entry(location).or_default().record_allocation(size);
        slot.live.insert(address);
    }

    fn untrack(&mut self, handle: ScopeHandle, ptr: NonNull<u8>, size: usize) {
        let address = ptr.as_ptr() as usize;
        let Some(entry) = self.live.remove(&address) else {
            return;
        };
        let slot = &mut self.slots[handle.index()];
        slot.bytes_live -= size;
        slot.allocs_live -= 1;
        slot.live.remove(&address);
        if let Some(stats) = slot.traces.get_mut(&entry.trace.location()) {
            stats.record_deallocation(size);
        }
    }
}

impl<A: Allocator> MemoryUsage for ScopeRegistry<A> {
    fn used_memory(&self) -> usize {
        self.slots.iter().map(|s| s.bytes_live).sum()
    }

    fn available_memory(&self) -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Pool;
    use crate::scope::{LeakEvent, LeakRecorder};
    use pretty_assertions::assert_eq;

    fn registry() -> (ScopeRegistry<Pool<'static>>, LeakRecorder) {
        let mut registry = ScopeRegistry::new(Pool::with_capacity(1 << 16).unwrap());
        let recorder = LeakRecorder::new();
        registry.set_leak_report_sink(Box::new(recorder.clone()));
        (registry, recorder)
    }

    const HERE: SourceLocation = SourceLocation::new("frame.rs", 10);
    const THERE: SourceLocation = SourceLocation::new("frame.rs", 20);

    #[test]
    fn test_balanced_scope_is_silent() {
        let (mut registry, recorder) = registry();
        let scope = registry.create("frame", None);
        let a = registry.alloc(scope, 40).unwrap();
        let b = registry.alloc(scope, 24).unwrap();
        unsafe {
            registry.free(scope, a, 40);
            registry.free(scope, b, 24);
        }
        registry.destroy(scope);

        assert!(recorder.is_empty());
        assert_eq!(registry.live_allocations(), 0);
    }

    #[test]
    fn test_counters_follow_traffic() {
        let (mut registry, _) = registry();
        let scope = registry.create("frame", None);
        let a = registry.alloc_at(scope, 100, HERE).unwrap();
        registry.alloc_at(scope, 50, HERE).unwrap();
        registry.alloc_at(scope, 8, THERE).unwrap();
        unsafe { registry.free(scope, a, 100) };

        let info = registry.scope_info(scope).unwrap();
        assert_eq!((info.bytes_live, info.allocs_live), (58, 2));
        assert_eq!(
            registry.traces(scope).collect::<Vec<_>>(),
            vec![
                (HERE, TraceStats { bytes: 50, allocs: 1 }),
                (THERE, TraceStats { bytes: 8, allocs: 1 }),
            ]
        );
    }

    #[test]
    fn test_leak_report_lists_sites_and_children() {
        let (mut registry, recorder) = registry();
        let parent = registry.create("level", None);
        let child = registry.create("mesh", Some(parent));
        registry.alloc_at(parent, 64, HERE).unwrap();
        registry.alloc_at(parent, 64, HERE).unwrap();
        registry.alloc_at(child, 16, THERE).unwrap();

        registry.destroy(parent);

        assert_eq!(
            recorder.take(),
            vec![
                LeakEvent::Begin {
                    name: "level".into(),
                    bytes: 128,
                    allocs: 2,
                    children: 1
                },
                LeakEvent::Alloc {
                    file: "frame.rs".into(),
                    line: 10,
                    bytes: 128,
                    allocs: 2
                },
                LeakEvent::Child {
                    name: "mesh".into(),
                    bytes: 16,
                    allocs: 1
                },
                LeakEvent::End,
            ]
        );
        // The child survives, detached.
        assert_eq!(registry.scope_info(child).unwrap().parent, None);
        assert_eq!(registry.live_allocations(), 1);
    }

    #[test]
    fn test_balanced_scope_with_open_child_is_silent() {
        let (mut registry, recorder) = registry();
        let parent = registry.create("level", None);
        let child = registry.create("mesh", Some(parent));
        registry.destroy(parent);

        assert!(recorder.is_empty());
        assert_eq!(registry.scope_info(child).unwrap().parent, None);
    }

    #[test]
    fn test_destroy_decrements_parent() {
        let (mut registry, recorder) = registry();
        let parent = registry.create("level", None);
        let child = registry.create("mesh", Some(parent));
        assert_eq!(registry.scope_info(parent).unwrap().children_count, 1);

        registry.destroy(child);
        assert_eq!(registry.scope_info(parent).unwrap().children_count, 0);
        registry.destroy(parent);
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_realloc_moves_attribution() {
        let (mut registry, _) = registry();
        let scope = registry.create("frame", None);
        let a = registry.alloc_at(scope, 32, HERE).unwrap();
        let b = unsafe { registry.realloc_at(scope, a, 32, 4096, THERE) }.unwrap();

        let info = registry.scope_info(scope).unwrap();
        assert_eq!((info.bytes_live, info.allocs_live), (4096, 1));
        assert_eq!(
            registry.traces(scope).collect::<Vec<_>>(),
            vec![(THERE, TraceStats { bytes: 4096, allocs: 1 })]
        );
        unsafe { registry.free(scope, b, 4096) };
        assert_eq!(registry.scope_info(scope).unwrap().bytes_live, 0);
    }

    #[test]
    fn test_failed_realloc_keeps_bookkeeping() {
        let (mut registry, _) = registry();
        let scope = registry.create("frame", None);
        let a = registry.alloc_at(scope, 32, HERE).unwrap();
        let result = unsafe { registry.realloc_at(scope, a, 32, 1 << 20, THERE) };

        assert!(result.is_none());
        assert_eq!(registry.traces(scope).next(), Some((HERE, TraceStats { bytes: 32, allocs: 1 })));
    }

    #[test]
    fn test_root_is_untracked() {
        let (mut registry, _) = registry();
        let ptr = registry.alloc(ScopeHandle::ROOT, 64).unwrap();
        assert_eq!(registry.live_allocations(), 0);
        assert_eq!(registry.scope_info(ScopeHandle::ROOT).unwrap().bytes_live, 0);
        unsafe { registry.free(ScopeHandle::ROOT, ptr, 64) };
    }

    #[test]
    fn test_slots_are_recycled() {
        let config = ScopeConfig { capacity: 2 };
        let mut registry = ScopeRegistry::with_config(Pool::with_capacity(4096).unwrap(), &config).unwrap();
        let first = registry.create("a", None);
        registry.destroy(first);
        let second = registry.create("b", None);
        assert_eq!(first, second);
        assert_eq!(registry.active_scopes().collect::<Vec<_>>(), vec![second]);
    }

    #[test]
    #[should_panic(expected = "scope registry exhausted")]
    fn test_exhaustion_panics() {
        let config = ScopeConfig { capacity: 2 };
        let mut registry = ScopeRegistry::with_config(Pool::with_capacity(4096).unwrap(), &config).unwrap();
        registry.create("a", None);
        registry.create("b", None);
    }

    #[test]
    fn test_exhaustion_leaves_parent_untouched() {
        let config = ScopeConfig { capacity: 2 };
        let mut registry = ScopeRegistry::with_config(Pool::with_capacity(4096).unwrap(), &config).unwrap();
        registry.set_leak_report_sink(Box::new(LeakRecorder::new()));
        let parent = registry.create("a", None);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.create("b", Some(parent));
        }));
        assert!(result.is_err());
        assert_eq!(registry.scope_info(parent).unwrap().children_count, 0);
        assert!(registry.scope_info(parent).unwrap().is_clean());
    }

    #[test]
    fn test_destroy_purges_only_its_own_entries() {
        let (mut registry, recorder) = registry();
        let doomed = registry.create("doomed", None);
        let child = registry.create("child", Some(doomed));
        let kept = registry.create("kept", None);

        registry.alloc_at(doomed, 16, HERE).unwrap();
        registry.alloc_at(doomed, 24, THERE).unwrap();
        let survivor = registry.alloc_at(kept, 40, HERE).unwrap();
        let orphaned = registry.alloc_at(child, 8, THERE).unwrap();
        assert_eq!(registry.live_allocations(), 4);

        registry.destroy(doomed);
        recorder.take();

        assert_eq!(registry.live_allocations(), 2);
        assert_eq!(registry.traces(doomed).count(), 0);
        assert_eq!(
            registry.traces(kept).collect::<Vec<_>>(),
            vec![(HERE, TraceStats { bytes: 40, allocs: 1 })]
        );
        assert_eq!(registry.scope_info(child).unwrap().parent, None);

        unsafe {
            registry.free(kept, survivor, 40);
            registry.free(child, orphaned, 8);
        }
        registry.destroy(child);
        registry.destroy(kept);
        assert!(recorder.is_empty());
        assert_eq!(registry.live_allocations(), 0);
    }

    #[test]
    fn test_report_lists_children_in_creation_order() {
        let (mut registry, recorder) = registry();
        let parent = registry.create("level", None);
        registry.alloc_at(parent, 8, HERE).unwrap();
        let first = registry.create("first", Some(parent));
        let _second = registry.create("second", Some(parent));
        registry.destroy(first);
        let _third = registry.create("third", Some(parent));

        registry.destroy(parent);

        let children: Vec<_> = recorder
            .take()
            .into_iter()
            .filter_map(|event| match event {
                LeakEvent::Child { name, .. } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(children, vec!["second".to_owned(), "third".to_owned()]);
    }

    #[test]
    #[should_panic(expected = "was released through")]
    fn test_free_through_wrong_scope_panics() {
        let (mut registry, _) = registry();
        let a = registry.create("a", None);
        let b = registry.create("b", None);
        let ptr = registry.alloc(a, 8).unwrap();
        unsafe { registry.free(b, ptr, 8) };
    }

    #[test]
    #[should_panic(expected = "not a live allocation")]
    fn test_double_free_panics() {
        let (mut registry, _) = registry();
        let a = registry.create("a", None);
        let ptr = registry.alloc(a, 8).unwrap();
        unsafe {
            registry.free(a, ptr, 8);
            registry.free(a, ptr, 8);
        }
    }

    #[test]
    #[should_panic(expected = "allocated with 8 bytes")]
    fn test_size_mismatch_panics() {
        let (mut registry, _) = registry();
        let a = registry.create("a", None);
        let ptr = registry.alloc(a, 8).unwrap();
        unsafe { registry.free(a, ptr, 16) };
    }

    #[test]
    #[should_panic(expected = "is not an open scope")]
    fn test_stale_handle_panics() {
        let (mut registry, _) = registry();
        let a = registry.create("a", None);
        registry.destroy(a);
        registry.alloc(a, 8);
    }

    #[test]
    #[should_panic(expected = "root scope cannot be destroyed")]
    fn test_root_cannot_be_destroyed() {
        let (mut registry, _) = registry();
        registry.destroy(ScopeHandle::ROOT);
    }
}
