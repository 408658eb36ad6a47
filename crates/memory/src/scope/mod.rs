//! Hierarchical allocation scopes with per-call-site leak tracking
//!
//! A [`ScopeRegistry`] wraps an [`Allocator`](crate::allocator::Allocator)
//! and attributes every allocation to a named [`ScopeHandle`] and to the
//! source line that requested it. Destroying a scope that still owns memory
//! produces a leak report through a [`LeakReportSink`].
//!
//! # Examples
//!
//! ```
//! use strata_memory::allocator::Pool;
//! use strata_memory::scope::{LeakRecorder, ScopeRegistry};
//!
//! let mut registry = ScopeRegistry::new(Pool::with_capacity(1 << 16)?);
//! let recorder = LeakRecorder::new();
//! registry.set_leak_report_sink(Box::new(recorder.clone()));
//!
//! let frame = registry.create("frame", None);
//! let ptr = registry.alloc(frame, 128).expect("pool has room");
//! // SAFETY: ptr came from this registry with this size
//! unsafe { registry.free(frame, ptr, 128) };
//! registry.destroy(frame);
//!
//! assert!(recorder.is_empty());
//! # Ok::<(), strata_memory::MemoryError>(())
//! ```

mod registry;
mod sink;
mod trace;

use core::fmt;

pub use registry::ScopeRegistry;
#[cfg(feature = "logging")]
pub use sink::TracingLeakSink;
pub use sink::{LeakEvent, LeakRecorder, LeakReportSink, NoopLeakSink};
pub use trace::TraceStats;

/// Index of a scope slot in its registry.
///
/// Handles are only meaningful for the registry that issued them. Slots are
/// reused after [`ScopeRegistry::destroy`], so a handle must not outlive its
/// scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeHandle(u32);

impl ScopeHandle {
    /// Bootstrap scope: allocations pass straight through untracked
    pub const ROOT: Self = Self(0);

    /// Slot index
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this is [`ScopeHandle::ROOT`]
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for ScopeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Snapshot of one active scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeInfo {
    /// Name given at creation
    pub name: String,
    /// Bytes currently allocated through the scope
    pub bytes_live: usize,
    /// Allocations currently outstanding
    pub allocs_live: usize,
    /// Open child scopes
    pub children_count: usize,
    /// Parent scope, `None` for top-level or orphaned scopes
    pub parent: Option<ScopeHandle>,
}

impl ScopeInfo {
    /// No allocation is outstanding; destroying the scope reports nothing
    pub fn is_balanced(&self) -> bool {
        self.bytes_live == 0 && self.allocs_live == 0
    }

    /// Balanced and no child is open
    pub fn is_clean(&self) -> bool {
        self.bytes_live == 0 && self.allocs_live == 0 && self.children_count == 0
    }
}
