//! # strata-memory
//!
//! Allocator stack for engines and tools that want explicit control over
//! where their memory comes from:
//!
//! - [`allocator::Pool`]: a TLSF free-list allocator with O(1) malloc/free
//!   over a caller-supplied or owned block
//! - [`arena::VirtualArena`]: a bump allocator over reserved address space
//!   that commits pages on demand and rewinds to marks
//! - [`arena::TempAllocator`]: chained scratch chunks reset in one call
//! - [`scope::ScopeRegistry`]: named, nestable scopes over any of the above
//!   with per-call-site accounting and leak reports
//!
//! ## Quick Start
//!
//! ```rust
//! use strata_memory::prelude::*;
//!
//! let mut pool = Pool::with_capacity(1 << 20)?;
//! let a = pool.malloc(64).expect("fresh pool");
//! pool.free(a);
//!
//! let mut arena = VirtualArena::new(1 << 20)?;
//! let mark = arena.mark();
//! arena.alloc(5000);
//! arena.reset(mark);
//!
//! let mut scopes = ScopeRegistry::new(pool);
//! let frame = scopes.create("frame", None);
//! let p = scopes.alloc(frame, 256).expect("pool has room");
//! // SAFETY: p came from this registry with this size
//! unsafe { scopes.free(frame, p, 256) };
//! scopes.destroy(frame);
//! # Ok::<(), MemoryError>(())
//! ```
//!
//! ## Features
//!
//! - `logging` (default): structured events through `strata-log`, and
//!   [`scope::TracingLeakSink`] as the default leak sink
//!
//! ## Concurrency
//!
//! No allocator here locks internally. Every mutating operation takes
//! `&mut self`; wrap an instance in `parking_lot::Mutex` to share it.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(unsafe_code)]

// Error types
pub mod error;

// Core modules
pub mod allocator;
pub mod arena;
pub mod core;
pub mod scope;
pub mod syscalls;
pub mod utils;

// Re-export core types for convenience
pub use crate::core::MemoryConfig;
pub use crate::error::{MemoryError, MemoryResult, Result};

// Public API exports
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Core types
    pub use crate::core::traits::{MemoryUsage, Resettable};
    pub use crate::core::types::SourceLocation;
    pub use crate::core::{ArenaConfig, FreeListConfig, MemoryConfig, ScopeConfig, TempConfig};

    // Error types
    pub use crate::error::{MemoryError, MemoryResult, Result};

    // Allocators
    pub use crate::allocator::{Allocator, Pool, PoolStats};
    pub use crate::arena::{ArenaGuard, TempAllocator, VirtualArena};

    // Scopes
    pub use crate::scope::{LeakEvent, LeakRecorder, LeakReportSink, ScopeHandle, ScopeRegistry};

    // Virtual memory
    pub use crate::syscalls::{HeapVirtualMemory, SystemVirtualMemory, VirtualMemory};
}
