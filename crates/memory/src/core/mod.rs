//! Core functionality for strata-memory
//!
//! Configuration structures, base traits and common types shared by the
//! free-list pool, the arenas and the scope registry.

pub mod config;
pub mod traits;
pub mod types;

pub use crate::error::{MemoryError, MemoryResult};
pub use config::{ArenaConfig, FreeListConfig, MemoryConfig, ScopeConfig, TempConfig};
pub use traits::{BasicMemoryUsage, MemoryUsage, Resettable};
pub use types::*;
