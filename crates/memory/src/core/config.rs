//! Configuration for strata-memory
//!
//! One struct per allocator plus [`MemoryConfig`] aggregating them. All of
//! them deserialize with per-field defaults so partial config files work.

use serde::{Deserialize, Serialize};

use super::types::{alignment::MIN_ALIGN, size};
use crate::error::{MemoryError, MemoryResult};

#[cfg(feature = "logging")]
use strata_log::{debug, warn};

// ============================================================================
// Core Configuration Types
// ============================================================================

/// Global memory system configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Free-list pool configuration
    pub pool: FreeListConfig,
    /// Virtual-memory arena configuration
    pub arena: ArenaConfig,
    /// Temp allocator configuration
    pub temp: TempConfig,
    /// Scope registry configuration
    pub scope: ScopeConfig,
}

impl MemoryConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Production configuration - large reservations, roomy chunks
    pub fn production() -> Self {
        Self {
            pool: FreeListConfig::production(),
            arena: ArenaConfig::production(),
            temp: TempConfig::production(),
            scope: ScopeConfig::production(),
        }
    }

    /// Debug configuration - small regions so exhaustion paths are exercised
    pub fn debug() -> Self {
        Self {
            pool: FreeListConfig::debug(),
            arena: ArenaConfig::debug(),
            temp: TempConfig::debug(),
            scope: ScopeConfig::debug(),
        }
    }

    /// Configuration optimized for low memory usage
    pub fn low_memory() -> Self {
        Self {
            pool: FreeListConfig::low_memory(),
            arena: ArenaConfig::low_memory(),
            temp: TempConfig::low_memory(),
            scope: ScopeConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> MemoryResult<()> {
        #[cfg(feature = "logging")]
        debug!("Validating memory configuration");

        self.pool
            .validate()
            .map_err(|e| prefix_error("pool", &e))?;
        self.arena
            .validate()
            .map_err(|e| prefix_error("arena", &e))?;
        self.temp
            .validate()
            .map_err(|e| prefix_error("temp", &e))?;
        self.scope
            .validate()
            .map_err(|e| prefix_error("scope", &e))?;

        Ok(())
    }
}

fn prefix_error(section: &str, err: &MemoryError) -> MemoryError {
    match err {
        MemoryError::InvalidConfig { reason } => {
            MemoryError::invalid_config(&format!("{section}: {reason}"))
        }
        other => other.clone(),
    }
}

// ============================================================================
// Free-List Configuration
// ============================================================================

/// Configuration for [`Pool::with_capacity`](crate::allocator::freelist::Pool::with_capacity)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreeListConfig {
    /// Size of the owned backing block in bytes
    pub pool_size: usize,
}

impl Default for FreeListConfig {
    fn default() -> Self {
        Self {
            pool_size: size::MB,
        }
    }
}

impl FreeListConfig {
    /// Production configuration
    pub fn production() -> Self {
        Self {
            pool_size: 64 * size::MB,
        }
    }

    /// Debug configuration
    pub fn debug() -> Self {
        Self {
            pool_size: 64 * size::KB,
        }
    }

    /// Low memory configuration
    pub fn low_memory() -> Self {
        Self {
            pool_size: 256 * size::KB,
        }
    }

    /// Validate free-list configuration
    pub fn validate(&self) -> MemoryResult<()> {
        let min = crate::allocator::freelist::Pool::MIN_POOL_SIZE;
        let max = crate::allocator::freelist::Pool::MAX_POOL_SIZE;
        if self.pool_size < min || self.pool_size > max {
            return Err(MemoryError::invalid_config(&format!(
                "pool_size {} outside {min}..={max}",
                self.pool_size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Arena Configuration
// ============================================================================

/// Configuration for [`VirtualArena`](crate::arena::VirtualArena)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Bytes of address space to reserve up front
    pub reserve_size: usize,
    /// Smallest commit the arena performs when it grows
    pub commit_floor: usize,
    /// Alignment every allocation size is rounded to
    pub alignment: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            reserve_size: 256 * size::MB,
            commit_floor: 4 * size::KB,
            alignment: MIN_ALIGN,
        }
    }
}

impl ArenaConfig {
    /// Arena reserving `reserve_size` bytes with default growth parameters
    pub fn with_reserve(reserve_size: usize) -> Self {
        Self {
            reserve_size,
            ..Self::default()
        }
    }

    /// Production configuration
    pub fn production() -> Self {
        Self {
            reserve_size: size::GB,
            commit_floor: 64 * size::KB,
            alignment: MIN_ALIGN,
        }
    }

    /// Debug configuration
    pub fn debug() -> Self {
        Self {
            reserve_size: 16 * size::MB,
            commit_floor: 4 * size::KB,
            alignment: MIN_ALIGN,
        }
    }

    /// Low memory configuration
    pub fn low_memory() -> Self {
        Self {
            reserve_size: 64 * size::MB,
            commit_floor: 4 * size::KB,
            alignment: MIN_ALIGN,
        }
    }

    /// Validate arena configuration
    pub fn validate(&self) -> MemoryResult<()> {
        if self.reserve_size == 0 {
            return Err(MemoryError::invalid_config("reserve_size cannot be zero"));
        }
        if self.commit_floor == 0 {
            return Err(MemoryError::invalid_config("commit_floor cannot be zero"));
        }
        if !self.alignment.is_power_of_two() || self.alignment < MIN_ALIGN {
            return Err(MemoryError::invalid_alignment(self.alignment));
        }
        if self.commit_floor > self.reserve_size {
            #[cfg(feature = "logging")]
            warn!(
                commit_floor = self.commit_floor,
                reserve_size = self.reserve_size,
                "commit floor exceeds reservation, growth will be clamped"
            );
        }
        Ok(())
    }
}

// ============================================================================
// Temp Allocator Configuration
// ============================================================================

/// Configuration for [`TempAllocator`](crate::arena::TempAllocator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempConfig {
    /// Size of each regular chunk
    pub chunk_size: usize,
}

impl Default for TempConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * size::KB,
        }
    }
}

impl TempConfig {
    /// Production configuration
    pub fn production() -> Self {
        Self {
            chunk_size: 256 * size::KB,
        }
    }

    /// Debug configuration
    pub fn debug() -> Self {
        Self {
            chunk_size: 4 * size::KB,
        }
    }

    /// Low memory configuration
    pub fn low_memory() -> Self {
        Self {
            chunk_size: 16 * size::KB,
        }
    }

    /// Validate temp configuration
    pub fn validate(&self) -> MemoryResult<()> {
        if self.chunk_size < MIN_ALIGN {
            return Err(MemoryError::invalid_config(&format!(
                "chunk_size must be at least {MIN_ALIGN} bytes"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Scope Registry Configuration
// ============================================================================

/// Configuration for [`ScopeRegistry`](crate::scope::ScopeRegistry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Number of scope slots, root included
    pub capacity: usize,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl ScopeConfig {
    /// Production configuration
    pub fn production() -> Self {
        Self { capacity: 4096 }
    }

    /// Debug configuration
    pub fn debug() -> Self {
        Self { capacity: 64 }
    }

    /// Validate scope configuration
    pub fn validate(&self) -> MemoryResult<()> {
        if self.capacity < 2 {
            return Err(MemoryError::invalid_config(
                "capacity must leave room for the root scope and one user scope",
            ));
        }
        if self.capacity > u32::MAX as usize {
            return Err(MemoryError::invalid_config("capacity exceeds u32 handle range"));
        }
        Ok(())
    }
}
