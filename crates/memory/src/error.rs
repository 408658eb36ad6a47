//! Error types for strata-memory
//!
//! Only recoverable and construction-time failures live here. Misuse of an
//! allocator (double free, foreign pointer, exhausted reservation) panics.

use thiserror::Error;

#[cfg(feature = "logging")]
use strata_log::error;

// ============================================================================
// Main Error Types
// ============================================================================

/// Memory management errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Invalid pool size: {size} bytes (usable range {min}..={max})")]
    InvalidPoolSize { size: usize, min: usize, max: usize },

    #[error("Invalid alignment: {alignment}")]
    InvalidAlignment { alignment: usize },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Arena exhausted: requested {requested} bytes, available {available}")]
    ArenaExhausted { requested: usize, available: usize },

    #[error("Virtual memory {operation} of {size} bytes failed: {reason}")]
    VirtualMemory {
        operation: &'static str,
        size: usize,
        reason: String,
    },

    #[error("Memory corruption detected in {component}: {details}")]
    Corruption { component: String, details: String },
}

impl MemoryError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ArenaExhausted { .. })
    }

    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPoolSize { .. } => "MEM:POOL:SIZE",
            Self::InvalidAlignment { .. } => "MEM:ALLOC:ALIGN",
            Self::InvalidConfig { .. } => "MEM:CONFIG:INVALID",
            Self::ArenaExhausted { .. } => "MEM:ARENA:EXHAUSTED",
            Self::VirtualMemory { .. } => "MEM:SYSTEM:VM",
            Self::Corruption { .. } => "MEM:SYSTEM:CORRUPTION",
        }
    }

    // ============================================================================
    // Convenience Constructors
    // ============================================================================

    /// Create invalid pool size error
    #[must_use]
    pub fn invalid_pool_size(size: usize, min: usize, max: usize) -> Self {
        Self::InvalidPoolSize { size, min, max }
    }

    /// Create invalid alignment error
    #[must_use]
    pub fn invalid_alignment(alignment: usize) -> Self {
        Self::InvalidAlignment { alignment }
    }

    /// Create invalid config error
    pub fn invalid_config(reason: &str) -> Self {
        Self::InvalidConfig {
            reason: reason.to_string(),
        }
    }

    /// Create arena exhausted error
    #[must_use]
    pub fn arena_exhausted(requested: usize, available: usize) -> Self {
        Self::ArenaExhausted {
            requested,
            available,
        }
    }

    /// Wrap a failed virtual-memory call
    pub fn virtual_memory(operation: &'static str, size: usize, err: &std::io::Error) -> Self {
        #[cfg(feature = "logging")]
        error!(operation, size, error = %err, "virtual memory call failed");

        Self::VirtualMemory {
            operation,
            size,
            reason: err.to_string(),
        }
    }

    /// Create memory corruption error
    pub fn corruption(component: &str, details: &str) -> Self {
        #[cfg(feature = "logging")]
        error!("Memory corruption: {component} - {details}");

        Self::Corruption {
            component: component.to_string(),
            details: details.to_string(),
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result type for memory operations
pub type MemoryResult<T> = core::result::Result<T, MemoryError>;

/// Generic result type alias
pub type Result<T> = MemoryResult<T>;

// ============================================================================
// Tests
// ============================================================================
