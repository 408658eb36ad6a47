//! # Strata Log
//!
//! Logging setup shared by the strata crates. Re-exports the `tracing`
//! macros so dependants log through one facade, and installs a
//! `tracing-subscriber` stack from a serialisable [`Config`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata_log::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let _guard = strata_log::auto_init()?;
//!
//!     info!(reserve = 1 << 20, "arena created");
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

#[macro_use]
mod format;
mod builder;
mod config;
mod writer;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, DisplayConfig, Format, Level, WriterConfig};

/// Prelude for common imports
pub mod prelude {
    pub use crate::{Level, Result, auto_init, debug, error, info, init, init_with, trace, warn};

    pub use tracing::{Span, field};
}

// Re-export tracing macros
pub use tracing::{debug, error, info, instrument, span, trace, warn};

/// Result type for logger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for logger operations
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filter parsing error
    #[error("Invalid filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed
    #[error("Logger already initialized")]
    AlreadyInitialized,
}

// ============================================================================
// Initialization Functions
// ============================================================================

/// Auto-detect and initialize the best logging configuration.
///
/// Environment variables win; otherwise debug builds get
/// [`Config::development`] and release builds [`Config::production`].
pub fn auto_init() -> Result<LoggerGuard> {
    if tracing::dispatcher::has_been_set() {
        return Ok(LoggerGuard::noop());
    }

    if std::env::var("STRATA_LOG").is_ok() || std::env::var("RUST_LOG").is_ok() {
        init_with(Config::from_env())
    } else if cfg!(debug_assertions) {
        init_with(Config::development())
    } else {
        init_with(Config::production())
    }
}

/// Initialize with default configuration
pub fn init() -> Result<LoggerGuard> {
    init_with(Config::default())
}

/// Initialize with custom configuration
pub fn init_with(config: Config) -> Result<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}

/// Initialize for tests. Idempotent: returns a no-op guard once a
/// subscriber is installed.
pub fn init_test() -> Result<LoggerGuard> {
    if tracing::dispatcher::has_been_set() {
        return Ok(LoggerGuard::noop());
    }
    match init_with(Config::test()) {
        Err(Error::AlreadyInitialized) => Ok(LoggerGuard::noop()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_test_is_idempotent() {
        assert!(init_test().is_ok());
        assert!(init_test().is_ok());
        info!("logged after init");
    }

    #[test]
    fn bad_filter_is_rejected_before_install() {
        let config = Config {
            level: "strata=notalevel".to_string(),
            ..Config::default()
        };
        let err = LoggerBuilder::from_config(config).build().unwrap_err();
        assert!(matches!(err, Error::Filter(_)));
    }
}
