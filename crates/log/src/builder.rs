//! Logger builder implementation

use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::{
    Error, Result,
    config::{Config, Format},
    writer,
};

/// Logger builder
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
}

/// Guard that keeps the logger alive.
///
/// The subscriber is process-global once installed; the guard marks the
/// caller that owns it and is where flushing resources would hang.
#[derive(Debug)]
#[must_use = "dropping the guard immediately is almost always a mistake"]
pub struct LoggerGuard {
    installed: bool,
}

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Build and install the global subscriber.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Filter string cannot be parsed
    /// - A global subscriber is already installed
    pub fn build(self) -> Result<LoggerGuard> {
        let filter = EnvFilter::try_new(&self.config.level)
            .map_err(|e| Error::Filter(format!("{}: {}", &self.config.level, e)))?;

        let writer = writer::make_writer(self.config.writer);
        let display = &self.config.display;

        let fmt_layer = match self.config.format {
            Format::Pretty => create_fmt_layer!(pretty, display, writer),
            Format::Compact => create_fmt_layer!(compact, display, writer),
            Format::Json => create_json_layer!(display, writer),
        };

        Registry::default()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|_| Error::AlreadyInitialized)?;

        Ok(LoggerGuard { installed: true })
    }
}

impl LoggerGuard {
    pub(crate) fn noop() -> Self {
        Self { installed: false }
    }

    /// Whether this guard's builder installed the global subscriber.
    pub fn is_installed(&self) -> bool {
        self.installed
    }
}
