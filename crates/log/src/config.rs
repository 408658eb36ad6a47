//! Logger configuration.
//!
//! [`Config::from_env`] reads:
//!
//! | Variable | Effect |
//! |---|---|
//! | `STRATA_LOG` | filter directives, preferred over `RUST_LOG` |
//! | `RUST_LOG` | filter directives |
//! | `STRATA_LOG_FORMAT` | `pretty`, `compact` or `json` |
//! | `STRATA_LOG_TIME`, `STRATA_LOG_SOURCE`, `STRATA_LOG_COLORS` | `0`/`false` disables |
//!
//! The allocator crates log under their module paths, so
//! `strata_memory::arena=trace` shows commit growth and
//! `strata_memory::scope=warn` shows only leak reports.

use serde::{Deserialize, Serialize};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `EnvFilter` directives, e.g. `"info,strata_memory::arena=trace"`
    pub level: String,
    /// Event layout
    pub format: Format,
    /// Output stream
    pub writer: WriterConfig,
    /// Metadata toggles
    pub display: DisplayConfig,
}

/// Event layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line, for reading leak reports by eye
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event
    Json,
}

/// Verbosity of a single filter directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    /// Directive spelling of the level
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where events are written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum WriterConfig {
    #[default]
    Stderr,
    Stdout,
}

/// Which event metadata is printed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools, missing_docs)]
pub struct DisplayConfig {
    pub time: bool,
    /// `file:line` of the logging statement, not of the allocation
    pub source: bool,
    pub target: bool,
    pub thread_ids: bool,
    pub thread_names: bool,
    pub colors: bool,
    /// JSON only
    pub span_list: bool,
    /// JSON only: event fields at the top level
    pub flatten: bool,
}

// ============================================================================
// Presets
// ============================================================================

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Compact,
            writer: WriterConfig::Stderr,
            display: DisplayConfig::default(),
        }
    }
}

impl Config {
    /// Defaults overridden by the variables listed in the module docs
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(level) = ["STRATA_LOG", "RUST_LOG"]
            .iter()
            .find_map(|name| std::env::var(name).ok())
        {
            config.level = level;
        }
        if let Ok(format) = std::env::var("STRATA_LOG_FORMAT") {
            config.format = Format::parse_lossy(&format);
        }

        config.display.apply_env();
        config
    }

    /// Pretty debug output with source locations
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: Format::Pretty,
            display: DisplayConfig {
                colors: true,
                source: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Flattened JSON at info
    #[must_use]
    pub fn production() -> Self {
        Self {
            format: Format::Json,
            display: DisplayConfig {
                colors: false,
                source: false,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Everything, without colors or timestamps so captured output is stable
    #[must_use]
    pub fn test() -> Self {
        Self {
            level: "trace".to_string(),
            display: DisplayConfig {
                colors: false,
                time: false,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Commit, decommit and chunk traffic of the allocators.
    ///
    /// ```
    /// let config = strata_log::Config::allocator_trace();
    /// assert_eq!(config.level, "info,strata_memory=trace");
    /// ```
    #[must_use]
    pub fn allocator_trace() -> Self {
        Self::default().with_directive("strata_memory", Level::Trace)
    }

    /// Only scope leak reports, one line per call site
    #[must_use]
    pub fn leak_report() -> Self {
        Self {
            level: "off".to_string(),
            display: DisplayConfig {
                time: false,
                target: false,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
        .with_directive("strata_memory::scope", Level::Warn)
    }

    /// Append a `target=level` directive to the filter
    #[must_use]
    pub fn with_directive(mut self, target: &str, level: Level) -> Self {
        if !self.level.is_empty() {
            self.level.push(',');
        }
        self.level.push_str(target);
        self.level.push('=');
        self.level.push_str(level.as_str());
        self
    }
}

impl Format {
    /// Parse a format name, falling back to [`Format::Compact`].
    #[must_use]
    pub fn parse_lossy(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "pretty" => Format::Pretty,
            "json" => Format::Json,
            _ => Format::Compact,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time: true,
            source: cfg!(debug_assertions),
            target: true,
            thread_ids: false,
            thread_names: false,
            colors: cfg!(feature = "ansi") && std::io::IsTerminal::is_terminal(&std::io::stderr()),
            span_list: true,
            flatten: true,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
}

impl DisplayConfig {
    fn apply_env(&mut self) {
        if let Some(on) = env_flag("STRATA_LOG_TIME") {
            self.time = on;
        }
        if let Some(on) = env_flag("STRATA_LOG_SOURCE") {
            self.source = on;
        }
        if let Some(on) = env_flag("STRATA_LOG_COLORS") {
            self.colors = on;
        }
    }
}
