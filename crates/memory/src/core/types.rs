//! Common types and constants for memory management

/// Memory alignment requirements
pub mod alignment {
    /// Alignment of every payload handed out by the allocators in this crate
    pub const MIN_ALIGN: usize = 8;

    /// Fallback page size when the platform cannot be queried
    pub const PAGE_SIZE: usize = 4096;
}

/// Memory size constants
pub mod size {
    /// 1 Kilobyte
    pub const KB: usize = 1024;

    /// 1 Megabyte
    pub const MB: usize = 1024 * KB;

    /// 1 Gigabyte
    pub const GB: usize = 1024 * MB;
}

/// Source position of an allocation call site.
///
/// Captured through `#[track_caller]` so that every allocation routed through
/// a scope can be attributed to the line that requested it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceLocation {
    /// Source file as reported by the compiler
    pub file: &'static str,
    /// 1-based line number
    pub line: u32,
}

impl SourceLocation {
    /// Create a location from its parts
    #[must_use]
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Location of the caller of the current `#[track_caller]` function
    #[track_caller]
    #[must_use]
    pub fn caller() -> Self {
        let loc = std::panic::Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
        }
    }
}

impl From<&'static std::panic::Location<'static>> for SourceLocation {
    fn from(loc: &'static std::panic::Location<'static>) -> Self {
        Self {
            file: loc.file(),
            line: loc.line(),
        }
    }
}

impl core::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}
