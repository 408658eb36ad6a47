//! Per-call-site aggregation of live allocations

use super::ScopeHandle;
use crate::core::types::SourceLocation;

/// Identifies one call site within one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TraceKey {
    pub scope: ScopeHandle,
    pub file: &'static str,
    pub line: u32,
}

impl TraceKey {
    pub fn new(scope: ScopeHandle, location: SourceLocation) -> Self {
        Self {
            scope,
            file: location.file,
            line: location.line,
        }
    }

    pub fn location(&self) -> SourceLocation {
        SourceLocation::new(self.file, self.line)
    }
}

/// Live allocations attributed to one call site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceStats {
    /// Bytes still allocated from this site
    pub bytes: usize,
    /// Allocations still outstanding from this site
    pub allocs: usize,
}

impl TraceStats {
    pub(crate) fn record_allocation(&mut self, size: usize) {
        self.bytes += size;
        self.allocs += 1;
    }

    pub(crate) fn record_deallocation(&mut self, size: usize) {
        debug_assert!(self.allocs > 0 && self.bytes >= size);
        self.bytes -= size;
        self.allocs -= 1;
    }

    /// Nothing from this site is outstanding
    pub fn is_empty(&self) -> bool {
        self.allocs == 0
    }
}

/// Reverse-map entry for a pointer handed out through a scope.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LiveAllocation {
    pub trace: TraceKey,
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_balance() {
        let mut stats = TraceStats::default();
        stats.record_allocation(100);
        stats.record_allocation(28);
        stats.record_deallocation(100);
        assert_eq!(stats, TraceStats { bytes: 28, allocs: 1 });
        stats.record_deallocation(28);
        assert!(stats.is_empty());
    }

    #[test]
    fn test_key_round_trips_location() {
        let here = SourceLocation::new("render.rs", 42);
        let key = TraceKey::new(ScopeHandle::ROOT, here);
        assert_eq!(key.location(), here);
    }
}
