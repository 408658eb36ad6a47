//! Leak-report sinks
//!
//! A [`ScopeRegistry`](super::ScopeRegistry) destroying a scope that still
//! owns memory drives its sink through one report:
//!
//! ```text
//! begin(name, bytes, allocs, children)
//!   alloc(file, line, bytes, allocs)   one per call site with live memory
//!   child(name, bytes, allocs)         one per child scope still open
//! end()
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

#[cfg(feature = "logging")]
use strata_log::warn;

/// Receiver of leak reports.
///
/// `Send` so that a registry can move between threads behind a lock.
pub trait LeakReportSink: Send {
    /// A non-empty scope is being destroyed
    fn begin(&mut self, name: &str, bytes: usize, allocs: usize, children: usize);

    /// One call site of that scope with outstanding allocations
    fn alloc(&mut self, file: &str, line: u32, bytes: usize, allocs: usize);

    /// A child scope that is still open
    fn child(&mut self, name: &str, bytes: usize, allocs: usize);

    /// End of the report
    fn end(&mut self);
}

/// Sink that drops every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLeakSink;

impl LeakReportSink for NoopLeakSink {
    fn begin(&mut self, _name: &str, _bytes: usize, _allocs: usize, _children: usize) {}
    fn alloc(&mut self, _file: &str, _line: u32, _bytes: usize, _allocs: usize) {}
    fn child(&mut self, _name: &str, _bytes: usize, _allocs: usize) {}
    fn end(&mut self) {}
}

/// Sink that emits each report line as a `warn!` event.
#[cfg(feature = "logging")]
#[derive(Debug, Clone, Default)]
pub struct TracingLeakSink {
    scope: String,
}

#[cfg(feature = "logging")]
impl LeakReportSink for TracingLeakSink {
    fn begin(&mut self, name: &str, bytes: usize, allocs: usize, children: usize) {
        self.scope = name.to_owned();
        warn!(scope = name, bytes, allocs, children, "scope destroyed with live memory");
    }

    fn alloc(&mut self, file: &str, line: u32, bytes: usize, allocs: usize) {
        warn!(scope = %self.scope, file, line, bytes, allocs, "leaked from call site");
    }

    fn child(&mut self, name: &str, bytes: usize, allocs: usize) {
        warn!(scope = %self.scope, child = name, bytes, allocs, "child scope still open");
    }

    fn end(&mut self) {
        self.scope.clear();
    }
}

/// One callback received by a [`LeakRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeakEvent {
    /// `begin` callback
    Begin {
        name: String,
        bytes: usize,
        allocs: usize,
        children: usize,
    },
    /// `alloc` callback
    Alloc {
        file: String,
        line: u32,
        bytes: usize,
        allocs: usize,
    },
    /// `child` callback
    Child {
        name: String,
        bytes: usize,
        allocs: usize,
    },
    /// `end` callback
    End,
}

/// Sink that stores every callback.
///
/// Clones share the same event list, so one clone can be handed to the
/// registry while another is kept for inspection.
///
/// ```
/// use strata_memory::scope::{LeakEvent, LeakRecorder, LeakReportSink};
///
/// let recorder = LeakRecorder::new();
/// let mut sink = recorder.clone();
/// sink.end();
/// assert_eq!(recorder.events(), vec![LeakEvent::End]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct LeakRecorder {
    events: Arc<Mutex<Vec<LeakEvent>>>,
}

impl LeakRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event so far
    pub fn events(&self) -> Vec<LeakEvent> {
        self.events.lock().clone()
    }

    /// Drain the recorded events
    pub fn take(&self) -> Vec<LeakEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Whether nothing was reported
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    fn push(&self, event: LeakEvent) {
        self.events.lock().push(event);
    }
}

impl LeakReportSink for LeakRecorder {
    fn begin(&mut self, name: &str, bytes: usize, allocs: usize, children: usize) {
        self.push(LeakEvent::Begin {
            name: name.to_owned(),
            bytes,
            allocs,
            children,
        });
    }

    fn alloc(&mut self, file: &str, line: u32, bytes: usize, allocs: usize) {
        self.push(LeakEvent::Alloc {
            file: file.to_owned(),
            line,
            bytes,
            allocs,
        });
    }

    fn child(&mut self, name: &str, bytes: usize, allocs: usize) {
        self.push(LeakEvent::Child {
            name: name.to_owned(),
            bytes,
            allocs,
        });
    }

    fn end(&mut self) {
        self.push(LeakEvent::End);
    }
}

/// Sink installed by a fresh registry.
pub(crate) fn default_sink() -> Box<dyn LeakReportSink> {
    #[cfg(feature = "logging")]
    {
        Box::new(TracingLeakSink::default())
    }
    #[cfg(not(feature = "logging"))]
    {
        Box::new(NoopLeakSink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_recorder_clones_share_events() {
        let recorder = LeakRecorder::new();
        let mut sink = recorder.clone();
        sink.begin("io", 16, 1, 0);
        sink.alloc("io.rs", 3, 16, 1);
        sink.end();

        assert_eq!(
            recorder.take(),
            vec![
                LeakEvent::Begin {
                    name: "io".into(),
                    bytes: 16,
                    allocs: 1,
                    children: 0
                },
                LeakEvent::Alloc {
                    file: "io.rs".into(),
                    line: 3,
                    bytes: 16,
                    allocs: 1
                },
                LeakEvent::End,
            ]
        );
        assert!(recorder.is_empty());
    }

    #[cfg(feature = "logging")]
    #[test]
    fn test_tracing_sink_tracks_current_scope() {
        let mut sink = TracingLeakSink::default();
        sink.begin("audio", 8, 1, 0);
        assert_eq!(sink.scope, "audio");
        sink.end();
        assert!(sink.scope.is_empty());
    }
}
