use std::sync::Mutex;

use tracing::error;

/// Sink for suppressed scrape failures.
///
/// Every failure the pipeline contains (skipped row, abandoned walk,
/// exhausted retry budget) is reported here with the failing URL and error
/// kind so a run can be diagnosed after the fact. Injected at construction
/// so tests can substitute a recording sink.
pub trait ErrorSink: Send + Sync {
    fn record(&self, url: &str, kind: &str);
}

/// Default sink backed by the tracing subscriber.
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn record(&self, url: &str, kind: &str) {
        error!(url, kind, "scrape failure");
    }
}

/// In-memory sink used by tests to assert on suppressed failures.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, String)> {
        self.events.lock().expect("sink poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("sink poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for MemorySink {
    fn record(&self, url: &str, kind: &str) {
        self.events
            .lock()
            .expect("sink poisoned")
            .push((url.to_string(), kind.to_string()));
    }
}
