use std::collections::BTreeMap;
use std::sync::Mutex;

/// Sink for failures that must be surfaced without crashing the caller.
pub trait ExceptionReporter: Send + Sync {
    fn report(&self, error: &dyn std::error::Error, context: &BTreeMap<String, String>);

    fn tag(&self, key: &str, value: &str);
}

/// Default reporter: turns reports into structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ExceptionReporter for TracingReporter {
    fn report(&self, error: &dyn std::error::Error, context: &BTreeMap<String, String>) {
        tracing::error!(error = %error, context = ?context, "exception reported");
    }

    fn tag(&self, key: &str, value: &str) {
        tracing::debug!(key, value, "monitoring tag set");
    }
}

/// A captured report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub message: String,
    pub context: BTreeMap<String, String>,
}

/// Keeps every report and tag in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<Report>>,
    tags: Mutex<BTreeMap<String, String>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn tags(&self) -> BTreeMap<String, String> {
        self.tags.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ExceptionReporter for CollectingReporter {
    fn report(&self, error: &dyn std::error::Error, context: &BTreeMap<String, String>) {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Report {
                message: error.to_string(),
                context: context.clone(),
            });
    }

    fn tag(&self, key: &str, value: &str) {
        self.tags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }
}
