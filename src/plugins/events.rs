//! Observer contract between the runner and any front-end.
//!
//! The engine and coordinator report everything they do through an
//! [`Observer`]. Callbacks are invoked directly from the batch worker thread,
//! one at a time and in order; an observer that drives a UI is responsible
//! for marshaling the calls onto its own thread.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Reason recorded for the plugin that was about to run when a stop arrived
pub const CANCELLED_BY_USER: &str = "cancelled by user";

/// Reason recorded for every plugin skipped after a stop
pub const NOT_EXECUTED: &str = "not executed (cancelled)";

/// Severity of a log line sent to the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Success => "SUCCESS",
        };
        f.write_str(label)
    }
}

/// Lifecycle notification for a single plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Starting,
    Finished,
}

/// Why a plugin ended up in the failure list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The plugin ran and failed, or faulted
    Failed,
    /// The plugin was about to run when the stop request was seen
    Cancelled,
    /// The plugin was skipped because of an earlier stop request
    NotExecuted,
}

/// A plugin that did not succeed, with a human-readable reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub name: String,
    pub error: String,
    pub kind: FailureKind,
}

impl FailureRecord {
    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            kind: FailureKind::Failed,
        }
    }

    pub fn cancelled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: CANCELLED_BY_USER.to_string(),
            kind: FailureKind::Cancelled,
        }
    }

    pub fn not_executed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: NOT_EXECUTED.to_string(),
            kind: FailureKind::NotExecuted,
        }
    }

    /// True for records produced by a stop request rather than a real failure
    pub fn is_cancellation(&self) -> bool {
        self.kind != FailureKind::Failed
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.error)
    }
}

/// Aggregate outcome of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub total: usize,
    pub failures: Vec<FailureRecord>,
    pub reboot_required: bool,
    pub cancelled: bool,
}

impl BatchReport {
    /// Plugins that ran and succeeded
    pub fn succeeded(&self) -> usize {
        self.total.saturating_sub(self.failures.len())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Callbacks a front-end implements to follow a run.
///
/// Every method has an empty default so observers only implement what they
/// render.
pub trait Observer: Send + Sync {
    fn on_log(&self, _message: &str, _level: LogLevel) {}

    /// Emitted before plugin `current` of `total` runs
    fn on_progress(&self, _percent: f64, _current: usize, _total: usize) {}

    fn on_plugin_state_change(&self, _name: &str, _state: PluginState) {}

    /// Completion of an interactively started batch
    fn on_batch_complete(&self, _report: &BatchReport) {}

    /// Emitted before each plugin of an unattended batch
    fn on_unattended_progress(&self, _current: usize, _total: usize, _plugin_name: &str) {}

    /// Completion of an unattended batch
    fn on_unattended_complete(&self, _succeeded: usize, _total: usize, _failures: &[FailureRecord]) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// Forwards log lines to `tracing`, so they reach the console and log file
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_log(&self, message: &str, level: LogLevel) {
        match level {
            LogLevel::Error => tracing::error!("{}", message),
            LogLevel::Warning => tracing::warn!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Success => tracing::info!(outcome = "success", "{}", message),
        }
    }
}

/// Forwards every callback to each inner observer, in order
#[derive(Default, Clone)]
pub struct FanOut {
    observers: Vec<Arc<dyn Observer>>,
}

impl FanOut {
    pub fn new(observers: Vec<Arc<dyn Observer>>) -> Self {
        Self { observers }
    }

    pub fn push(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }
}

impl Observer for FanOut {
    fn on_log(&self, message: &str, level: LogLevel) {
        self.observers.iter().for_each(|o| o.on_log(message, level));
    }

    fn on_progress(&self, percent: f64, current: usize, total: usize) {
        self.observers
            .iter()
            .for_each(|o| o.on_progress(percent, current, total));
    }

    fn on_plugin_state_change(&self, name: &str, state: PluginState) {
        self.observers
            .iter()
            .for_each(|o| o.on_plugin_state_change(name, state));
    }

    fn on_batch_complete(&self, report: &BatchReport) {
        self.observers.iter().for_each(|o| o.on_batch_complete(report));
    }

    fn on_unattended_progress(&self, current: usize, total: usize, plugin_name: &str) {
        self.observers
            .iter()
            .for_each(|o| o.on_unattended_progress(current, total, plugin_name));
    }

    fn on_unattended_complete(&self, succeeded: usize, total: usize, failures: &[FailureRecord]) {
        self.observers
            .iter()
            .for_each(|o| o.on_unattended_complete(succeeded, total, failures));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Everything an observer saw, in order
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Seen {
        Log(String, LogLevel),
        Progress(f64, usize, usize),
        State(String, PluginState),
        BatchComplete(Vec<FailureRecord>),
        UnattendedProgress(usize, usize, String),
        UnattendedComplete(usize, usize, Vec<FailureRecord>),
    }

    #[derive(Default)]
    pub(crate) struct Recorder {
        events: Mutex<Vec<Seen>>,
    }

    impl Recorder {
        pub(crate) fn events(&self) -> Vec<Seen> {
            self.events.lock().unwrap().clone()
        }

        /// Events without the log lines
        pub(crate) fn structural(&self) -> Vec<Seen> {
            self.events()
                .into_iter()
                .filter(|e| !matches!(e, Seen::Log(..)))
                .collect()
        }

        pub(crate) fn logs_at(&self, level: LogLevel) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Seen::Log(message, l) if l == level => Some(message),
                    _ => None,
                })
                .collect()
        }

        fn push(&self, seen: Seen) {
            self.events.lock().unwrap().push(seen);
        }
    }

    impl Observer for Recorder {
        fn on_log(&self, message: &str, level: LogLevel) {
            self.push(Seen::Log(message.to_string(), level));
        }

        fn on_progress(&self, percent: f64, current: usize, total: usize) {
            self.push(Seen::Progress(percent, current, total));
        }

        fn on_plugin_state_change(&self, name: &str, state: PluginState) {
            self.push(Seen::State(name.to_string(), state));
        }

        fn on_batch_complete(&self, report: &BatchReport) {
            self.push(Seen::BatchComplete(report.failures.clone()));
        }

        fn on_unattended_progress(&self, current: usize, total: usize, plugin_name: &str) {
            self.push(Seen::UnattendedProgress(current, total, plugin_name.to_string()));
        }

        fn on_unattended_complete(&self, succeeded: usize, total: usize, failures: &[FailureRecord]) {
            self.push(Seen::UnattendedComplete(succeeded, total, failures.to_vec()));
        }
    }
}
