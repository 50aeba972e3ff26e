//! Batch execution engine.
//!
//! A batch is an ordered list of plugins run sequentially on one dedicated
//! worker thread. At most one batch runs at a time per engine; the guard is a
//! compare-exchange on [`RunState::is_running`]. Cancellation is cooperative
//! and checked once before each plugin.

pub mod runner;

pub use runner::{LiveRunner, Outcomes, Pacing, PluginRunner, SimulatedRunner};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::Serialize;
use systools_plugin_api::TaskPlugin;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::EngineError;
use crate::plugins::events::{BatchReport, FailureRecord, LogLevel, Observer, PluginState};

/// Flags shared between the caller and the batch worker
#[derive(Debug, Default)]
pub struct RunState {
    is_running: AtomicBool,
    stop_requested: AtomicBool,
    reboot_required: AtomicBool,
}

/// Point-in-time copy of [`RunState`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStateSnapshot {
    pub is_running: bool,
    pub stop_requested: bool,
    pub reboot_required: bool,
}

impl RunState {
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn reboot_required(&self) -> bool {
        self.reboot_required.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> RunStateSnapshot {
        RunStateSnapshot {
            is_running: self.is_running(),
            stop_requested: self.stop_requested(),
            reboot_required: self.reboot_required(),
        }
    }

    fn try_start(&self) -> bool {
        self.is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Clears `is_running` when the worker leaves, even by unwinding
struct RunningGuard(Arc<RunState>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.is_running.store(false, Ordering::SeqCst);
    }
}

/// Which completion callback a batch ends with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    Interactive,
    Unattended,
}

/// Handle to a running batch
#[derive(Debug)]
pub struct BatchHandle {
    batch_id: Uuid,
    worker: JoinHandle<BatchReport>,
}

impl BatchHandle {
    pub fn id(&self) -> Uuid {
        self.batch_id
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Block until the batch has completed
    pub fn join(self) -> Result<BatchReport, EngineError> {
        self.worker.join().map_err(|_| EngineError::WorkerPanicked)
    }
}

/// Runs batches of plugins and reports through an [`Observer`]
pub struct ExecutionEngine {
    observer: Arc<dyn Observer>,
    runner: Arc<dyn PluginRunner>,
    state: Arc<RunState>,
}

impl ExecutionEngine {
    pub fn new(observer: Arc<dyn Observer>, runner: Arc<dyn PluginRunner>) -> Self {
        Self {
            observer,
            runner,
            state: Arc::new(RunState::default()),
        }
    }

    pub fn state(&self) -> RunStateSnapshot {
        self.state.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn reboot_required(&self) -> bool {
        self.state.reboot_required()
    }

    pub fn is_simulated(&self) -> bool {
        self.runner.is_simulated()
    }

    /// Ask the running batch to stop before its next plugin
    pub fn request_stop(&self) {
        self.state.stop_requested.store(true, Ordering::SeqCst);
        self.observer
            .on_log("Stop requested, the batch will halt before the next plugin", LogLevel::Warning);
    }

    /// Start a batch on a new worker thread and return immediately
    pub fn execute_batch(
        &self,
        plugins: Vec<Arc<dyn TaskPlugin>>,
        mode: BatchMode,
    ) -> Result<BatchHandle, EngineError> {
        if plugins.is_empty() {
            return Err(EngineError::EmptyBatch);
        }

        if !self.state.try_start() {
            self.observer
                .on_log("A batch is already running", LogLevel::Warning);
            return Err(EngineError::AlreadyRunning);
        }

        self.state.stop_requested.store(false, Ordering::SeqCst);
        self.state.reboot_required.store(false, Ordering::SeqCst);

        let batch_id = Uuid::new_v4();
        let worker = BatchWorker {
            batch_id,
            plugins,
            mode,
            observer: Arc::clone(&self.observer),
            runner: Arc::clone(&self.runner),
            state: Arc::clone(&self.state),
        };

        let spawned = std::thread::Builder::new()
            .name("systools-batch".to_string())
            .spawn(move || worker.run());

        match spawned {
            Ok(worker) => {
                debug!("Started batch {}", batch_id);
                Ok(BatchHandle { batch_id, worker })
            }
            Err(e) => {
                self.state.is_running.store(false, Ordering::SeqCst);
                error!("Failed to spawn batch worker: {}", e);
                Err(EngineError::Spawn(e))
            }
        }
    }
}

struct BatchWorker {
    batch_id: Uuid,
    plugins: Vec<Arc<dyn TaskPlugin>>,
    mode: BatchMode,
    observer: Arc<dyn Observer>,
    runner: Arc<dyn PluginRunner>,
    state: Arc<RunState>,
}

impl BatchWorker {
    fn log(&self, message: &str, level: LogLevel) {
        self.observer.on_log(message, level);
    }

    fn run(self) -> BatchReport {
        let running = RunningGuard(Arc::clone(&self.state));
        let total = self.plugins.len();
        let mut failures = Vec::new();
        let mut cancelled = false;

        self.log(
            &format!("Starting batch of {} plugin(s) ({:?})", total, self.mode),
            LogLevel::Info,
        );

        for (index, plugin) in self.plugins.iter().enumerate() {
            let name = plugin.name();
            self.observer
                .on_progress(index as f64 / total as f64 * 100.0, index, total);
            if self.mode == BatchMode::Unattended {
                self.observer.on_unattended_progress(index, total, name);
            }
            self.observer
                .on_plugin_state_change(name, PluginState::Starting);

            if self.state.stop_requested() {
                failures.push(FailureRecord::cancelled(name));
                failures.extend(
                    self.plugins[index + 1..]
                        .iter()
                        .map(|p| FailureRecord::not_executed(p.name())),
                );
                self.log(
                    &format!("Batch cancelled before {}; {} plugin(s) not run", name, total - index),
                    LogLevel::Warning,
                );
                cancelled = true;
                break;
            }

            self.log(
                &format!("[{}/{}] {}", index + 1, total, plugin.progress_message()),
                LogLevel::Info,
            );
            let result = self.runner.run(plugin.as_ref());

            if result.reboot_requested {
                self.state.reboot_required.store(true, Ordering::SeqCst);
                self.log(&format!("{} requires a reboot", name), LogLevel::Warning);
            }

            if result.success {
                self.log(&format!("{} completed", name), LogLevel::Success);
                if let Some(message) = result.message.as_deref().filter(|m| !m.is_empty()) {
                    self.log(message, LogLevel::Info);
                }
            } else {
                let error = result.error_message();
                self.log(&format!("{} failed: {}", name, error), LogLevel::Error);
                failures.push(FailureRecord::failed(name, error));
            }

            self.observer
                .on_plugin_state_change(name, PluginState::Finished);
        }

        let report = BatchReport {
            batch_id: self.batch_id,
            total,
            failures,
            reboot_required: self.state.reboot_required(),
            cancelled,
        };
        debug!(
            batch = %self.batch_id,
            "Batch finished: {}/{} succeeded",
            report.succeeded(),
            report.total
        );

        drop(running);
        match self.mode {
            BatchMode::Interactive => self.observer.on_batch_complete(&report),
            BatchMode::Unattended => {
                self.observer
                    .on_unattended_complete(report.succeeded(), report.total, &report.failures)
            }
        }
        report
    }
}
