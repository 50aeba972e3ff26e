//! Top-level run control.
//!
//! The coordinator owns the loaded plugin list and the engine, turns the
//! front-end's selection into batches and, at the end of a run, decides
//! whether to reboot and/or clean up.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use systools_plugin_api::{PluginRegistry, TaskPlugin};
use tracing::{info, warn};

use crate::config::{Config, RunMode, Simulation};
use crate::disposition::{Disposition, DryRunActions, HostActions, SystemActions};
use crate::engine::{
    BatchHandle, BatchMode, ExecutionEngine, LiveRunner, Outcomes, Pacing, PluginRunner,
    RunStateSnapshot, SimulatedRunner,
};
use crate::error::EngineError;
use crate::plugins::discovery::{Discovery, PluginDiscovery, PluginSummary};
use crate::plugins::events::{BatchReport, LogLevel, Observer};
use crate::{Error, Result};

/// Asks whether a required reboot may proceed
#[async_trait]
pub trait RebootPrompt: Send + Sync {
    /// Resolve to the answer, or to `true` once `countdown` elapses
    async fn confirm_reboot(&self, countdown: Duration) -> bool;
}

/// Prompt that answers without asking
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

#[async_trait]
impl RebootPrompt for FixedAnswer {
    async fn confirm_reboot(&self, _countdown: Duration) -> bool {
        self.0
    }
}

/// Result of an unattended run
#[derive(Debug, Clone, Serialize)]
pub struct UnattendedOutcome {
    pub report: BatchReport,
    pub user_wants_reboot: bool,
    pub disposition: Disposition,
}

/// Runner matching the simulation setting
pub fn runner_for(config: &Config) -> Arc<dyn PluginRunner> {
    let pacing = match config.run.mode {
        RunMode::Interactive => Pacing::INTERACTIVE,
        RunMode::Unattended => Pacing::UNATTENDED,
    };
    match config.run.simulation {
        Simulation::Off => Arc::new(LiveRunner),
        Simulation::Random => Arc::new(SimulatedRunner::new(Outcomes::random(), pacing)),
        Simulation::AllSuccess => Arc::new(SimulatedRunner::new(Outcomes::AllSuccess, pacing)),
    }
}

pub struct RunCoordinator {
    config: Config,
    plugins_dir: PathBuf,
    discovery: PluginDiscovery,
    observer: Arc<dyn Observer>,
    engine: ExecutionEngine,
    loaded: Discovery,
}

impl RunCoordinator {
    pub fn new(config: Config, registry: PluginRegistry, observer: Arc<dyn Observer>) -> Self {
        let runner = runner_for(&config);
        Self::with_runner(config, registry, observer, runner)
    }

    pub fn with_runner(
        config: Config,
        registry: PluginRegistry,
        observer: Arc<dyn Observer>,
        runner: Arc<dyn PluginRunner>,
    ) -> Self {
        let plugins_dir = config.plugins_dir();
        Self {
            engine: ExecutionEngine::new(Arc::clone(&observer), runner),
            discovery: PluginDiscovery::new(registry),
            loaded: Discovery::default(),
            plugins_dir,
            observer,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mode(&self) -> RunMode {
        self.config.run.mode
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    fn log(&self, message: &str, level: LogLevel) {
        self.observer.on_log(message, level);
    }

    /// Discover plugins from the configured directory
    pub fn load_plugins(&mut self) -> usize {
        self.loaded = self.discovery.discover(&self.plugins_dir);
        let count = self.loaded.len();

        if count > 0 {
            self.log(&format!("Loaded {} plugin(s)", count), LogLevel::Info);
        } else {
            self.log(
                &format!("No plugins found in {}", self.plugins_dir.display()),
                LogLevel::Warning,
            );
            self.log_directory_contents();
        }

        for summary in &self.loaded.unavailable {
            self.log(
                &format!("{} is not available on this system", summary.name),
                LogLevel::Warning,
            );
        }
        count
    }

    /// Re-read the plugin directory
    pub fn reload(&mut self) -> usize {
        info!("Reloading plugins from {}", self.plugins_dir.display());
        self.load_plugins()
    }

    fn log_directory_contents(&self) {
        match fs::read_dir(&self.plugins_dir) {
            Ok(entries) => {
                let mut names: Vec<String> = entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.file_name().to_string_lossy().into_owned())
                    .collect();
                names.sort();
                self.log(
                    &format!("Directory contents: [{}]", names.join(", ")),
                    LogLevel::Info,
                );
            }
            Err(_) => self.log(
                &format!("Plugin directory does not exist: {}", self.plugins_dir.display()),
                LogLevel::Error,
            ),
        }
    }

    pub fn discovery(&self) -> &Discovery {
        &self.loaded
    }

    pub fn plugins(&self) -> &[Arc<dyn TaskPlugin>] {
        &self.loaded.plugins
    }

    pub fn unavailable(&self) -> &[PluginSummary] {
        &self.loaded.unavailable
    }

    pub fn state(&self) -> RunStateSnapshot {
        self.engine.state()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    pub fn reboot_required(&self) -> bool {
        self.engine.reboot_required()
    }

    pub fn request_stop(&self) {
        self.engine.request_stop();
    }

    /// Run the plugins at `indices` (zero-based) in discovery order.
    /// Duplicates and out-of-range indices are dropped.
    pub fn run_selection(&self, indices: &[usize]) -> Result<BatchHandle> {
        let mut indices = indices.to_vec();
        indices.sort_unstable();
        indices.dedup();

        let selected = self.loaded.select(&indices);
        if selected.is_empty() {
            self.log("No plugins selected", LogLevel::Warning);
            return Err(Error::EmptySelection);
        }

        self.log(
            &format!("Running {} selected plugin(s)", selected.len()),
            LogLevel::Info,
        );
        Ok(self.engine.execute_batch(selected, BatchMode::Interactive)?)
    }

    pub fn run_all(&self) -> Result<BatchHandle> {
        if self.loaded.is_empty() {
            self.log("No plugins to run", LogLevel::Warning);
            return Err(Error::EmptySelection);
        }
        Ok(self
            .engine
            .execute_batch(self.loaded.plugins.clone(), BatchMode::Interactive)?)
    }

    /// Disposition for the configured cleanup flag and the user's answer
    pub fn disposition(&self, user_wants_reboot: bool) -> Disposition {
        Disposition::decide(self.config.run.cleanup, user_wants_reboot)
    }

    /// Actions matching the run: dry run when simulating
    pub fn system_actions(&self) -> Arc<dyn SystemActions> {
        if self.config.run.simulation.is_active() {
            Arc::new(DryRunActions::new())
        } else {
            Arc::new(HostActions::detect().with_install_marker(&self.config.plugins.set_name))
        }
    }

    /// Apply the end-of-session disposition chosen by the front-end
    pub fn finish(&self, user_wants_reboot: bool, actions: &dyn SystemActions) -> Result<Disposition> {
        let disposition = self.disposition(user_wants_reboot);
        if disposition.is_destructive() {
            self.log(&format!("Finishing: {}", disposition), LogLevel::Info);
        }

        if let Err(e) = disposition.apply(actions, &self.config.run.timing()) {
            self.log(&e.to_string(), LogLevel::Error);
            return Err(e.into());
        }
        Ok(disposition)
    }

    /// Run every loaded plugin, then reboot and/or clean up without
    /// further input apart from the reboot countdown
    pub async fn run_unattended(
        &self,
        prompt: &dyn RebootPrompt,
        actions: &dyn SystemActions,
    ) -> Result<UnattendedOutcome> {
        let total = self.loaded.len();
        if total == 0 {
            let message = format!("No plugins found in {}", self.plugins_dir.display());
            self.observer.on_unattended_progress(0, 0, &message);
            self.log(&message, LogLevel::Error);
            return Err(Error::NoPluginsFound {
                dir: self.plugins_dir.clone(),
            });
        }

        self.log(
            &format!("Unattended run of {} plugin(s)", total),
            LogLevel::Info,
        );
        let handle = self
            .engine
            .execute_batch(self.loaded.plugins.clone(), BatchMode::Unattended)?;
        let report = tokio::task::spawn_blocking(move || handle.join())
            .await
            .map_err(|_| EngineError::WorkerPanicked)??;

        if report.all_succeeded() {
            self.log("All plugins completed successfully", LogLevel::Success);
        } else {
            warn!("{} of {} plugin(s) failed", report.failures.len(), report.total);
        }

        let user_wants_reboot = if report.reboot_required {
            let countdown = self.config.run.reboot_countdown();
            self.log(
                &format!(
                    "A reboot is required, rebooting in {}s unless declined",
                    countdown.as_secs()
                ),
                LogLevel::Warning,
            );
            prompt.confirm_reboot(countdown).await
        } else {
            false
        };

        let disposition = self.finish(user_wants_reboot, actions)?;
        Ok(UnattendedOutcome {
            report,
            user_wants_reboot,
            disposition,
        })
    }
}
