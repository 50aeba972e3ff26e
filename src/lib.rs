//! # SysTools
//!
//! Plugin-driven runner for multi-step system deployment tasks.
//!
//! ## Features
//!
//! - **Plugin discovery**: TOML manifests in a plugin directory, loaded in
//!   file-name order through a registry of plugin kinds
//! - **Execution engine**: one batch at a time on a worker thread, with
//!   progress events, cooperative cancellation and fault isolation
//! - **Unattended mode**: runs everything, then reboots and/or removes the
//!   installation as configured
//! - **Simulation**: debug modes fabricate outcomes without touching the
//!   system
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use systools::config::Config;
//! use systools::coordinator::RunCoordinator;
//! use systools::plugins::TracingObserver;
//!
//! # fn main() -> systools::Result<()> {
//! let registry = systools::cli::plugin_registry();
//! let mut coordinator = RunCoordinator::new(Config::default(), registry, Arc::new(TracingObserver));
//! coordinator.load_plugins();
//!
//! let report = coordinator.run_all()?.join()?;
//! println!("{}/{} succeeded", report.succeeded(), report.total);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod disposition;
pub mod engine;
pub mod error;
pub mod logging;
pub mod plugins;

// Re-export commonly used types
pub use coordinator::{RebootPrompt, RunCoordinator, UnattendedOutcome};
pub use engine::{BatchHandle, BatchMode, ExecutionEngine};
pub use error::{EngineError, Error, Result};
pub use plugins::{BatchReport, FailureRecord, Observer};
pub use systools_plugin_api::{ExecutionResult, PluginRegistry, TaskPlugin};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
