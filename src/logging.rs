use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LoggingConfig, RunMode};
use crate::{Error, Result};

/// Log file opened for an unattended run
#[derive(Debug, Clone)]
pub struct AutoRunLog {
    pub path: PathBuf,
    pub started: DateTime<Local>,
}

/// `SysTools_AutoRun_<YYYYmmdd_HHMMSS>.log` inside `dir`
pub fn auto_run_log_path(dir: &Path, started: &DateTime<Local>) -> PathBuf {
    dir.join(format!(
        "SysTools_AutoRun_{}.log",
        started.format("%Y%m%d_%H%M%S")
    ))
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "systools={level},systools_plugin_api={level},builtin_plugins={level}"
        ))
    })
}

/// Install the global subscriber.
///
/// Unattended runs also write every line to a log file, returned so the
/// caller can announce it.
pub fn init_logging(config: &LoggingConfig, mode: RunMode) -> Result<Option<AutoRunLog>> {
    let auto_run = if mode == RunMode::Unattended && config.auto_run_file {
        let started = Local::now();
        let path = auto_run_log_path(&config.log_dir(), &started);
        let file = open_log_file(&path)?;
        Some((AutoRunLog { path, started }, file))
    } else {
        None
    };

    let file_layer = auto_run.as_ref().map(|(_, file)| -> Result<_> {
        let file = file.try_clone()?;
        Ok(fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(false))
    });
    let file_layer = file_layer.transpose()?;

    tracing_subscriber::registry()
        .with(filter(&config.level))
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    Ok(auto_run.map(|(log, _)| log))
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(file)
}
