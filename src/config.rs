//! Configuration file handling.
//!
//! ```toml
//! [plugins]
//! base_dir = "/opt/systools"
//!
//! [run]
//! reboot_countdown_secs = 15
//! reboot_delay_secs = 5
//! cleanup_grace_secs = 10
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every key is optional. Command-line flags are applied on top with
//! [`Config::apply_overrides`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::disposition::{is_dev_build, DispositionTiming};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub plugins: PluginsConfig,
    pub run: RunConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Explicit plugin directory; wins over `base_dir` and the set names
    pub dir: Option<PathBuf>,
    /// Directory holding the plugin sets, defaults to the executable's directory
    pub base_dir: Option<PathBuf>,
    pub set_name: String,
    pub test_set_name: String,
    /// Load from `test_set_name` instead of `set_name`
    pub use_test_set: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            base_dir: None,
            set_name: "plugins".to_string(),
            test_set_name: "plugins_test".to_string(),
            use_test_set: false,
        }
    }
}

/// Whether the operator is present
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Interactive,
    Unattended,
}

/// Whether plugins really run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Simulation {
    #[default]
    Off,
    /// Fabricated outcomes, 70 % success
    Random,
    AllSuccess,
}

impl Simulation {
    pub fn is_active(&self) -> bool {
        *self != Simulation::Off
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: RunMode,
    pub simulation: Simulation,
    /// Remove the installation once the run is over
    pub cleanup: bool,
    pub reboot_countdown_secs: u64,
    pub reboot_delay_secs: u64,
    pub cleanup_grace_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Interactive,
            simulation: Simulation::Off,
            cleanup: false,
            reboot_countdown_secs: 15,
            reboot_delay_secs: 5,
            cleanup_grace_secs: 10,
        }
    }
}

impl RunConfig {
    pub fn reboot_countdown(&self) -> Duration {
        Duration::from_secs(self.reboot_countdown_secs)
    }

    pub fn timing(&self) -> DispositionTiming {
        DispositionTiming {
            reboot_delay: Duration::from_secs(self.reboot_delay_secs),
            cleanup_grace: Duration::from_secs(self.cleanup_grace_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Write a timestamped log file during unattended runs
    pub auto_run_file: bool,
    /// Directory for log files, defaults to the temp directory
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            auto_run_file: true,
            dir: None,
        }
    }
}

impl LoggingConfig {
    pub fn log_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub plugins_dir: Option<PathBuf>,
    pub use_test_set: bool,
    pub mode: Option<RunMode>,
    pub simulation: Option<Simulation>,
    pub cleanup: bool,
    pub verbose: bool,
}

impl Config {
    /// Load from `path`, or from the default location.
    ///
    /// A missing file at the default location yields defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => {
                    debug!("No configuration file, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::Config {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        let config = Self::parse(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// `<config_dir>/systools/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("systools").join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.plugins.set_name.trim().is_empty() || self.plugins.test_set_name.trim().is_empty() {
            return Err(Error::Config {
                reason: "plugin set names must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(dir) = &overrides.plugins_dir {
            self.plugins.dir = Some(dir.clone());
        }
        if overrides.use_test_set {
            self.plugins.use_test_set = true;
        }
        if let Some(mode) = overrides.mode {
            self.run.mode = mode;
        }
        if let Some(simulation) = overrides.simulation {
            self.run.simulation = simulation;
        }
        if overrides.cleanup {
            self.run.cleanup = true;
        }
        if overrides.verbose {
            self.logging.level = "debug".to_string();
        }
    }

    /// Directory discovery reads plugins from
    pub fn plugins_dir(&self) -> PathBuf {
        if let Some(dir) = &self.plugins.dir {
            return dir.clone();
        }

        let base = self.plugins.base_dir.clone().unwrap_or_else(default_base_dir);
        let set = if self.plugins.use_test_set {
            &self.plugins.test_set_name
        } else {
            &self.plugins.set_name
        };
        base.join(set)
    }
}

/// The executable's directory, or the working directory for development
/// builds
fn default_base_dir() -> PathBuf {
    let cwd = || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match std::env::current_exe() {
        Ok(exe) => match exe.parent() {
            Some(dir) if !is_dev_build(dir) => dir.to_path_buf(),
            _ => cwd(),
        },
        Err(_) => cwd(),
    }
}
