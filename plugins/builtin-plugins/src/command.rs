//! Plugin kind that runs an external program.
//!
//! ```toml
//! [[plugin]]
//! kind = "command"
//! name = "Registry repair"
//! description = "Replace Administrator paths in the registry"
//! program = "powershell"
//! args = ["-ExecutionPolicy", "Bypass", "-File", "tools/reg.ps1"]
//! requires = ["tools/reg.ps1"]
//! reboot = false
//! ```
//!
//! The program runs in the manifest directory unless `working_dir` says
//! otherwise. Exit status 0 is success.

use anyhow::Context;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use systools_plugin_api::{ExecutionResult, LoadContext, PluginResult, PluginSpec, TaskPlugin};

pub const KIND: &str = "command";

#[derive(Debug, Deserialize)]
struct CommandSettings {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    requires: Vec<PathBuf>,
    #[serde(default)]
    reboot: bool,
    working_dir: Option<PathBuf>,
    progress: Option<String>,
}

/// Runs a program and maps its exit status to an [`ExecutionResult`]
#[derive(Debug, Clone)]
pub struct CommandPlugin {
    name: String,
    description: String,
    program: String,
    args: Vec<String>,
    requires: Vec<PathBuf>,
    working_dir: PathBuf,
    reboot: bool,
    progress: Option<String>,
}

impl CommandPlugin {
    pub fn from_spec(spec: &PluginSpec, ctx: &LoadContext) -> PluginResult<Self> {
        let settings: CommandSettings = spec.settings()?;
        if settings.program.trim().is_empty() {
            anyhow::bail!("command plugin '{}' has an empty program", spec.display_name());
        }

        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| settings.program.clone());
        let description = spec
            .description
            .clone()
            .unwrap_or_else(|| format!("Run {}", settings.program));

        Ok(Self {
            name,
            description,
            program: settings.program,
            args: settings.args,
            requires: settings
                .requires
                .iter()
                .map(|path| ctx.resolve(path))
                .collect(),
            working_dir: settings
                .working_dir
                .map(|dir| ctx.resolve(dir))
                .unwrap_or_else(|| ctx.manifest_dir.clone()),
            reboot: settings.reboot,
            progress: settings.progress,
        })
    }

    /// Locate the program: paths are resolved against the working directory,
    /// bare names are searched on `PATH`.
    fn locate_program(&self) -> Option<PathBuf> {
        let program = Path::new(&self.program);
        if program.components().count() > 1 || program.is_absolute() {
            let candidate = if program.is_absolute() {
                program.to_path_buf()
            } else {
                self.working_dir.join(program)
            };
            return candidate.is_file().then_some(candidate);
        }

        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .flat_map(|dir| executable_candidates(&dir, &self.program))
            .find(|candidate| candidate.is_file())
    }
}

#[cfg(windows)]
fn executable_candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    let exts = std::env::var("PATHEXT").unwrap_or_else(|_| ".EXE;.BAT;.CMD".to_string());
    let mut candidates = vec![dir.join(program)];
    candidates.extend(exts.split(';').filter(|e| !e.is_empty()).map(|ext| {
        let mut file = OsString::from(program);
        file.push(ext.to_ascii_lowercase());
        dir.join(file)
    }));
    candidates
}

#[cfg(not(windows))]
fn executable_candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    vec![dir.join(OsString::from(program))]
}

impl TaskPlugin for CommandPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_available(&self) -> bool {
        if let Some(missing) = self.requires.iter().find(|path| !path.exists()) {
            tracing::debug!("{}: required path missing: {}", self.name, missing.display());
            return false;
        }

        if self.locate_program().is_none() {
            tracing::debug!("{}: program not found: {}", self.name, self.program);
            return false;
        }

        true
    }

    fn progress_message(&self) -> String {
        self.progress
            .clone()
            .unwrap_or_else(|| format!("Running: {}", self.name))
    }

    fn execute(&self) -> PluginResult<ExecutionResult> {
        let program = self
            .locate_program()
            .unwrap_or_else(|| PathBuf::from(&self.program));

        tracing::debug!("{}: spawning {} {:?}", self.name, program.display(), self.args);
        let output = Command::new(&program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .output()
            .with_context(|| format!("failed to start {}", program.display()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            let message = if stdout.is_empty() {
                format!("{} completed", self.name)
            } else {
                stdout
            };
            let result = ExecutionResult::success(message);
            return Ok(if self.reboot { result.with_reboot() } else { result });
        }

        let mut error = if stderr.is_empty() {
            match output.status.code() {
                Some(code) => format!("{} exited with status {}", self.program, code),
                None => format!("{} was terminated by a signal", self.program),
            }
        } else {
            stderr
        };
        if !stdout.is_empty() {
            error.push_str("\noutput: ");
            error.push_str(&stdout);
        }

        Ok(ExecutionResult::failure(error))
    }
}
