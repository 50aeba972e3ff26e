//! What happens after a run: reboot, self-cleanup, both, or nothing.
//!
//! The decision is pure ([`Disposition::decide`]); side effects go through
//! [`SystemActions`]. [`HostActions`] touches the machine, [`DryRunActions`]
//! only records and logs what it would have done.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

/// Failures of destructive post-run actions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispositionError {
    #[error("Failed to schedule post-reboot cleanup: {reason}; reboot cancelled, manual intervention required")]
    ScheduleCleanup { reason: String },

    #[error("Failed to start cleanup: {reason}; manual intervention required")]
    Cleanup { reason: String },

    #[error("Failed to request reboot: {reason}; manual intervention required")]
    Reboot { reason: String },
}

/// Delays applied by [`Disposition::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionTiming {
    pub reboot_delay: Duration,
    pub cleanup_grace: Duration,
}

impl Default for DispositionTiming {
    fn default() -> Self {
        Self {
            reboot_delay: Duration::from_secs(5),
            cleanup_grace: Duration::from_secs(10),
        }
    }
}

/// Post-run action chosen from the cleanup flag and the reboot answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Register cleanup to run after the next boot, then reboot
    DeferredCleanupThenReboot,
    /// Remove the installation once this process has exited
    ImmediateCleanup,
    Reboot,
    Nothing,
}

impl Disposition {
    pub fn decide(cleanup_requested: bool, user_wants_reboot: bool) -> Self {
        match (cleanup_requested, user_wants_reboot) {
            (true, true) => Disposition::DeferredCleanupThenReboot,
            (true, false) => Disposition::ImmediateCleanup,
            (false, true) => Disposition::Reboot,
            (false, false) => Disposition::Nothing,
        }
    }

    pub fn is_destructive(&self) -> bool {
        *self != Disposition::Nothing
    }

    /// Carry out the disposition.
    ///
    /// If the post-reboot cleanup cannot be scheduled the reboot is not
    /// issued.
    pub fn apply(
        self,
        actions: &dyn SystemActions,
        timing: &DispositionTiming,
    ) -> Result<(), DispositionError> {
        match self {
            Disposition::DeferredCleanupThenReboot => {
                info!("Registering post-reboot cleanup");
                if let Err(e) = actions.schedule_post_reboot_cleanup() {
                    error!("{}", e);
                    return Err(e);
                }
                info!(
                    "Post-reboot cleanup registered, rebooting in {}s",
                    timing.reboot_delay.as_secs()
                );
                actions.reboot(timing.reboot_delay)
            }
            Disposition::ImmediateCleanup => {
                info!(
                    "Starting delayed cleanup ({}s grace)",
                    timing.cleanup_grace.as_secs()
                );
                actions.start_delayed_cleanup(timing.cleanup_grace)
            }
            Disposition::Reboot => {
                info!("Rebooting in {}s", timing.reboot_delay.as_secs());
                actions.reboot(timing.reboot_delay)
            }
            Disposition::Nothing => Ok(()),
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Disposition::DeferredCleanupThenReboot => "clean up after reboot, then reboot",
            Disposition::ImmediateCleanup => "clean up now",
            Disposition::Reboot => "reboot",
            Disposition::Nothing => "exit",
        };
        f.write_str(text)
    }
}

/// Boundary to the operating system for destructive actions
pub trait SystemActions: Send + Sync {
    /// Register removal of the installation to run on next boot
    fn schedule_post_reboot_cleanup(&self) -> Result<(), DispositionError>;

    /// Spawn a detached removal of the installation that waits `grace` first
    fn start_delayed_cleanup(&self, grace: Duration) -> Result<(), DispositionError>;

    fn reboot(&self, delay: Duration) -> Result<(), DispositionError>;
}

/// An action [`DryRunActions`] would have taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    SchedulePostRebootCleanup,
    DelayedCleanup { grace: Duration },
    Reboot { delay: Duration },
}

/// Logs actions instead of performing them
#[derive(Debug, Default)]
pub struct DryRunActions {
    planned: Mutex<Vec<PlannedAction>>,
}

impl DryRunActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn planned(&self) -> Vec<PlannedAction> {
        self.planned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, action: PlannedAction) {
        info!("[dry run] {:?}", action);
        self.planned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action);
    }
}

impl SystemActions for DryRunActions {
    fn schedule_post_reboot_cleanup(&self) -> Result<(), DispositionError> {
        self.record(PlannedAction::SchedulePostRebootCleanup);
        Ok(())
    }

    fn start_delayed_cleanup(&self, grace: Duration) -> Result<(), DispositionError> {
        self.record(PlannedAction::DelayedCleanup { grace });
        Ok(())
    }

    fn reboot(&self, delay: Duration) -> Result<(), DispositionError> {
        self.record(PlannedAction::Reboot { delay });
        Ok(())
    }
}

/// Shell line run by `sh -c`; the delay, target and log arrive as `$1`..`$3`
const DELAYED_CLEANUP_SH: &str = r#"sleep "$1" && rm -rf -- "$2" >> "$3" 2>&1"#;

/// Characters that cannot be quoted safely in unit files and batch scripts
const UNSAFE_PATH_CHARS: &[char] = &['"', '\'', '`', '$', '%', '\n', '\r'];

/// Performs cleanup and reboot on the running host.
///
/// Cleanup removes the directory holding the executable, and only when that
/// directory carries the install marker (the plugin set directory shipped
/// next to the executable). Nothing destructive happens for development
/// builds (an executable inside a cargo `target` directory).
#[derive(Debug, Clone)]
pub struct HostActions {
    app_dir: PathBuf,
    scratch_dir: PathBuf,
    install_marker: String,
    tag: String,
    dev_build: bool,
}

impl HostActions {
    pub fn new(app_dir: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        let app_dir = app_dir.into();
        Self {
            dev_build: is_dev_build(&app_dir),
            app_dir,
            scratch_dir: scratch_dir.into(),
            install_marker: "plugins".to_string(),
            tag: std::process::id().to_string(),
        }
    }

    /// Actions for the installation this process runs from
    pub fn detect() -> Self {
        match std::env::current_exe() {
            Ok(exe) => {
                let app_dir = exe.parent().map(Path::to_path_buf).unwrap_or(exe);
                Self::new(app_dir, std::env::temp_dir())
            }
            Err(e) => {
                warn!("Cannot locate the running executable ({}), cleanup disabled", e);
                let mut actions = Self::new(PathBuf::new(), std::env::temp_dir());
                actions.dev_build = true;
                actions
            }
        }
    }

    /// Entry that must exist inside the app directory before it is removed
    pub fn with_install_marker(mut self, marker: impl Into<String>) -> Self {
        self.install_marker = marker.into();
        self
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    /// Refuse to remove anything that is not a dedicated installation
    fn check_cleanup_target(&self) -> Result<(), String> {
        let app = self.app_dir.display().to_string();
        if app.contains(UNSAFE_PATH_CHARS) {
            return Err(format!("refusing to remove {}: unsupported characters in path", app));
        }
        if self.app_dir.parent().is_none() || !self.app_dir.is_absolute() {
            return Err(format!("refusing to remove {}: not an installation directory", app));
        }
        if !self.app_dir.join(&self.install_marker).is_dir() {
            return Err(format!(
                "refusing to remove {}: no '{}' directory, not a SysTools installation",
                app, self.install_marker
            ));
        }
        Ok(())
    }

    pub fn is_dev_build(&self) -> bool {
        self.dev_build
    }

    pub fn unit_name(&self) -> String {
        format!("systools-cleanup-{}.service", self.tag)
    }

    fn cleanup_log(&self) -> PathBuf {
        self.scratch_dir
            .join(format!("systools_cleanup_log_{}.txt", self.tag))
    }

    /// systemd oneshot unit that removes the installation on next boot and
    /// then disables and deletes itself
    pub fn render_cleanup_unit(&self, unit_path: &Path) -> String {
        let mut unit = String::new();
        unit.push_str("[Unit]\n");
        unit.push_str("Description=SysTools post-reboot cleanup\n");
        unit.push_str("After=local-fs.target\n\n");

        unit.push_str("[Service]\n");
        unit.push_str("Type=oneshot\n");
        unit.push_str(&format!(
            "ExecStart=/bin/rm -rf \"{}\"\n",
            self.app_dir.display()
        ));
        unit.push_str(&format!(
            "ExecStartPost=/bin/systemctl disable {}\n",
            self.unit_name()
        ));
        unit.push_str(&format!(
            "ExecStartPost=/bin/rm -f \"{}\"\n",
            unit_path.display()
        ));
        unit.push_str(&format!(
            "StandardOutput=append:{}\n",
            self.cleanup_log().display()
        ));
        unit.push('\n');

        unit.push_str("[Install]\n");
        unit.push_str("WantedBy=multi-user.target\n");
        unit
    }

    /// Batch script registered with the task scheduler on Windows
    pub fn render_cleanup_script(&self, task_name: &str) -> String {
        format!(
            "@echo off\r\n\
             (\r\n\
             echo Post-reboot cleanup started at %date% %time%\r\n\
             echo Target directory: {app}\r\n\
             rmdir /s /q \"{app}\"\r\n\
             schtasks /Delete /TN \"{task}\" /F\r\n\
             echo Post-reboot cleanup finished.\r\n\
             ) > \"{log}\" 2>&1\r\n\
             (goto) 2>nul & del \"%~f0\"\r\n",
            app = self.app_dir.display(),
            task = task_name,
            log = self.cleanup_log().display(),
        )
    }

    /// `sh` invocation that waits, then removes the installation. Paths are
    /// passed as positional arguments, never spliced into the script.
    pub fn delayed_cleanup_command(&self, grace: Duration) -> Command {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(DELAYED_CLEANUP_SH)
            .arg("systools-cleanup")
            .arg(grace.as_secs().to_string())
            .arg(&self.app_dir)
            .arg(self.cleanup_log());
        command
    }

    fn skip_for_dev_build(&self, action: &str) -> bool {
        if self.dev_build {
            info!("Development build, skipping {}", action);
        }
        self.dev_build
    }
}

/// True when `app_dir` lies inside a cargo `target` directory
pub(crate) fn is_dev_build(app_dir: &Path) -> bool {
    app_dir.ancestors().any(|dir| {
        dir.file_name().map_or(false, |name| name == "target")
            && dir.parent().map_or(false, |root| root.join("Cargo.toml").is_file())
    })
}

/// Run a command and turn a non-zero exit into an error message
fn run_checked(program: &str, args: &[&str]) -> Result<(), String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| format!("failed to run {}: {}", program, e))?;

    if !output.status.success() {
        return Err(format!(
            "{} command failed: {}",
            program,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}

#[cfg(not(windows))]
impl SystemActions for HostActions {
    fn schedule_post_reboot_cleanup(&self) -> Result<(), DispositionError> {
        if self.skip_for_dev_build("post-reboot cleanup registration") {
            return Ok(());
        }

        let unit_path = Path::new("/etc/systemd/system").join(self.unit_name());
        let schedule = || -> Result<(), String> {
            self.check_cleanup_target()?;
            fs::write(&unit_path, self.render_cleanup_unit(&unit_path))
                .map_err(|e| format!("failed to write {}: {}", unit_path.display(), e))?;
            run_checked("systemctl", &["daemon-reload"])?;
            run_checked("systemctl", &["enable", &self.unit_name()])
        };

        schedule().map_err(|reason| DispositionError::ScheduleCleanup { reason })?;
        info!("Registered {}", self.unit_name());
        Ok(())
    }

    fn start_delayed_cleanup(&self, grace: Duration) -> Result<(), DispositionError> {
        if self.skip_for_dev_build("cleanup") {
            return Ok(());
        }

        self.check_cleanup_target()
            .map_err(|reason| DispositionError::Cleanup { reason })?;
        self.delayed_cleanup_command(grace)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DispositionError::Cleanup {
                reason: e.to_string(),
            })?;
        info!("Cleanup of {} started", self.app_dir.display());
        Ok(())
    }

    fn reboot(&self, delay: Duration) -> Result<(), DispositionError> {
        if self.skip_for_dev_build("reboot") {
            return Ok(());
        }

        let line = format!("sleep {} && systemctl reboot", delay.as_secs());
        Command::new("sh")
            .args(["-c", &line])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DispositionError::Reboot {
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(windows)]
impl SystemActions for HostActions {
    fn schedule_post_reboot_cleanup(&self) -> Result<(), DispositionError> {
        if self.skip_for_dev_build("post-reboot cleanup registration") {
            return Ok(());
        }

        let task_name = format!("SysToolsCleanup_{}", self.tag);
        let script = self
            .scratch_dir
            .join(format!("systools_cleanup_{}.bat", self.tag));
        let schedule = || -> Result<(), String> {
            self.check_cleanup_target()?;
            fs::write(&script, self.render_cleanup_script(&task_name))
                .map_err(|e| format!("failed to write {}: {}", script.display(), e))?;
            let action = format!("\"{}\"", script.display());
            run_checked(
                "schtasks",
                &["/Create", "/TN", &task_name, "/TR", &action, "/SC", "ONLOGON", "/RL", "HIGHEST", "/F"],
            )
        };

        schedule().map_err(|reason| DispositionError::ScheduleCleanup { reason })?;
        info!("Registered scheduled task {}", task_name);
        Ok(())
    }

    fn start_delayed_cleanup(&self, grace: Duration) -> Result<(), DispositionError> {
        if self.skip_for_dev_build("cleanup") {
            return Ok(());
        }

        self.check_cleanup_target()
            .map_err(|reason| DispositionError::Cleanup { reason })?;
        let line = format!(
            "ping 127.0.0.1 -n {} > nul & rmdir /s /q \"{}\" >> \"{}\" 2>&1",
            grace.as_secs() + 1,
            self.app_dir.display(),
            self.cleanup_log().display()
        );
        Command::new("cmd")
            .args(["/C", &line])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DispositionError::Cleanup {
                reason: e.to_string(),
            })?;
        info!("Cleanup of {} started", self.app_dir.display());
        Ok(())
    }

    fn reboot(&self, delay: Duration) -> Result<(), DispositionError> {
        if self.skip_for_dev_build("reboot") {
            return Ok(());
        }

        let delay = delay.as_secs().to_string();
        run_checked("shutdown", &["/r", "/t", &delay])
            .map_err(|reason| DispositionError::Reboot { reason })
    }
}
