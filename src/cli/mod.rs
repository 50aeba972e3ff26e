//! Command-line interface for SysTools.
//!
//! Without flags the interactive menu starts. `--auto` runs every plugin
//! unattended; the `--debug*` flags do the same with simulated plugins, and
//! `--debuggui*` simulate inside the interactive menu.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use systools_plugin_api::PluginRegistry;
use tracing::info;

use crate::config::{Config, Overrides, RunMode, Simulation};
use crate::coordinator::RunCoordinator;
use crate::logging;
use crate::plugins::events::{FanOut, TracingObserver};
use crate::Result;

pub mod console;
pub mod interactive;

use console::{ConsoleObserver, CountdownPrompt};

/// SysTools - plugin-driven system deployment runner
#[derive(Parser, Debug, Default, Clone, PartialEq)]
#[command(name = "systools")]
#[command(about = "Run system deployment plugins interactively or unattended")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Run all plugins without interaction
    #[arg(long)]
    pub auto: bool,

    /// Unattended run with simulated plugins (random outcomes)
    #[arg(long)]
    pub debug: bool,

    /// Unattended run with simulated plugins that all succeed
    #[arg(long)]
    pub debug_success: bool,

    /// Interactive run with simulated plugins (random outcomes)
    #[arg(long)]
    pub debuggui: bool,

    /// Interactive run with simulated plugins that all succeed
    #[arg(long)]
    pub debuggui_success: bool,

    /// Remove this installation once the run is over
    #[arg(long)]
    pub cleanup: bool,

    /// Load plugins from the test plugin set
    #[arg(long)]
    pub test: bool,

    /// Attach a console (accepted for compatibility, no effect)
    #[arg(long, hide = true)]
    pub console: bool,

    /// Plugin directory, overriding the configured plugin set
    #[arg(long, value_name = "DIR")]
    pub plugins_dir: Option<PathBuf>,

    /// Configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the unattended batch report as JSON
    #[arg(long)]
    pub report_json: bool,
}

const LEGACY_FLAGS: &[&str] = &[
    "-auto",
    "-debug",
    "-debug-success",
    "-debuggui",
    "-debuggui-success",
    "-cleanup",
    "-test",
    "-console",
];

/// Accept the single-dash spellings (`-auto`) used by existing launch
/// scripts
pub fn normalize_legacy_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some(flag) if LEGACY_FLAGS.contains(&flag) => OsString::from(format!("-{}", flag)),
            _ => arg,
        })
        .collect()
}

impl Cli {
    pub fn mode(&self) -> RunMode {
        if self.auto || self.debug || self.debug_success {
            RunMode::Unattended
        } else {
            RunMode::Interactive
        }
    }

    pub fn simulation(&self) -> Option<Simulation> {
        if self.debug_success || self.debuggui_success {
            Some(Simulation::AllSuccess)
        } else if self.debug || self.debuggui {
            Some(Simulation::Random)
        } else {
            None
        }
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            plugins_dir: self.plugins_dir.clone(),
            use_test_set: self.test,
            mode: (self.mode() == RunMode::Unattended).then_some(RunMode::Unattended),
            simulation: self.simulation(),
            cleanup: self.cleanup,
            verbose: self.verbose,
        }
    }
}

/// Registry with every plugin kind compiled into this build
pub fn plugin_registry() -> PluginRegistry {
    #[cfg(feature = "builtin-plugins")]
    {
        builtin_plugins::builtin_registry()
    }
    #[cfg(not(feature = "builtin-plugins"))]
    {
        PluginRegistry::new()
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_overrides(&cli.overrides());

    if let Some(log) = logging::init_logging(&config.logging, config.run.mode)? {
        info!(
            "Auto-run log: {} (started {})",
            log.path.display(),
            log.started.format("%Y-%m-%d %H:%M:%S")
        );
    }
    if config.run.simulation.is_active() {
        info!("Simulation mode ({:?}): plugins will not be executed", config.run.simulation);
    }

    let registry = plugin_registry();
    match config.run.mode {
        RunMode::Interactive => interactive::run(config, registry).await,
        RunMode::Unattended => run_unattended(config, registry, cli.report_json).await,
    }
}

async fn run_unattended(config: Config, registry: PluginRegistry, report_json: bool) -> Result<()> {
    let observer = FanOut::new(vec![
        Arc::new(TracingObserver),
        Arc::new(ConsoleObserver::new()),
    ]);
    let mut coordinator = RunCoordinator::new(config, registry, Arc::new(observer));
    let actions = coordinator.system_actions();

    coordinator.load_plugins();
    let outcome = coordinator
        .run_unattended(&CountdownPrompt, actions.as_ref())
        .await?;

    if report_json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    }
    info!("Unattended run finished: {}", outcome.disposition);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Cli {
        let args = std::iter::once("systools")
            .chain(args.iter().copied())
            .map(OsString::from);
        Cli::try_parse_from(normalize_legacy_flags(args)).unwrap()
    }

    #[rstest]
    #[case(&[], RunMode::Interactive, None)]
    #[case(&["--auto"], RunMode::Unattended, None)]
    #[case(&["--debug"], RunMode::Unattended, Some(Simulation::Random))]
    #[case(&["--debug-success"], RunMode::Unattended, Some(Simulation::AllSuccess))]
    #[case(&["--debuggui"], RunMode::Interactive, Some(Simulation::Random))]
    #[case(&["--debuggui-success"], RunMode::Interactive, Some(Simulation::AllSuccess))]
    #[case(&["-auto", "-cleanup"], RunMode::Unattended, None)]
    fn test_mode_selection(
        #[case] args: &[&str],
        #[case] mode: RunMode,
        #[case] simulation: Option<Simulation>,
    ) {
        let cli = parse(args);
        assert_eq!(cli.mode(), mode);
        assert_eq!(cli.simulation(), simulation);
    }

    #[test]
    fn test_legacy_flags_are_normalized() {
        let cli = parse(&["-auto", "-cleanup", "-test", "-console"]);
        assert!(cli.auto && cli.cleanup && cli.test && cli.console);

        let cli = parse(&["--plugins-dir", "/srv/plugins", "-debug"]);
        assert_eq!(cli.plugins_dir, Some(PathBuf::from("/srv/plugins")));
        assert!(cli.debug);
    }

    #[cfg(all(unix, feature = "builtin-plugins"))]
    #[tokio::test]
    async fn test_shipped_test_plugin_set() {
        use crate::coordinator::FixedAnswer;
        use crate::disposition::{Disposition, DryRunActions};
        use crate::engine::{Outcomes, Pacing, SimulatedRunner};
        use crate::plugins::NullObserver;

        let mut config = Config::default();
        config.plugins.base_dir = Some(PathBuf::from(env!("CARGO_MANIFEST_DIR")));
        config.apply_overrides(&parse(&["--debug-success", "--test"]).overrides());

        let runner = Arc::new(SimulatedRunner::new(Outcomes::AllSuccess, Pacing::INSTANT));
        let mut coordinator =
            RunCoordinator::with_runner(config, plugin_registry(), Arc::new(NullObserver), runner);
        assert_eq!(coordinator.load_plugins(), 4);
        assert_eq!(
            coordinator.discovery().names(),
            vec![
                "Step 1 - echo",
                "Step 2 - failing",
                "Step 3 - sample files",
                "Step 4 - needs reboot",
            ]
        );

        let actions = DryRunActions::new();
        let outcome = coordinator
            .run_unattended(&FixedAnswer(true), &actions)
            .await
            .unwrap();
        assert!(outcome.report.all_succeeded());
        assert_eq!(outcome.disposition, Disposition::Nothing);
        assert!(actions.planned().is_empty());
    }

    #[test]
    fn test_overrides_carry_flags() {
        let cli = parse(&["--debug", "--test", "--cleanup", "-v"]);
        let overrides = cli.overrides();
        assert_eq!(overrides.mode, Some(RunMode::Unattended));
        assert_eq!(overrides.simulation, Some(Simulation::Random));
        assert!(overrides.use_test_set);
        assert!(overrides.cleanup);
        assert!(overrides.verbose);
    }
}
