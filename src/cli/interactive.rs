//! Interactive console menu.
//!
//! Commands are read from stdin while a batch may be running, so a stop can
//! be requested mid-batch. Completion reports arrive over a channel fed by
//! [`CompletionRelay`]. Leaving the menu never reboots or cleans up; that
//! only happens after the user confirms the reboot prompt.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use systools_plugin_api::PluginRegistry;

use super::console::{parse_answer, ConsoleObserver};
use crate::config::Config;
use crate::coordinator::RunCoordinator;
use crate::disposition::{Disposition, SystemActions};
use crate::plugins::events::{BatchReport, FanOut, Observer, TracingObserver};
use crate::{Error, Result};

/// Sends each interactive completion report to the menu loop
pub struct CompletionRelay {
    tx: mpsc::UnboundedSender<BatchReport>,
}

impl CompletionRelay {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BatchReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Observer for CompletionRelay {
    fn on_batch_complete(&self, report: &BatchReport) {
        if self.tx.send(report.clone()).is_err() {
            warn!("Batch completed after the menu closed");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuCommand {
    List,
    RunAll,
    /// Zero-based plugin indices
    Run(Vec<usize>),
    Reload,
    Stop,
    Quit,
    Help,
}

/// Parse a menu line; plugin numbers are entered one-based
pub fn parse_command(line: &str) -> std::result::Result<MenuCommand, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(MenuCommand::Help);
    };

    match command.to_ascii_lowercase().as_str() {
        "l" | "list" => Ok(MenuCommand::List),
        "a" | "all" => Ok(MenuCommand::RunAll),
        "e" | "exec" => {
            let indices = words
                .flat_map(|word| word.split(','))
                .filter(|word| !word.is_empty())
                .map(|word| match word.parse::<usize>() {
                    Ok(n) if n > 0 => Ok(n - 1),
                    _ => Err(format!("invalid plugin number: {}", word)),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if indices.is_empty() {
                return Err("usage: e <n> [n...]".to_string());
            }
            Ok(MenuCommand::Run(indices))
        }
        "r" | "reload" => Ok(MenuCommand::Reload),
        "s" | "stop" => Ok(MenuCommand::Stop),
        "q" | "quit" | "exit" => Ok(MenuCommand::Quit),
        "h" | "help" | "?" => Ok(MenuCommand::Help),
        other => Err(format!("unknown command: {}", other)),
    }
}

const HELP: &str = "Commands:
  l            list plugins
  a            run all plugins
  e <n> [n..]  run the given plugins
  r            reload plugins
  s            stop the running batch
  q            quit";

fn print_plugins<W: Write>(coordinator: &RunCoordinator, out: &mut W) -> Result<()> {
    writeln!(out, "Plugins in {}:", coordinator.plugins_dir().display())?;
    if coordinator.plugins().is_empty() {
        writeln!(out, "  (none)")?;
    }
    for (i, plugin) in coordinator.plugins().iter().enumerate() {
        writeln!(out, "  {:>2}. {} - {}", i + 1, plugin.name(), plugin.description())?;
    }
    for summary in coordinator.unavailable() {
        writeln!(out, "   x  {} - {} (not available)", summary.name, summary.description)?;
    }
    Ok(())
}

/// What the next input line is for
enum Awaiting {
    Command,
    RebootAnswer,
}

/// How the menu loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuExit {
    Quit,
    /// The input stream closed
    EndOfInput,
    /// The user confirmed a reboot and the disposition was applied
    Finished(Disposition),
}

pub async fn run(config: Config, registry: PluginRegistry) -> Result<()> {
    let (relay, completions) = CompletionRelay::channel();
    let observer = FanOut::new(vec![
        Arc::new(TracingObserver),
        Arc::new(ConsoleObserver::new()),
        Arc::new(relay),
    ]);
    let mut coordinator = RunCoordinator::new(config, registry, Arc::new(observer));
    let actions = coordinator.system_actions();

    coordinator.load_plugins();
    let stdin = BufReader::new(tokio::io::stdin());
    let exit = run_menu(
        &mut coordinator,
        completions,
        stdin,
        &mut std::io::stdout(),
        actions.as_ref(),
    )
    .await?;
    debug!("Menu closed: {:?}", exit);
    Ok(())
}

/// Drive the menu until the user quits, the input closes or a confirmed
/// reboot is issued.
///
/// Post-run actions are only taken after the user confirms a reboot.
/// Before returning, a running batch is asked to stop and its completion
/// report is awaited.
pub async fn run_menu<R, W>(
    coordinator: &mut RunCoordinator,
    mut completions: mpsc::UnboundedReceiver<BatchReport>,
    input: R,
    out: &mut W,
    actions: &dyn SystemActions,
) -> Result<MenuExit>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut awaiting = Awaiting::Command;
    // batches started whose report has not arrived yet
    let mut pending = 0usize;

    print_plugins(coordinator, out)?;
    writeln!(out, "{}", HELP)?;

    let exit = loop {
        tokio::select! {
            Some(report) = completions.recv() => {
                pending = pending.saturating_sub(1);
                if report.reboot_required {
                    writeln!(out, "Reboot now? (y/n)")?;
                    awaiting = Awaiting::RebootAnswer;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break MenuExit::EndOfInput;
                };

                if let Awaiting::RebootAnswer = awaiting {
                    match parse_answer(&line) {
                        Some(true) => {
                            let disposition = coordinator.finish(true, actions)?;
                            return Ok(MenuExit::Finished(disposition));
                        }
                        Some(false) => {
                            writeln!(out, "Remember to reboot later.")?;
                            awaiting = Awaiting::Command;
                        }
                        None => writeln!(out, "Please answer y or n")?,
                    }
                    continue;
                }

                let command = match parse_command(&line) {
                    Ok(command) => command,
                    Err(message) => {
                        writeln!(out, "{}", message)?;
                        continue;
                    }
                };

                match command {
                    MenuCommand::List => print_plugins(coordinator, out)?,
                    MenuCommand::Help => writeln!(out, "{}", HELP)?,
                    MenuCommand::RunAll => {
                        if report_start(coordinator.run_all(), out)? {
                            pending += 1;
                        }
                    }
                    MenuCommand::Run(indices) => {
                        if report_start(coordinator.run_selection(&indices), out)? {
                            pending += 1;
                        }
                    }
                    MenuCommand::Stop => {
                        if coordinator.is_running() {
                            coordinator.request_stop();
                        } else {
                            writeln!(out, "Nothing is running")?;
                        }
                    }
                    MenuCommand::Reload => {
                        if coordinator.is_running() {
                            writeln!(out, "Cannot reload while a batch is running")?;
                        } else {
                            coordinator.reload();
                            print_plugins(coordinator, out)?;
                        }
                    }
                    MenuCommand::Quit => {
                        if coordinator.is_running() {
                            writeln!(out, "A batch is running, stop it first (s)")?;
                        } else {
                            break MenuExit::Quit;
                        }
                    }
                }
            }
        }
    };

    if pending > 0 {
        if coordinator.is_running() {
            coordinator.request_stop();
        }
        writeln!(out, "Waiting for the running batch to stop...")?;
        while pending > 0 {
            match completions.recv().await {
                Some(report) => {
                    pending -= 1;
                    if report.reboot_required {
                        writeln!(out, "A reboot is still required, remember to reboot later.")?;
                    }
                }
                None => break,
            }
        }
    }
    Ok(exit)
}

/// Whether the batch started; start errors are reported, not propagated
fn report_start<T, W: Write>(started: Result<T>, out: &mut W) -> Result<bool> {
    match started {
        Ok(_) => Ok(true),
        Err(Error::EmptySelection) => {
            writeln!(out, "No plugins selected")?;
            Ok(false)
        }
        Err(e) => {
            error!("{}", e);
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposition::{DryRunActions, PlannedAction};
    use crate::engine::LiveRunner;
    use crate::plugins::events::testing::{Recorder, Seen};
    use crate::plugins::events::PluginState;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use systools_plugin_api::{ExecutionResult, PluginResult, TaskPlugin};
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use uuid::Uuid;

    #[rstest]
    #[case("l", MenuCommand::List)]
    #[case("A", MenuCommand::RunAll)]
    #[case("e 1 3", MenuCommand::Run(vec![0, 2]))]
    #[case("e 2,4", MenuCommand::Run(vec![1, 3]))]
    #[case("r", MenuCommand::Reload)]
    #[case("s", MenuCommand::Stop)]
    #[case("quit", MenuCommand::Quit)]
    #[case("   ", MenuCommand::Help)]
    fn test_parse_command(#[case] line: &str, #[case] expected: MenuCommand) {
        assert_eq!(parse_command(line), Ok(expected));
    }

    #[rstest]
    #[case("e")]
    #[case("e 0")]
    #[case("e two")]
    #[case("frobnicate")]
    fn test_parse_command_errors(#[case] line: &str) {
        assert!(parse_command(line).is_err());
    }

    #[test]
    fn test_relay_forwards_reports() {
        let (relay, mut rx) = CompletionRelay::channel();
        let report = BatchReport {
            batch_id: Uuid::new_v4(),
            total: 1,
            failures: Vec::new(),
            reboot_required: true,
            cancelled: false,
        };

        relay.on_batch_complete(&report);
        assert_eq!(rx.try_recv().unwrap(), report);
    }

    /// Sleeps, counts its runs and optionally asks for a reboot
    struct Nap {
        name: String,
        millis: u64,
        reboot: bool,
        runs: Arc<AtomicUsize>,
    }

    impl TaskPlugin for Nap {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "naps"
        }

        fn execute(&self) -> PluginResult<ExecutionResult> {
            std::thread::sleep(Duration::from_millis(self.millis));
            self.runs.fetch_add(1, Ordering::SeqCst);
            let result = ExecutionResult::done();
            Ok(if self.reboot { result.with_reboot() } else { result })
        }
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct NapSettings {
        millis: u64,
        reboot: bool,
    }

    struct Session {
        _tmp: TempDir,
        coordinator: RunCoordinator,
        completions: mpsc::UnboundedReceiver<BatchReport>,
        recorder: Arc<Recorder>,
        runs: Arc<AtomicUsize>,
        actions: DryRunActions,
    }

    fn session(manifest: &str, cleanup: bool) -> Session {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("00_naps.toml"), manifest).unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        let counter = Arc::clone(&runs);
        registry
            .register("nap", move |spec, _ctx| {
                let settings: NapSettings = spec.settings()?;
                Ok(Box::new(Nap {
                    name: spec.display_name().to_string(),
                    millis: settings.millis,
                    reboot: settings.reboot,
                    runs: Arc::clone(&counter),
                }))
            })
            .unwrap();

        let mut config = Config::default();
        config.plugins.dir = Some(tmp.path().to_path_buf());
        config.run.cleanup = cleanup;

        let (relay, completions) = CompletionRelay::channel();
        let recorder = Arc::new(Recorder::default());
        let observer = FanOut::new(vec![recorder.clone(), Arc::new(relay)]);
        let mut coordinator =
            RunCoordinator::with_runner(config, registry, Arc::new(observer), Arc::new(LiveRunner));
        coordinator.load_plugins();

        Session {
            _tmp: tmp,
            coordinator,
            completions,
            recorder,
            runs,
            actions: DryRunActions::new(),
        }
    }

    const QUICK_REBOOT: &str = "[[plugin]]\nkind = \"nap\"\nname = \"patch\"\nreboot = true\n";

    const SLOW_PAIR: &str = "[[plugin]]\nkind = \"nap\"\nname = \"slow\"\nmillis = 300\n\n\
                             [[plugin]]\nkind = \"nap\"\nname = \"after\"\n";

    async fn drive(session: &mut Session, input: &[u8]) -> (MenuExit, String) {
        let mut out = Vec::new();
        let exit = run_menu(
            &mut session.coordinator,
            std::mem::replace(&mut session.completions, mpsc::unbounded_channel().1),
            input,
            &mut out,
            &session.actions,
        )
        .await
        .unwrap();
        (exit, String::from_utf8(out).unwrap())
    }

    #[rstest]
    #[case(b"q\n".as_slice(), MenuExit::Quit)]
    #[case(b"".as_slice(), MenuExit::EndOfInput)]
    #[tokio::test]
    async fn test_leaving_the_menu_takes_no_action(#[case] input: &[u8], #[case] expected: MenuExit) {
        let mut session = session(QUICK_REBOOT, true);

        let (exit, out) = drive(&mut session, input).await;

        assert_eq!(exit, expected);
        assert!(out.contains("1. patch - naps"));
        assert!(session.actions.planned().is_empty());
        assert_eq!(session.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_end_of_input_waits_for_the_running_batch() {
        let mut session = session(SLOW_PAIR, true);

        let (exit, out) = drive(&mut session, b"a\nr\nq\n").await;

        assert_eq!(exit, MenuExit::EndOfInput);
        assert!(out.contains("Cannot reload while a batch is running"));
        assert!(out.contains("A batch is running, stop it first (s)"));
        assert!(out.contains("Waiting for the running batch to stop..."));
        assert!(!session.coordinator.is_running());
        assert!(session.actions.planned().is_empty());

        // the running plugin finishes, the next one is cancelled
        assert_eq!(session.runs.load(Ordering::SeqCst), 1);
        let events = session.recorder.structural();
        assert!(events.contains(&Seen::State("slow".to_string(), PluginState::Finished)));
        assert!(!events.contains(&Seen::State("after".to_string(), PluginState::Finished)));
        assert!(matches!(events.last(), Some(Seen::BatchComplete(f)) if f.len() == 1));
    }

    /// Run the menu over a pipe, answering the reboot prompt once the batch
    /// has run
    async fn answer_reboot(session: &mut Session, answer: &str) -> (MenuExit, String) {
        let (mut writer, reader) = tokio::io::duplex(64);
        let runs = Arc::clone(&session.runs);
        let answer = answer.to_string();

        let feed = async move {
            writer.write_all(b"a\n").await.unwrap();
            while runs.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            writer.write_all(answer.as_bytes()).await.unwrap();
        };

        let mut out = Vec::new();
        let completions = std::mem::replace(&mut session.completions, mpsc::unbounded_channel().1);
        let menu = run_menu(
            &mut session.coordinator,
            completions,
            BufReader::new(reader),
            &mut out,
            &session.actions,
        );
        let (exit, ()) = tokio::join!(menu, feed);
        (exit.unwrap(), String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_confirmed_reboot_applies_the_disposition() {
        let mut session = session(QUICK_REBOOT, true);

        let (exit, out) = answer_reboot(&mut session, "y\n").await;

        assert!(out.contains("Reboot now? (y/n)"));
        assert_eq!(exit, MenuExit::Finished(Disposition::DeferredCleanupThenReboot));
        assert_eq!(
            session.actions.planned(),
            vec![
                PlannedAction::SchedulePostRebootCleanup,
                PlannedAction::Reboot {
                    delay: Duration::from_secs(5)
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_declined_reboot_returns_to_the_menu() {
        let mut session = session(QUICK_REBOOT, true);

        let (exit, out) = answer_reboot(&mut session, "maybe\nn\nq\n").await;

        assert_eq!(exit, MenuExit::Quit);
        assert!(out.contains("Please answer y or n"));
        assert!(out.contains("Remember to reboot later."));
        assert!(session.actions.planned().is_empty());
    }
}
