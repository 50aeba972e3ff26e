//! Console rendering of run events and the reboot countdown.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::{interval, sleep};
use tracing::warn;

use crate::coordinator::RebootPrompt;
use crate::plugins::events::{BatchReport, FailureRecord, Observer, PluginState};

/// Prints progress and summaries to stdout. Log lines reach the console
/// through the tracing subscriber instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleObserver;

impl ConsoleObserver {
    pub fn new() -> Self {
        Self
    }
}

/// Summary block printed when a batch ends
pub fn render_summary(succeeded: usize, total: usize, failures: &[FailureRecord]) -> String {
    let mut out = format!("Finished: {}/{} plugin(s) succeeded\n", succeeded, total);
    if !failures.is_empty() {
        out.push_str("Failures:\n");
        for failure in failures {
            out.push_str(&format!("  - {}\n", failure));
        }
    }
    out
}

impl Observer for ConsoleObserver {
    fn on_progress(&self, percent: f64, current: usize, total: usize) {
        println!("[{}/{}] {:>5.1}%", current + 1, total, percent);
    }

    fn on_plugin_state_change(&self, name: &str, state: PluginState) {
        match state {
            PluginState::Starting => println!("  -> {}", name),
            PluginState::Finished => println!("  <- {}", name),
        }
    }

    fn on_batch_complete(&self, report: &BatchReport) {
        print!(
            "{}",
            render_summary(report.succeeded(), report.total, &report.failures)
        );
        if report.reboot_required {
            println!("A reboot is required to complete the changes.");
        }
    }

    fn on_unattended_progress(&self, _current: usize, total: usize, plugin_name: &str) {
        // regular progress lines cover the non-empty case
        if total == 0 {
            println!("{}", plugin_name);
        }
    }

    fn on_unattended_complete(&self, succeeded: usize, total: usize, failures: &[FailureRecord]) {
        print!("{}", render_summary(succeeded, total, failures));
    }
}

/// Interpret a yes/no answer; `None` when the line is neither
pub fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Read one stdin line on a detached thread.
///
/// A pending tokio stdin read cannot be cancelled and would hold up runtime
/// shutdown after the countdown expires; a detached thread does not.
fn read_answer_line() -> oneshot::Receiver<std::io::Result<String>> {
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("systools-answer".to_string())
        .spawn(move || {
            let mut line = String::new();
            let read = std::io::stdin().read_line(&mut line).map(|_| line);
            // the prompt may already have timed out
            let _ = tx.send(read);
        });
    if let Err(e) = spawned {
        // the dropped sender resolves the receiver, which counts as no answer
        warn!("Failed to start the answer reader: {}", e);
    }
    rx
}

/// Asks on stdin and proceeds with the reboot when the countdown runs out
#[derive(Debug, Default, Clone, Copy)]
pub struct CountdownPrompt;

#[async_trait]
impl RebootPrompt for CountdownPrompt {
    async fn confirm_reboot(&self, countdown: Duration) -> bool {
        println!(
            "A reboot is required. Reboot now? [Y/n] (rebooting automatically in {}s)",
            countdown.as_secs()
        );

        let mut answer = read_answer_line();
        let mut ticker = interval(Duration::from_secs(1));
        let deadline = sleep(countdown);
        tokio::pin!(deadline);
        let mut remaining = countdown.as_secs();

        loop {
            tokio::select! {
                read = &mut answer => {
                    println!();
                    return match read {
                        Ok(Ok(line)) => parse_answer(&line).unwrap_or(true),
                        Ok(Err(e)) => {
                            warn!("Failed to read the reboot answer: {}", e);
                            true
                        }
                        Err(_) => true,
                    };
                }
                _ = &mut deadline => {
                    println!("\nNo answer, rebooting.");
                    return true;
                }
                _ = ticker.tick() => {
                    print!("\r{:>3}s ", remaining);
                    let _ = std::io::stdout().flush();
                    remaining = remaining.saturating_sub(1);
                }
            }
        }
    }
}
