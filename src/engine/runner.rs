//! How a single plugin is run.
//!
//! [`LiveRunner`] calls the plugin and folds errors and panics into a failed
//! [`ExecutionResult`]. [`SimulatedRunner`] never touches the plugin: it
//! sleeps for a paced delay and reports a random (or always successful)
//! outcome, which drives the debug modes without side effects.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use systools_plugin_api::{ExecutionResult, TaskPlugin};

/// Runs one plugin and always produces a result
pub trait PluginRunner: Send + Sync {
    fn run(&self, plugin: &dyn TaskPlugin) -> ExecutionResult;

    /// Whether results are fabricated rather than produced by the plugin
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Extract the message carried by a panic payload
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic without message".to_string()
    }
}

/// Executes plugins for real
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveRunner;

impl PluginRunner for LiveRunner {
    fn run(&self, plugin: &dyn TaskPlugin) -> ExecutionResult {
        match catch_unwind(AssertUnwindSafe(|| plugin.execute())) {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ExecutionResult::failure(format!("{e:#}")),
            Err(payload) => ExecutionResult::failure(panic_message(payload)),
        }
    }
}

/// How simulated outcomes are chosen
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcomes {
    /// Each plugin succeeds with the given probability
    Random { success_rate: f64 },
    AllSuccess,
}

impl Outcomes {
    pub const DEFAULT_SUCCESS_RATE: f64 = 0.7;

    pub fn random() -> Self {
        Outcomes::Random {
            success_rate: Self::DEFAULT_SUCCESS_RATE,
        }
    }
}

/// Simulated run time, derived from the first number in the plugin name
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    /// Seconds per unit of the number found in the name
    pub per_unit: f64,
    pub min: f64,
    pub max: f64,
    /// Used when the name holds no number
    pub fallback: f64,
}

impl Pacing {
    pub const INTERACTIVE: Pacing = Pacing {
        per_unit: 0.3,
        min: 0.5,
        max: 3.0,
        fallback: 1.0,
    };

    pub const UNATTENDED: Pacing = Pacing {
        per_unit: 0.5,
        min: 1.5,
        max: 5.0,
        fallback: 2.0,
    };

    pub const INSTANT: Pacing = Pacing {
        per_unit: 0.0,
        min: 0.0,
        max: 0.0,
        fallback: 0.0,
    };

    pub fn delay_for(&self, plugin_name: &str) -> Duration {
        let secs = match first_number(plugin_name) {
            Some(n) => (n * self.per_unit).clamp(self.min, self.max),
            None => self.fallback,
        };
        Duration::from_secs_f64(secs)
    }
}

fn first_number(text: &str) -> Option<f64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Fabricates results without executing plugins
#[derive(Debug)]
pub struct SimulatedRunner {
    outcomes: Outcomes,
    pacing: Pacing,
    rng: Mutex<StdRng>,
}

impl SimulatedRunner {
    pub fn new(outcomes: Outcomes, pacing: Pacing) -> Self {
        Self {
            outcomes,
            pacing,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic runner for reproducible simulations
    pub fn with_seed(outcomes: Outcomes, pacing: Pacing, seed: u64) -> Self {
        Self {
            outcomes,
            pacing,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn succeeds(&self) -> bool {
        match self.outcomes {
            Outcomes::AllSuccess => true,
            Outcomes::Random { success_rate } => {
                let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
                rng.gen_bool(success_rate.clamp(0.0, 1.0))
            }
        }
    }
}

impl PluginRunner for SimulatedRunner {
    fn run(&self, plugin: &dyn TaskPlugin) -> ExecutionResult {
        let delay = self.pacing.delay_for(plugin.name());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let secs = delay.as_secs_f64();
        if self.succeeds() {
            ExecutionResult::success(format!("simulated success (took {secs:.1}s)"))
        } else {
            ExecutionResult::failure(format!("simulated failure (took {secs:.1}s)"))
        }
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use systools_plugin_api::PluginResult;

    struct Scripted {
        name: &'static str,
        calls: AtomicUsize,
        behavior: fn() -> PluginResult<ExecutionResult>,
    }

    impl Scripted {
        fn new(name: &'static str, behavior: fn() -> PluginResult<ExecutionResult>) -> Self {
            Self {
                name,
                calls: AtomicUsize::new(0),
                behavior,
            }
        }
    }

    impl TaskPlugin for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "scripted"
        }

        fn execute(&self) -> PluginResult<ExecutionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.behavior)()
        }
    }

    #[test]
    fn test_live_runner_passes_results_through() {
        let plugin = Scripted::new("ok", || Ok(ExecutionResult::success("fine").with_reboot()));
        let result = LiveRunner.run(&plugin);
        assert!(result.success);
        assert!(result.reboot_requested);
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_live_runner_normalizes_errors() {
        let plugin = Scripted::new("err", || Err(anyhow::anyhow!("disk full")));
        let result = LiveRunner.run(&plugin);
        assert!(!result.success);
        assert_eq!(result.error_message(), "disk full");
    }

    #[test]
    fn test_live_runner_contains_panics() {
        let plugin = Scripted::new("boom", || panic!("plugin exploded"));
        let result = LiveRunner.run(&plugin);
        assert!(!result.success);
        assert_eq!(result.error_message(), "plugin exploded");
    }

    #[rstest]
    #[case("Step 4 - disk check", Pacing::INTERACTIVE, 1.2)]
    #[case("Step 1", Pacing::INTERACTIVE, 0.5)]
    #[case("Step 40", Pacing::INTERACTIVE, 3.0)]
    #[case("No digits here", Pacing::INTERACTIVE, 1.0)]
    #[case("Task 06 then 99", Pacing::UNATTENDED, 3.0)]
    #[case("Task 2", Pacing::UNATTENDED, 1.5)]
    #[case("Task 12", Pacing::UNATTENDED, 5.0)]
    #[case("Unnumbered", Pacing::UNATTENDED, 2.0)]
    #[case("Task 12", Pacing::INSTANT, 0.0)]
    fn test_pacing(#[case] name: &str, #[case] pacing: Pacing, #[case] expected: f64) {
        let delay = pacing.delay_for(name).as_secs_f64();
        assert!((delay - expected).abs() < 1e-9, "{name}: {delay} != {expected}");
    }

    #[test]
    fn test_simulation_never_executes_plugins() {
        let plugin = Scripted::new("Step 3", || panic!("must not run"));
        let runner = SimulatedRunner::new(Outcomes::AllSuccess, Pacing::INSTANT);

        let result = runner.run(&plugin);
        assert!(result.success);
        assert!(!result.reboot_requested);
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 0);
        assert!(runner.is_simulated());
    }

    #[test]
    fn test_seeded_simulation_is_reproducible() {
        let plugin = Scripted::new("Step", || Ok(ExecutionResult::done()));
        let outcomes = |seed| {
            let runner = SimulatedRunner::with_seed(Outcomes::random(), Pacing::INSTANT, seed);
            (0..32).map(|_| runner.run(&plugin).success).collect::<Vec<_>>()
        };

        let first = outcomes(7);
        assert_eq!(first, outcomes(7));
        assert!(first.iter().any(|ok| *ok));
        assert!(first.iter().any(|ok| !*ok));
    }

    #[rstest]
    #[case(0.0, false)]
    #[case(1.0, true)]
    fn test_extreme_success_rates(#[case] success_rate: f64, #[case] expected: bool) {
        let plugin = Scripted::new("Step", || Ok(ExecutionResult::done()));
        let runner =
            SimulatedRunner::with_seed(Outcomes::Random { success_rate }, Pacing::INSTANT, 1);
        assert!((0..10).all(|_| runner.run(&plugin).success == expected));
    }
}
