//! Plugin contract for SysTools.
//!
//! Every unit of work the runner executes implements [`TaskPlugin`]. Plugins
//! are described on disk by TOML manifests ([`PluginManifest`]) and turned
//! into live objects by a [`PluginRegistry`], a compile-time table mapping a
//! manifest `kind` to a factory.

pub mod manifest;
pub mod registry;
pub mod result;

pub use manifest::*;
pub use registry::*;
pub use result::*;

/// Current plugin manifest API version
pub const CURRENT_API_VERSION: u32 = 1;

/// Result type for plugin operations
pub type PluginResult<T> = anyhow::Result<T>;

/// Core trait that all plugins must implement.
///
/// The runner holds plugins behind `Arc<dyn TaskPlugin>` for the lifetime of
/// one discovery pass and never mutates them, so every method takes `&self`.
pub trait TaskPlugin: Send + Sync {
    /// Stable, human-readable name. Called for every log line, keep it cheap.
    fn name(&self) -> &str;

    /// Human-readable summary shown next to the name.
    fn description(&self) -> &str;

    /// Whether the plugin can run on this machine.
    ///
    /// Must be free of side effects. Implementations report internal
    /// failures as `false`; a panic is treated the same way by the caller.
    fn is_available(&self) -> bool {
        true
    }

    /// Status line shown while the plugin runs
    fn progress_message(&self) -> String {
        format!("Running: {}", self.name())
    }

    /// Run the unit of work.
    ///
    /// Returning `Err` is equivalent to a failed [`ExecutionResult`] carrying
    /// the error text.
    fn execute(&self) -> PluginResult<ExecutionResult>;
}

impl std::fmt::Debug for dyn TaskPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPlugin")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}
