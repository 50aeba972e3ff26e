//! Demonstration plugin.
//!
//! Writes an INI file recording the current user and a timestamp, plus a
//! short text file, into an output directory (the desktop by default,
//! the temp directory with `temp_dir = true`).

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use systools_plugin_api::{ExecutionResult, LoadContext, PluginResult, PluginSpec, TaskPlugin};

pub const KIND: &str = "sample";

const INI_FILE: &str = "systools_sample.ini";
const TXT_FILE: &str = "systools_sample.txt";

#[derive(Debug, Default, Deserialize)]
struct SampleSettings {
    output_dir: Option<PathBuf>,
    /// Write into the system temp directory
    #[serde(default)]
    temp_dir: bool,
    #[serde(default)]
    reboot: bool,
}

#[derive(Debug, Clone)]
pub struct SamplePlugin {
    name: String,
    description: String,
    output_dir: PathBuf,
    reboot: bool,
}

impl SamplePlugin {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            name: "Sample plugin".to_string(),
            description: "Creates a user info INI file and a text file to demonstrate plugins"
                .to_string(),
            output_dir,
            reboot: false,
        }
    }

    pub fn from_spec(spec: &PluginSpec, ctx: &LoadContext) -> PluginResult<Self> {
        let settings: SampleSettings = spec.settings()?;
        let output_dir = match (settings.output_dir, settings.temp_dir) {
            (Some(_), true) => {
                anyhow::bail!("sample plugin '{}': set output_dir or temp_dir, not both", spec.display_name())
            }
            (Some(dir), false) => ctx.resolve(dir),
            (None, true) => std::env::temp_dir(),
            (None, false) => default_output_dir(),
        };

        let mut plugin = Self::new(output_dir);
        if let Some(name) = &spec.name {
            plugin.name = name.clone();
        }
        if let Some(description) = &spec.description {
            plugin.description = description.clone();
        }
        plugin.reboot = settings.reboot;
        Ok(plugin)
    }

    fn write_ini(&self) -> Result<(), String> {
        let path = self.output_dir.join(INI_FILE);
        let content = format!(
            "[UserInfo]\nCurrentUser = {}\nTimestamp = {}\n",
            current_user(),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        fs::write(&path, content)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
        tracing::info!("Created INI file: {}", path.display());
        Ok(())
    }

    fn write_txt(&self) -> Result<(), String> {
        let path = self.output_dir.join(TXT_FILE);
        let content = "The SysTools sample plugin ran successfully.\n";
        fs::write(&path, content)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
        tracing::info!("Created text file: {}", path.display());
        Ok(())
    }
}

fn default_output_dir() -> PathBuf {
    dirs::desktop_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

impl TaskPlugin for SamplePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_available(&self) -> bool {
        self.output_dir.is_dir()
    }

    fn progress_message(&self) -> String {
        "Running the sample plugin...".to_string()
    }

    fn execute(&self) -> PluginResult<ExecutionResult> {
        let errors: Vec<String> = [self.write_ini(), self.write_txt()]
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if !errors.is_empty() {
            return Ok(ExecutionResult::failure(errors.join(" | ")));
        }

        let result = ExecutionResult::success("All sample tasks completed");
        Ok(if self.reboot { result.with_reboot() } else { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sample_writes_both_files() {
        let tmp = TempDir::new().unwrap();
        let plugin = SamplePlugin::new(tmp.path().to_path_buf());

        assert!(plugin.is_available());
        let result = plugin.execute().unwrap();
        assert!(result.success, "{:?}", result);

        let ini = fs::read_to_string(tmp.path().join(INI_FILE)).unwrap();
        assert!(ini.starts_with("[UserInfo]\nCurrentUser = "));
        assert!(ini.contains("Timestamp = "));
        assert!(tmp.path().join(TXT_FILE).is_file());
    }

    #[test]
    fn test_missing_output_dir_joins_errors() {
        let tmp = TempDir::new().unwrap();
        let plugin = SamplePlugin::new(tmp.path().join("missing"));

        assert!(!plugin.is_available());
        let result = plugin.execute().unwrap();
        assert!(!result.success);
        let error = result.error_message();
        assert!(error.contains(INI_FILE));
        assert!(error.contains(" | "));
        assert!(error.contains(TXT_FILE));
    }

    #[test]
    fn test_spec_overrides_and_relative_output_dir() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("out")).unwrap();
        let ctx = LoadContext::new(tmp.path(), "00_sample.toml");
        let spec = PluginSpec::new(KIND)
            .with_name("Demo")
            .with_setting("output_dir", "out")
            .with_setting("reboot", true);

        let plugin = SamplePlugin::from_spec(&spec, &ctx).unwrap();
        assert_eq!(plugin.name(), "Demo");
        assert!(plugin.is_available());
        assert!(plugin.execute().unwrap().reboot_requested);
        assert!(tmp.path().join("out").join(INI_FILE).is_file());
    }

    #[test]
    fn test_temp_dir_setting() {
        let tmp = TempDir::new().unwrap();
        let ctx = LoadContext::new(tmp.path(), "00_steps.toml");

        let spec = PluginSpec::new(KIND).with_setting("temp_dir", true);
        let plugin = SamplePlugin::from_spec(&spec, &ctx).unwrap();
        assert_eq!(plugin.output_dir, std::env::temp_dir());

        let both = spec.with_setting("output_dir", "out");
        assert!(SamplePlugin::from_spec(&both, &ctx).is_err());
    }
}
