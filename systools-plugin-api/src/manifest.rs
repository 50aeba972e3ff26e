use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use semver::Version;

/// Plugin manifest parsed from one candidate file in the plugins directory.
///
/// A manifest declares one or more plugins; their declaration order is the
/// order in which they are discovered.
///
/// ```toml
/// api_version = 1
///
/// [[plugin]]
/// kind = "command"
/// name = "Registry repair"
/// description = "Replace Administrator paths in the registry"
/// program = "powershell"
/// args = ["-File", "tools/reg.ps1"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default = "default_api_version")]
    pub api_version: u32,
    #[serde(rename = "plugin", default)]
    pub plugins: Vec<PluginSpec>,
}

fn default_api_version() -> u32 {
    super::CURRENT_API_VERSION
}

/// One `[[plugin]]` entry of a manifest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginSpec {
    /// Registered plugin kind used to instantiate this entry
    pub kind: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<Version>,
    /// Kind-specific keys, interpreted by the factory
    #[serde(flatten)]
    pub settings: toml::Table,
}

impl PluginSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            description: None,
            version: None,
            settings: toml::Table::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_setting(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.settings.insert(key.to_string(), value.into());
        self
    }

    /// Deserialize the kind-specific settings into a typed struct
    pub fn settings<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let value = toml::Value::Table(self.settings.clone());
        value.try_into().map_err(|e| {
            anyhow::anyhow!("invalid settings for plugin kind '{}': {}", self.kind, e)
        })
    }

    /// Name to use in logs before the plugin is instantiated
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }
}

impl PluginManifest {
    /// Validate that this manifest is compatible with the current API
    pub fn validate_compatibility(&self) -> anyhow::Result<()> {
        if self.api_version != super::CURRENT_API_VERSION {
            anyhow::bail!(
                "Manifest requires API version {}, but current version is {}",
                self.api_version,
                super::CURRENT_API_VERSION
            );
        }

        if self.plugins.is_empty() {
            anyhow::bail!("Manifest declares no [[plugin]] entries");
        }

        if let Some(spec) = self.plugins.iter().find(|p| p.kind.trim().is_empty()) {
            anyhow::bail!("Plugin '{}' has an empty kind", spec.display_name());
        }

        Ok(())
    }
}

/// Parse a plugin manifest from TOML content
pub fn parse_plugin_manifest(toml_content: &str) -> anyhow::Result<PluginManifest> {
    let manifest: PluginManifest = toml::from_str(toml_content)?;
    manifest.validate_compatibility()?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_manifest() {
        let toml_content = r#"
api_version = 1

[[plugin]]
kind = "command"
name = "Registry repair"
description = "Fix registry paths"
version = "1.2.0"
program = "powershell"
args = ["-File", "reg.ps1"]

[[plugin]]
kind = "sample"
"#;

        let manifest = parse_plugin_manifest(toml_content).unwrap();
        assert_eq!(manifest.plugins.len(), 2);

        let first = &manifest.plugins[0];
        assert_eq!(first.kind, "command");
        assert_eq!(first.display_name(), "Registry repair");
        assert_eq!(first.version, Some(Version::new(1, 2, 0)));
        assert_eq!(first.settings["program"].as_str(), Some("powershell"));
        assert!(!first.settings.contains_key("name"));

        assert_eq!(manifest.plugins[1].display_name(), "sample");
    }

    #[test]
    fn test_api_version_defaults_to_current() {
        let manifest = parse_plugin_manifest("[[plugin]]\nkind = \"sample\"\n").unwrap();
        assert_eq!(manifest.api_version, crate::CURRENT_API_VERSION);
    }

    #[test]
    fn test_invalid_api_version() {
        let result = parse_plugin_manifest("api_version = 999\n[[plugin]]\nkind = \"sample\"\n");
        let error_msg = result.unwrap_err().to_string();
        assert!(error_msg.contains("requires API version 999"));
    }

    #[test]
    fn test_empty_manifest_is_rejected() {
        assert!(parse_plugin_manifest("api_version = 1\n").is_err());
        assert!(parse_plugin_manifest("[[plugin]]\nkind = \" \"\n").is_err());
        assert!(parse_plugin_manifest("not toml at all [").is_err());
    }

    #[test]
    fn test_typed_settings() {
        #[derive(Debug, Deserialize)]
        struct Settings {
            program: String,
            #[serde(default)]
            args: Vec<String>,
        }

        let spec = PluginSpec::new("command")
            .with_name("echo")
            .with_setting("program", "echo");
        let settings: Settings = spec.settings().unwrap();
        assert_eq!(settings.program, "echo");
        assert!(settings.args.is_empty());

        let broken = PluginSpec::new("command").with_setting("program", 3);
        let err = broken.settings::<Settings>().unwrap_err();
        assert!(err.to_string().contains("invalid settings for plugin kind 'command'"));
    }
}
