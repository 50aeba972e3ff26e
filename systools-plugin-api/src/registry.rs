use crate::{PluginResult, PluginSpec, TaskPlugin};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Where a manifest entry came from, handed to factories so they can
/// resolve paths relative to the manifest.
#[derive(Debug, Clone)]
pub struct LoadContext {
    /// Directory holding the manifest file
    pub manifest_dir: PathBuf,
    /// File name of the manifest, used in log lines
    pub source: String,
}

impl LoadContext {
    pub fn new(manifest_dir: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            manifest_dir: manifest_dir.into(),
            source: source.into(),
        }
    }

    /// Resolve a path from the manifest against the manifest directory
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.manifest_dir.join(path)
        }
    }
}

/// Constructor for one plugin kind
pub type PluginFactory =
    Arc<dyn Fn(&PluginSpec, &LoadContext) -> PluginResult<Box<dyn TaskPlugin>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Plugin kind '{0}' is already registered")]
    DuplicateKind(String),

    #[error("Unknown plugin kind '{kind}' (known kinds: {known})")]
    UnknownKind { kind: String, known: String },
}

/// Compile-time table of plugin kinds.
///
/// Manifests refer to a `kind`; the registry maps that kind to the factory
/// that builds the plugin object.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a plugin kind
    pub fn register<F>(&mut self, kind: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&PluginSpec, &LoadContext) -> PluginResult<Box<dyn TaskPlugin>> + Send + Sync + 'static,
    {
        if self.factories.contains_key(kind) {
            return Err(RegistryError::DuplicateKind(kind.to_string()));
        }

        self.factories.insert(kind.to_string(), Arc::new(factory));
        tracing::debug!("Registered plugin kind: {}", kind);
        Ok(())
    }

    /// Whether a kind is known
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build the plugin described by `spec`
    pub fn instantiate(
        &self,
        spec: &PluginSpec,
        ctx: &LoadContext,
    ) -> PluginResult<Arc<dyn TaskPlugin>> {
        let factory = self.factories.get(&spec.kind).ok_or_else(|| RegistryError::UnknownKind {
            kind: spec.kind.clone(),
            known: self.kinds().join(", "),
        })?;

        let plugin = factory(spec, ctx)?;
        Ok(Arc::from(plugin))
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExecutionResult;

    struct Named(String);

    impl TaskPlugin for Named {
        fn name(&self) -> &str {
            &self.0
        }

        fn description(&self) -> &str {
            "test plugin"
        }

        fn execute(&self) -> PluginResult<ExecutionResult> {
            Ok(ExecutionResult::done())
        }
    }

    fn registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry
            .register("named", |spec, _ctx| {
                Ok(Box::new(Named(spec.display_name().to_string())))
            })
            .unwrap();
        registry
            .register("broken", |_spec, _ctx| anyhow::bail!("cannot build"))
            .unwrap();
        registry
    }

    #[test]
    fn test_instantiate_known_kind() {
        let registry = registry();
        let ctx = LoadContext::new("/plugins", "00_test.toml");
        let plugin = registry
            .instantiate(&PluginSpec::new("named").with_name("first"), &ctx)
            .unwrap();
        assert_eq!(plugin.name(), "first");
    }

    #[test]
    fn test_unknown_kind_lists_known_kinds() {
        let registry = registry();
        let ctx = LoadContext::new("/plugins", "00_test.toml");
        let err = registry
            .instantiate(&PluginSpec::new("missing"), &ctx)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown plugin kind 'missing' (known kinds: broken, named)"
        );
    }

    #[test]
    fn test_factory_error_is_returned() {
        let registry = registry();
        let ctx = LoadContext::new("/plugins", "00_test.toml");
        let err = registry
            .instantiate(&PluginSpec::new("broken"), &ctx)
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot build");
    }

    #[test]
    fn test_duplicate_kind_is_rejected() {
        let mut registry = registry();
        let result = registry.register("named", |_spec, _ctx| anyhow::bail!("never"));
        assert!(matches!(result, Err(RegistryError::DuplicateKind(kind)) if kind == "named"));
        assert!(registry.contains("named"));
    }

    #[test]
    fn test_resolve_relative_to_manifest() {
        let ctx = LoadContext::new("/opt/systools/plugins", "01_reg.toml");
        assert_eq!(
            ctx.resolve("tools/reg.ps1"),
            PathBuf::from("/opt/systools/plugins/tools/reg.ps1")
        );
        assert_eq!(ctx.resolve("/bin/sh"), PathBuf::from("/bin/sh"));
    }
}
