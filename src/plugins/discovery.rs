//! Plugin discovery.
//!
//! A plugins directory holds TOML manifests. Candidates are visited in
//! lexicographic file-name order (`00_sample.toml`, `01_reg_repair.toml`,
//! ...) and the entries of each manifest in declaration order; that order is
//! the execution order. Broken candidates and entries are logged and skipped,
//! never fatal.

use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use systools_plugin_api::{parse_plugin_manifest, LoadContext, PluginRegistry, TaskPlugin};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::engine::runner::panic_message;

/// Extension of plugin manifest files
pub const MANIFEST_EXTENSION: &str = "toml";

/// Problems met during discovery. None of them abort the pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryIssue {
    #[error("plugin directory not found: {}", dir.display())]
    DirectoryNotFound { dir: PathBuf },

    #[error("failed to read plugin directory {}: {reason}", dir.display())]
    ReadDir { dir: PathBuf, reason: String },

    #[error("failed to load {file}: {reason}")]
    Load { file: String, reason: String },

    #[error("[{file}] failed to instantiate '{entry}': {reason}")]
    Instantiate {
        file: String,
        entry: String,
        reason: String,
    },

    #[error("[{file}] plugin rejected: {reason}")]
    Invalid { file: String, reason: String },
}

/// Display data for a plugin, kept for plugins that cannot run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub description: String,
    pub file: String,
}

/// Result of one discovery pass
#[derive(Debug, Default)]
pub struct Discovery {
    pub dir: PathBuf,
    /// Validated, available plugins in execution order
    pub plugins: Vec<Arc<dyn TaskPlugin>>,
    /// Plugins whose availability check failed, for display only
    pub unavailable: Vec<PluginSummary>,
    pub issues: Vec<DiscoveryIssue>,
}

impl Discovery {
    fn empty(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn TaskPlugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    /// Plugins at the given zero-based indices; out-of-range indices are ignored
    pub fn select(&self, indices: &[usize]) -> Vec<Arc<dyn TaskPlugin>> {
        indices
            .iter()
            .filter_map(|&i| self.plugins.get(i).cloned())
            .collect()
    }

    pub fn directory_missing(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| matches!(issue, DiscoveryIssue::DirectoryNotFound { .. }))
    }
}

/// Scans a directory and turns manifests into plugins through a registry
#[derive(Debug, Clone)]
pub struct PluginDiscovery {
    registry: PluginRegistry,
}

impl PluginDiscovery {
    pub fn new(registry: PluginRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Discover plugins in `dir`, re-reading it from scratch
    pub fn discover(&self, dir: &Path) -> Discovery {
        let mut discovery = Discovery::empty(dir);

        if !dir.exists() {
            warn!("Plugin directory does not exist: {}", dir.display());
            discovery.issues.push(DiscoveryIssue::DirectoryNotFound {
                dir: dir.to_path_buf(),
            });
            return discovery;
        }

        let candidates = match candidate_files(dir) {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Failed to read plugin directory {}: {}", dir.display(), e);
                discovery.issues.push(DiscoveryIssue::ReadDir {
                    dir: dir.to_path_buf(),
                    reason: e.to_string(),
                });
                return discovery;
            }
        };

        info!(
            "Discovered plugin manifests in order: {:?}",
            candidates
                .iter()
                .map(|p| file_label(p))
                .collect::<Vec<_>>()
        );

        for path in &candidates {
            self.load_candidate(path, &mut discovery);
        }

        info!(
            "Loaded {} available plugin(s) from {}",
            discovery.plugins.len(),
            dir.display()
        );
        discovery
    }

    fn load_candidate(&self, path: &Path, discovery: &mut Discovery) {
        let file = file_label(path);

        let manifest = match fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|content| parse_plugin_manifest(&content))
        {
            Ok(manifest) => manifest,
            Err(e) => {
                error!("Failed to load {}: {:#}", file, e);
                discovery.issues.push(DiscoveryIssue::Load {
                    file,
                    reason: format!("{e:#}"),
                });
                return;
            }
        };

        let manifest_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let ctx = LoadContext::new(manifest_dir, file.clone());

        for spec in &manifest.plugins {
            let built = catch_unwind(AssertUnwindSafe(|| self.registry.instantiate(spec, &ctx)));
            let plugin = match built {
                Ok(Ok(plugin)) => plugin,
                Ok(Err(e)) => {
                    error!("[{}] Failed to instantiate '{}': {:#}", file, spec.display_name(), e);
                    discovery.issues.push(DiscoveryIssue::Instantiate {
                        file: file.clone(),
                        entry: spec.display_name().to_string(),
                        reason: format!("{e:#}"),
                    });
                    continue;
                }
                Err(panic) => {
                    let reason = panic_message(panic);
                    error!("[{}] Plugin factory for '{}' panicked: {}", file, spec.display_name(), reason);
                    discovery.issues.push(DiscoveryIssue::Instantiate {
                        file: file.clone(),
                        entry: spec.display_name().to_string(),
                        reason,
                    });
                    continue;
                }
            };

            if plugin.name().trim().is_empty() {
                warn!("[{}] Plugin validation failed: empty name ({})", file, spec.kind);
                discovery.issues.push(DiscoveryIssue::Invalid {
                    file: file.clone(),
                    reason: format!("plugin of kind '{}' has an empty name", spec.kind),
                });
                continue;
            }

            if check_available(plugin.as_ref()) {
                info!("[{}] Loaded plugin: {}", file, plugin.name());
                discovery.plugins.push(plugin);
            } else {
                warn!("[{}] Plugin not available, skipping: {}", file, plugin.name());
                discovery.unavailable.push(PluginSummary {
                    name: plugin.name().to_string(),
                    description: plugin.description().to_string(),
                    file: file.clone(),
                });
            }
        }
    }
}

/// Availability check that treats a panic as "unavailable"
fn check_available(plugin: &dyn TaskPlugin) -> bool {
    match catch_unwind(AssertUnwindSafe(|| plugin.is_available())) {
        Ok(available) => available,
        Err(panic) => {
            error!(
                "Availability check for {} panicked: {}",
                plugin.name(),
                panic_message(panic)
            );
            false
        }
    }
}

fn candidate_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_candidate(&path) {
            candidates.push(path);
        } else {
            debug!("Ignoring non-plugin entry: {}", path.display());
        }
    }

    candidates.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(candidates)
}

fn is_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    path.is_file()
        && !name.starts_with('_')
        && !name.starts_with('.')
        && path.extension().and_then(|e| e.to_str()) == Some(MANIFEST_EXTENSION)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
