//! Plugin kinds shipped with SysTools.
//!
//! - `command`: runs an external program (scripts, installers, registry tools)
//! - `sample`: demonstration plugin that writes a couple of files

pub mod command;
pub mod sample;

pub use command::CommandPlugin;
pub use sample::SamplePlugin;

use systools_plugin_api::{PluginRegistry, RegistryError};

/// Register every bundled plugin kind
pub fn register_builtin(registry: &mut PluginRegistry) -> Result<(), RegistryError> {
    registry.register(command::KIND, |spec, ctx| {
        Ok(Box::new(CommandPlugin::from_spec(spec, ctx)?))
    })?;
    registry.register(sample::KIND, |spec, ctx| {
        Ok(Box::new(SamplePlugin::from_spec(spec, ctx)?))
    })?;
    Ok(())
}

/// Registry holding only the bundled kinds
pub fn builtin_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    if let Err(e) = register_builtin(&mut registry) {
        // Only reachable if the kinds above collide with each other
        tracing::error!("Failed to register builtin plugins: {}", e);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_kinds_are_registered() {
        let registry = builtin_registry();
        assert_eq!(registry.kinds(), vec!["command", "sample"]);
    }

    #[test]
    fn test_registering_twice_fails() {
        let mut registry = builtin_registry();
        assert!(register_builtin(&mut registry).is_err());
    }
}
