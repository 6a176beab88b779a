//! Name to plugin-constructor mapping.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::PluginConfig;
use crate::plugin::{CheckPlugin, PluginInfo, PluginType};

/// Builds a fresh plugin instance for one check
pub type PluginConstructor = Arc<dyn Fn(PluginConfig) -> Box<dyn CheckPlugin> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Plugin '{0}' is already registered")]
    DuplicateRegistration(String),

    #[error("Invalid plugin '{name}': {reason}")]
    InvalidPlugin { name: String, reason: String },

    #[error("Plugin '{0}' not found in registry")]
    PluginNotFound(String),
}

struct Entry {
    info: PluginInfo,
    constructor: PluginConstructor,
}

/// Registry of available check plugins
///
/// Registration happens while the registry is exclusively owned; afterwards
/// it is shared read-only (usually behind an `Arc`) by all concurrent checks.
#[derive(Default)]
pub struct PluginRegistry {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `name`. The first registration of a name wins.
    pub fn register(
        &mut self,
        name: &str,
        info: PluginInfo,
        constructor: PluginConstructor,
    ) -> Result<(), RegistryError> {
        validate_name(name)?;

        if self.entries.contains_key(name) {
            warn!(plugin = name, "Plugin already registered, keeping the existing one");
            return Err(RegistryError::DuplicateRegistration(name.to_string()));
        }

        info!(plugin = name, "Registered plugin");
        self.entries.insert(name.to_string(), Entry { info, constructor });
        self.order.push(name.to_string());
        Ok(())
    }

    /// Register a plugin type using its own metadata and `from_config`
    pub fn register_type<P: PluginType>(&mut self) -> Result<(), RegistryError> {
        let constructor: PluginConstructor = Arc::new(|config| Box::new(P::from_config(config)));
        self.register(P::NAME, P::info(), constructor)
    }

    /// Register a plugin type with a custom constructor, e.g. one capturing shared state
    pub fn register_type_with<P, F>(&mut self, constructor: F) -> Result<(), RegistryError>
    where
        P: PluginType,
        F: Fn(PluginConfig) -> P + Send + Sync + 'static,
    {
        let constructor: PluginConstructor = Arc::new(move |config| Box::new(constructor(config)));
        self.register(P::NAME, P::info(), constructor)
    }

    /// Build a fresh plugin instance for `name`
    pub fn get(&self, name: &str, config: PluginConfig) -> Result<Box<dyn CheckPlugin>, RegistryError> {
        let entry =
            self.entries.get(name).ok_or_else(|| RegistryError::PluginNotFound(name.to_string()))?;
        Ok((entry.constructor)(config))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn info(&self, name: &str) -> Option<&PluginInfo> {
        self.entries.get(name).map(|entry| &entry.info)
    }

    /// Registered names in registration order
    pub fn list_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn describe_all(&self) -> BTreeMap<String, PluginInfo> {
        self.entries.iter().map(|(name, entry)| (name.clone(), entry.info.clone())).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry").field("plugins", &self.order).finish()
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidPlugin {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }

    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_.-".contains(c)) {
        return Err(invalid("name may only contain lowercase letters, digits, '_', '.' and '-'"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("dns_record").is_ok());
        assert!(validate_name("mail-server.v2").is_ok());
        assert!(matches!(validate_name(""), Err(RegistryError::InvalidPlugin { .. })));
        assert!(matches!(validate_name("Website"), Err(RegistryError::InvalidPlugin { .. })));
        assert!(matches!(validate_name("a b"), Err(RegistryError::InvalidPlugin { .. })));
    }

    #[test]
    fn test_empty_registry() {
        let registry = PluginRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.list_names().is_empty());
        assert!(matches!(
            registry.get("anything", PluginConfig::new()),
            Err(RegistryError::PluginNotFound(name)) if name == "anything"
        ));
    }
}
