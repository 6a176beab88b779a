//! Built-in check plugins.

pub mod dns;
pub mod mail;
pub mod ssl;
pub mod website;

use std::sync::Arc;

use crate::registry::{PluginRegistry, RegistryError};

pub use dns::{DnsQuerier, DnsRecordPlugin, HickoryQuerier};
pub use mail::MailServerPlugin;
pub use ssl::SslCertificatePlugin;
pub use website::WebsitePlugin;

/// Register every built-in plugin. Plugins that resolve names share `querier`,
/// and with it the global DNS query budget.
pub fn register_builtin_plugins(
    registry: &mut PluginRegistry,
    querier: Arc<dyn DnsQuerier>,
) -> Result<(), RegistryError> {
    registry.register_type::<WebsitePlugin>()?;
    registry.register_type::<SslCertificatePlugin>()?;

    let mail_querier = Arc::clone(&querier);
    registry.register_type_with(move |config| MailServerPlugin::new(config, Arc::clone(&mail_querier)))?;
    registry.register_type_with(move |config| DnsRecordPlugin::new(config, Arc::clone(&querier)))?;
    Ok(())
}

/// A fresh registry holding the built-in plugins
pub fn builtin_registry(querier: Arc<dyn DnsQuerier>) -> Result<PluginRegistry, RegistryError> {
    let mut registry = PluginRegistry::new();
    register_builtin_plugins(&mut registry, querier)?;
    Ok(registry)
}
