use serde::{Deserialize, Serialize};
use tracing::error;

use crate::config::PluginConfig;
use crate::result::CheckResult;

/// Contract every check plugin fulfils
///
/// A plugin instance is built from one configuration map and used for a
/// single check. `validate_config` is side-effect free; `run_check` may touch
/// the network and reports expected failures as error-status results rather
/// than `Err`. An `Err` is reserved for unexpected faults, which the
/// dispatcher converts into an error result.
#[async_trait::async_trait]
pub trait CheckPlugin: Send + Sync {
    /// Configuration this instance was built with
    fn config(&self) -> &PluginConfig;

    /// Whether the configuration is complete and well-formed
    fn validate_config(&self) -> bool;

    /// Perform the check
    async fn run_check(&self) -> anyhow::Result<CheckResult>;
}

/// Static metadata and construction for a plugin type
pub trait PluginType: CheckPlugin + Sized + 'static {
    /// Registry name
    const NAME: &'static str;

    const DESCRIPTION: &'static str;

    fn required_config() -> &'static [&'static str];

    fn optional_config() -> &'static [&'static str] {
        &[]
    }

    fn from_config(config: PluginConfig) -> Self;

    fn info() -> PluginInfo {
        PluginInfo {
            description: Self::DESCRIPTION.to_string(),
            required_config: Self::required_config().iter().map(|k| k.to_string()).collect(),
            optional_config: Self::optional_config().iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Introspection record for a registered plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub description: String,
    pub required_config: Vec<String>,
    pub optional_config: Vec<String>,
}

/// Check that every required key is present, logging the ones that are not.
pub fn validate_required(config: &PluginConfig, plugin: &str, required: &[&str]) -> bool {
    let missing = config.missing_keys(required);
    if missing.is_empty() {
        return true;
    }

    error!(plugin, ?missing, "Missing required configuration parameters");
    false
}
