//! Resolve a plugin by name, validate, run, and contain faults.
//!
//! Nothing a plugin does (a failed probe, an `Err`, or a panic) escapes
//! [`run_check`]: every path ends in exactly one [`CheckResult`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::PluginConfig;
use crate::registry::PluginRegistry;
use crate::result::CheckResult;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Plugin '{0}' not found in registry")]
    PluginNotFound(String),

    #[error("Invalid configuration for plugin {plugin}")]
    InvalidConfiguration { plugin: String, config: PluginConfig },

    #[error("Exception running check: {message}")]
    ExecutionFault { message: String, error_type: String },

    #[error("Check timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Invalid check descriptor: {0}")]
    InvalidDescriptor(String),
}

impl DispatchError {
    pub fn error_type(&self) -> &str {
        match self {
            DispatchError::PluginNotFound(_) => "PluginNotFound",
            DispatchError::InvalidConfiguration { .. } => "InvalidConfiguration",
            DispatchError::ExecutionFault { error_type, .. } => error_type,
            DispatchError::Timeout(_) => "BatchTimeout",
            DispatchError::InvalidDescriptor(_) => "InvalidDescriptor",
        }
    }

    /// The error-status result reported in place of a check outcome
    pub fn into_result(self) -> CheckResult {
        let message = self.to_string();
        let error_type = self.error_type().to_string();
        match self {
            DispatchError::InvalidConfiguration { config, .. } => CheckResult::error(message)
                .with_detail("config", config.into_value())
                .with_detail("error_type", error_type),
            DispatchError::ExecutionFault { message: detail, .. } => {
                CheckResult::error_from(message, detail, error_type)
            }
            DispatchError::Timeout(timeout) => CheckResult::error_from(message, "timeout", error_type)
                .with_detail("timeout", timeout.as_secs_f64()),
            DispatchError::PluginNotFound(_) | DispatchError::InvalidDescriptor(_) => {
                let detail = message.clone();
                CheckResult::error_from(message, detail, error_type)
            }
        }
    }
}

/// Run one check, surfacing dispatcher-level failures as `Err`
pub async fn try_run_check(
    registry: &PluginRegistry,
    plugin_type: &str,
    config: PluginConfig,
) -> Result<CheckResult, DispatchError> {
    let constructed = std::panic::catch_unwind(AssertUnwindSafe(|| registry.get(plugin_type, config)));
    let plugin = match constructed {
        Ok(Ok(plugin)) => plugin,
        Ok(Err(_)) => {
            warn!(plugin = plugin_type, "Plugin not found in registry");
            return Err(DispatchError::PluginNotFound(plugin_type.to_string()));
        }
        Err(panic) => {
            return Err(DispatchError::ExecutionFault {
                message: panic_message(panic.as_ref()),
                error_type: "panic".into(),
            });
        }
    };

    let valid = std::panic::catch_unwind(AssertUnwindSafe(|| plugin.validate_config())).map_err(
        |panic| DispatchError::ExecutionFault {
            message: panic_message(panic.as_ref()),
            error_type: "panic".into(),
        },
    )?;

    if !valid {
        warn!(plugin = plugin_type, "Invalid configuration for plugin");
        return Err(DispatchError::InvalidConfiguration {
            plugin: plugin_type.to_string(),
            config: plugin.config().clone(),
        });
    }

    debug!(plugin = plugin_type, "Running check");
    match AssertUnwindSafe(plugin.run_check()).catch_unwind().await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => {
            error!(plugin = plugin_type, error = %err, "Check failed with an unexpected error");
            Err(DispatchError::ExecutionFault {
                message: format!("{err:#}"),
                error_type: fault_type(&err).to_string(),
            })
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(plugin = plugin_type, panic = %message, "Check panicked");
            Err(DispatchError::ExecutionFault { message, error_type: "panic".into() })
        }
    }
}

/// Run one check; every failure becomes an error-status result
pub async fn run_check(registry: &PluginRegistry, plugin_type: &str, config: PluginConfig) -> CheckResult {
    try_run_check(registry, plugin_type, config).await.unwrap_or_else(DispatchError::into_result)
}

/// Best-effort type tag for an unexpected plugin error
fn fault_type(err: &anyhow::Error) -> &'static str {
    if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        "Timeout"
    } else if err.downcast_ref::<std::io::Error>().is_some() {
        "io::Error"
    } else if err.downcast_ref::<reqwest::Error>().is_some() {
        "reqwest::Error"
    } else if err.downcast_ref::<serde_json::Error>().is_some() {
        "serde_json::Error"
    } else {
        "Error"
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "plugin panicked".to_string()
    }
}
