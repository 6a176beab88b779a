//! Checkup - check execution engine
//!
//! This library runs active network health checks (HTTP reachability, TLS
//! certificate validity, mail server connectivity, DNS records and their
//! propagation) through a uniform plugin contract, and executes large sets of
//! such checks concurrently with bounded resources and isolated failures.

pub mod config;
pub mod dispatch;
pub mod format;
pub mod net;
pub mod plugin;
pub mod plugins;
pub mod registry;
pub mod result;
pub mod runner;

// Re-export main types
pub use config::PluginConfig;
pub use dispatch::{DispatchError, run_check, try_run_check};
pub use plugin::{CheckPlugin, PluginInfo, PluginType};
pub use plugins::{builtin_registry, register_builtin_plugins};
pub use registry::{PluginConstructor, PluginRegistry, RegistryError};
pub use result::{CheckResult, CheckStatus, RawData, ResultError};
pub use runner::{CheckDescriptor, CheckOutcome, CheckRunner, RunSummary};

/// Re-export common error types
pub use anyhow;

/// Checkup result type using anyhow for error handling
pub type Result<T> = anyhow::Result<T>;
