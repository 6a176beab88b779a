use std::io::Error as IoError;
use std::path::PathBuf;

use checkup::RegistryError;
use thiserror::Error;

use crate::settings::SettingsError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Plugin registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Invalid check parameters: {0}")]
    InvalidParams(String),

    #[error("Cannot read batch file {}: {reason}", path.display())]
    BatchFile { path: PathBuf, reason: String },

    #[error("Invalid log setting: {0}")]
    InvalidLogSetting(String),
}
