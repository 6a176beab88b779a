use std::{env, fmt, fs, path};

use checkup::runner::default_max_workers;
use checkup::plugins::HickoryQuerier;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read {}: {source}", path.display())]
    ReadFailed { path: path::PathBuf, source: std::io::Error },

    #[error("Failed to write {}: {source}", path.display())]
    WriteFailed { path: path::PathBuf, source: std::io::Error },

    #[error("Failed to parse settings: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("Neither XDG_CONFIG_HOME nor a home directory is available")]
    ConfigPathUnavailable,
}

/// Engine-wide defaults for the command line front-end
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub runner: RunnerSettings,
    pub dns: DnsSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub max_workers: usize,
    pub batch_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSettings {
    pub max_in_flight_queries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self { max_workers: default_max_workers(), batch_size: 10, timeout_secs: None }
    }
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self { max_in_flight_queries: HickoryQuerier::DEFAULT_IN_FLIGHT }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".into(), format: None }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/checkup/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, SettingsError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(SettingsError::ConfigPathUnavailable);
    };

    Ok(path.join("checkup/config.toml"))
}

impl fmt::Display for EngineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Engine Configuration:")?;
        write_title_1(f, "Runner")?;
        write_1(f, "Max Workers", &self.runner.max_workers)?;
        write_1(f, "Batch Size", &self.runner.batch_size)?;
        match self.runner.timeout_secs {
            Some(secs) => write_1(f, "Timeout", &format!("{secs}s"))?,
            None => write_1(f, "Timeout", &"none")?,
        }
        write_title_1(f, "DNS")?;
        write_1(f, "Max In-Flight Queries", &self.dns.max_in_flight_queries)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format.as_deref().unwrap_or("from RUST_LOG_FORMAT"))?;

        Ok(())
    }
}

impl EngineSettings {
    /// Load settings from a file
    ///
    /// Reads ~/.config/checkup/config.toml or the specified path (with its
    /// extension forced to .toml), writing the defaults there if the file
    /// does not exist. Returns the settings and the path they came from.
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<(Self, path::PathBuf), SettingsError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| SettingsError::ReadFailed { path: config_path.clone(), source })?;
            Ok((toml::from_str(raw_string.as_str())?, config_path))
        } else {
            let settings = Self::default();
            settings.write_config(&config_path)?;
            Ok((settings, config_path))
        }
    }

    /// Serialize and write settings to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), SettingsError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| SettingsError::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str).map_err(|source| SettingsError::WriteFailed { path: path.to_path_buf(), source })
    }
}
