//! Environment-backed configuration for the session layer.

use std::{env, path::PathBuf};

use backend_platform::{AccountDirs, JsonFileSettingsStore, SettingsStoreError};
use thiserror::Error;

const DEFAULT_DATA_DIR: &str = "./.chatcore-store";
const SETTINGS_FILENAME: &str = "settings.json";
const DEFAULT_SESSION_EVENT_BUFFER: usize = 64;

/// Where session state lives and how it is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Root data directory; account working dirs live under `accounts/`.
    pub data_dir: PathBuf,
    /// JSON settings file holding the account list and active id.
    pub settings_file: PathBuf,
    /// Broadcast capacity for session events.
    pub session_event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(DEFAULT_DATA_DIR);
        Self {
            settings_file: data_dir.join(SETTINGS_FILENAME),
            data_dir,
            session_event_buffer: DEFAULT_SESSION_EVENT_BUFFER,
        }
    }
}

impl SessionConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let data_dir = optional_trimmed_env("CHATCORE_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let settings_file = optional_trimmed_env("CHATCORE_SETTINGS_FILE", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(SETTINGS_FILENAME));
        let session_event_buffer = parse_positive_usize(
            "CHATCORE_SESSION_EVENT_BUFFER",
            DEFAULT_SESSION_EVENT_BUFFER,
            &mut lookup,
        )?;

        Ok(Self {
            data_dir,
            settings_file,
            session_event_buffer,
        })
    }

    pub fn account_dirs(&self) -> AccountDirs {
        AccountDirs::new(&self.data_dir)
    }

    /// Open the settings file, creating it on first write.
    pub fn open_settings(&self) -> Result<JsonFileSettingsStore, SettingsStoreError> {
        JsonFileSettingsStore::open(&self.settings_file)
    }
}

/// Errors produced while parsing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_positive_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    let parsed = value
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value: value.clone(),
            reason: err.to_string(),
        })?;
    if parsed == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(parsed)
}
