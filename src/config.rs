use crate::preview::PreviewKind;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("Configuration error: {0}")]
    Invalid(String),
}

/// Acceptance and preview policy for a dropzone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropzoneConfig {
    pub min_size_bytes: u64,
    pub max_size_bytes: u64,
    pub max_files: usize,
    /// Accept pattern, see [`crate::accept::accepts`]
    pub accept: String,
    pub preview_types: Vec<PreviewKind>,
    /// Presentation policy only. The manager does not enforce these.
    pub can_cancel: bool,
    pub can_remove: bool,
    pub can_restart: bool,
}

impl Default for DropzoneConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: 0,
            max_size_bytes: u64::MAX,
            max_files: usize::MAX,
            accept: "*".to_string(),
            preview_types: PreviewKind::ALL.to_vec(),
            can_cancel: true,
            can_remove: true,
            can_restart: true,
        }
    }
}

impl DropzoneConfig {
    /// Load configuration from the environment.
    /// In debug builds a `.env` file is loaded first.
    pub fn load() -> Result<Self, ConfigError> {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                tracing::info!("Loaded .env file");
            }
        }

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from a key lookup, falling back to defaults
    /// for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("DROPZONE_MIN_SIZE_BYTES") {
            config.min_size_bytes = parse_value("DROPZONE_MIN_SIZE_BYTES", &v)?;
        }
        if let Some(v) = lookup("DROPZONE_MAX_SIZE_BYTES") {
            config.max_size_bytes = parse_value("DROPZONE_MAX_SIZE_BYTES", &v)?;
        }
        if let Some(v) = lookup("DROPZONE_MAX_FILES") {
            config.max_files = parse_value("DROPZONE_MAX_FILES", &v)?;
        }
        if let Some(v) = lookup("DROPZONE_ACCEPT") {
            config.accept = v;
        }
        if let Some(v) = lookup("DROPZONE_PREVIEW_TYPES") {
            config.preview_types = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<PreviewKind>()
                        .map_err(|message| ConfigError::InvalidValue {
                            key: "DROPZONE_PREVIEW_TYPES".to_string(),
                            message,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_size_bytes > self.max_size_bytes {
            return Err(ConfigError::Invalid(format!(
                "min_size_bytes ({}) exceeds max_size_bytes ({})",
                self.min_size_bytes, self.max_size_bytes
            )));
        }
        Ok(())
    }

    pub fn size_allowed(&self, size: u64) -> bool {
        size >= self.min_size_bytes && size <= self.max_size_bytes
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}
