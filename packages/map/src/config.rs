//! Client configuration.
//!
//! A default TOML file is embedded at compile time; deployments override it
//! with a file of their own. Both tables are optional and every field falls
//! back to its default.

use std::path::{Path, PathBuf};

use citymap_backend::BackendConfig;
use citymap_geocoder::GeocoderConfig;
use serde::{Deserialize, Serialize};

use crate::ValidationError;

const DEFAULT_CONFIG: &str = include_str!("../config/citymap.toml");

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The override file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The TOML did not match the expected shape.
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Everything a [`crate::MapSession`] needs to start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Backend connection settings.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Client behavior.
    #[serde(default)]
    pub map: MapOptions,
    /// Address lookup settings.
    #[serde(default)]
    pub geocoder: GeocoderConfig,
}

impl MapConfig {
    /// The configuration embedded in the binary.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the embedded file is malformed.
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::parse(DEFAULT_CONFIG)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not valid.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::de::from_str(text)?)
    }

    /// Loads configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded config from {}", path.display());
        Self::parse(&text)
    }
}

/// Capabilities and validation rules of the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapOptions {
    /// Longest accepted feature name, in characters.
    pub max_name_len: usize,
    /// Allow drawing circles.
    pub circles: bool,
    /// Allow drawing and loading line strings.
    pub line_strings: bool,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            max_name_len: 50,
            circles: false,
            line_strings: false,
        }
    }
}

impl MapOptions {
    /// Trims a user-entered name and checks it against the naming rule.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the name is empty, spans several
    /// lines, or is longer than [`Self::max_name_len`].
    pub fn validate_name(&self, name: &str) -> Result<String, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if name.contains(['\n', '\r']) {
            return Err(ValidationError::MultilineName);
        }
        let len = name.chars().count();
        if len > self.max_name_len {
            return Err(ValidationError::NameTooLong {
                len,
                max: self.max_name_len,
            });
        }
        Ok(name.to_string())
    }
}
