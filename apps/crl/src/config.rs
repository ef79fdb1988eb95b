//! # Configuration
//!
//! Optional TOML file read with `--config <path>`:
//!
//! ```toml
//! log_format = "json"          # "text" (default) or "json"
//! default_file = "model.json"  # used when --file is not given
//! record_undo = true           # roll back partial edits of a failed command
//! ```

use crl_core::CrlError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Working file used when neither `--file` nor `default_file` is set.
pub const DEFAULT_WORKING_FILE: &str = "universe.json";

/// Upper bound on the size of a configuration file (64 KB).
const MAX_CONFIG_FILE_SIZE: u64 = 64 * 1024;

/// Settings loaded from the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrlConfig {
    pub log_format: LogFormat,
    pub default_file: Option<PathBuf>,
    pub record_undo: bool,
}

impl Default for CrlConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Text,
            default_file: None,
            record_undo: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl CrlConfig {
    /// Load the configuration, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, CrlError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let metadata = std::fs::metadata(path).map_err(|e| {
            CrlError::Io(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(CrlError::Serialization(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            CrlError::Io(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, CrlError> {
        toml::from_str(text).map_err(|e| CrlError::Serialization(format!("Invalid config: {}", e)))
    }

    /// The working file: the command line wins over the config file.
    #[must_use]
    pub fn working_file(&self, from_cli: Option<&Path>) -> PathBuf {
        from_cli
            .map(Path::to_path_buf)
            .or_else(|| self.default_file.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKING_FILE))
    }
}

// =============================================================================
// TESTS
// =============================================================================
