//! Configuration file structures for wasmrt.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ModuleEntry`]: Module definition to instantiate at startup

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// kind = "interpreter"
/// max_memory_pages = 256
///
/// [runtime.execution]
/// timeout_ms = 100
///
/// [[modules]]
/// name = "math"
/// path = "./modules/math.toml"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine + execution settings).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Modules to instantiate at startup, in order.
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// A module definition to instantiate at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleEntry {
    /// Name the module is registered under in the store.
    ///
    /// Other modules import from it by this name.
    pub name: String,

    /// Path to the decoded module definition (`.toml` or `.json`).
    pub path: String,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert_eq!(config.runtime.engine.max_call_depth, 1024);
        assert!(config.modules.is_empty());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r"
            [runtime.execution]
            timeout_ms = 250
        ";

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.runtime.execution.timeout_ms, 250);
        // Defaults applied
        assert_eq!(config.runtime.engine.max_memory_pages, 65_536);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.engine]
            kind = "interpreter"
            max_memory_pages = 256
            max_call_depth = 64

            [runtime.execution]
            timeout_ms = 50

            [[modules]]
            name = "math"
            path = "./math.toml"

            [[modules]]
            name = "app"
            path = "./app.json"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.runtime.engine.max_memory_pages, 256);
        assert_eq!(config.runtime.engine.max_call_depth, 64);
        assert_eq!(config.runtime.execution.timeout_ms, 50);
        assert_eq!(config.modules.len(), 2);
        assert_eq!(config.modules[0].name, "math");
        assert_eq!(config.modules[1].path, "./app.json");
    }

    #[test]
    fn test_parse_unknown_engine_kind() {
        let toml = r#"
            [runtime.engine]
            kind = "jit"
        "#;
        assert!(ConfigFile::from_toml(toml).is_err());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(result.is_err());
    }
}
