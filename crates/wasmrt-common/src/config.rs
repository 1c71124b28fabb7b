//! Configuration structures for wasmrt.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Backend selection and store-wide limits
//! - [`ExecutionConfig`]: Per-call execution limits

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::RuntimeError;

/// Largest number of pages a 32-bit linear memory can address (4 GiB).
pub const MAX_MEMORY_PAGES: u32 = 65_536;

/// Largest supported `max_call_depth`.
pub const MAX_CALL_DEPTH: u32 = 65_536;

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for a store.
/// It can be loaded from files (TOML, JSON).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl RuntimeConfig {
    /// Check that every limit is within what the runtime supports.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        self.engine.validate()
    }
}

/// Execution backend used by a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Reference interpreter that executes decoded instruction streams.
    #[default]
    Interpreter,
}

/// Engine configuration.
///
/// These settings are fixed when the store is constructed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Which backend compiles and runs module functions.
    #[serde(default)]
    pub kind: EngineKind,

    /// Maximum linear memory size in 64 KiB pages.
    ///
    /// Modules declaring a larger minimum fail to build, and growth
    /// past this limit fails.
    #[serde(default = "defaults::max_memory_pages")]
    pub max_memory_pages: u32,

    /// Maximum nesting of wasm function calls before the call traps.
    #[serde(default = "defaults::max_call_depth")]
    pub max_call_depth: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            max_memory_pages: defaults::max_memory_pages(),
            max_call_depth: defaults::max_call_depth(),
        }
    }
}

impl EngineConfig {
    /// Check the memory and call depth limits.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_memory_pages > MAX_MEMORY_PAGES {
            return Err(RuntimeError::invalid_config(format!(
                "max_memory_pages {} exceeds {MAX_MEMORY_PAGES}",
                self.max_memory_pages
            )));
        }
        if self.max_call_depth == 0 || self.max_call_depth > MAX_CALL_DEPTH {
            return Err(RuntimeError::invalid_config(format!(
                "max_call_depth must be between 1 and {MAX_CALL_DEPTH}, got {}",
                self.max_call_depth
            )));
        }
        Ok(())
    }
}

/// Per-call execution configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Deadline for a top-level call in milliseconds.
    ///
    /// Zero disables the deadline.
    #[serde(default)]
    pub timeout_ms: u64,
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn max_memory_pages() -> u32 {
        super::MAX_MEMORY_PAGES
    }

    pub const fn max_call_depth() -> u32 {
        1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert_eq!(config.engine.kind, EngineKind::Interpreter);
        assert_eq!(config.engine.max_memory_pages, 65_536);
        assert_eq!(config.engine.max_call_depth, 1024);
        assert_eq!(config.execution.timeout_ms, 0);
        assert!(config.execution.timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_memory_beyond_address_space() {
        let json = r#"{"engine": {"max_memory_pages": 4000000000}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidConfig { .. }));
        assert!(err.to_string().contains("max_memory_pages"));
    }

    #[test]
    fn test_validate_rejects_call_depth() {
        for depth in [0, MAX_CALL_DEPTH + 1, 1_000_000] {
            let config = EngineConfig {
                max_call_depth: depth,
                ..EngineConfig::default()
            };
            let err = config.validate().unwrap_err();
            assert!(matches!(err, RuntimeError::InvalidConfig { .. }), "{depth}");
        }

        let config = EngineConfig {
            max_call_depth: MAX_CALL_DEPTH,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            config.engine.max_memory_pages,
            deserialized.engine.max_memory_pages
        );
        assert_eq!(config.engine.kind, deserialized.engine.kind);
    }

    #[test]
    fn test_execution_timeout() {
        let config = ExecutionConfig { timeout_ms: 500 };

        assert_eq!(config.timeout(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"engine": {"max_call_depth": 16, "kind": "interpreter"}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        // Explicitly set value
        assert_eq!(config.engine.max_call_depth, 16);
        // Default values for unspecified fields
        assert_eq!(config.engine.max_memory_pages, MAX_MEMORY_PAGES);
        assert_eq!(config.execution.timeout_ms, 0);
    }
}
