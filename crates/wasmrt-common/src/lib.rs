//! Common types, errors, and configuration for wasmrt.
//!
//! This crate provides shared functionality used across the wasmrt workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for engine and execution settings
//! - TOML configuration file loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{
    EngineConfig, EngineKind, ExecutionConfig, MAX_CALL_DEPTH, MAX_MEMORY_PAGES, RuntimeConfig,
};
pub use config_file::{ConfigFile, ConfigFileError, ModuleEntry};
pub use error::{HostFunctionError, RuntimeError, TrapCode};
