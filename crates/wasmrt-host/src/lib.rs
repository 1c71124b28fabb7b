//! Host-side collaborators for wasmrt.
//!
//! This crate provides functionality the runtime exposes to guest modules:
//!
//! - [`logging`]: Guest log capture, emitted through `tracing`
//! - [`linker`]: The `env` host module and its registration in a store
//! - [`fsapi`]: The [`File`] abstraction host-provided files implement
//! - [`stdio`]: Stdin/stdout/stderr adapters over host streams

pub mod fsapi;
pub mod linker;
pub mod logging;
pub mod stdio;

pub use fsapi::{Errno, File, FileType, Stat, Whence};
pub use linker::{ENV_MODULE, env_module, register_all};
pub use logging::{DEFAULT_LOG_CAPACITY, GuestLogs, LogEntry, LogLevel, LoggingHost};
pub use stdio::{FileEntry, NoopStdin, NoopStdout, StdinFile, WriterFile};
