//! Host module registration.
//!
//! This module builds the `env` host module and instantiates it in a
//! [`Store`], so guest modules can import its functions.

use tracing::warn;

use wasmrt_common::{HostFunctionError, RuntimeError, TrapCode};
use wasmrt_core::{FunctionType, HostModuleBuilder, Store, ValueType};

use crate::logging::{GuestLogs, LoggingHost, level_from_i32};

/// Name of the module the standard host functions are registered under.
pub const ENV_MODULE: &str = "env";

/// Register all standard host functions as the `env` module.
///
/// This registers:
/// - `env.log` - Logging function for guest code
///
/// Returns the buffer guest log messages are captured in.
pub fn register_all(store: &Store) -> Result<GuestLogs, RuntimeError> {
    let logs = GuestLogs::new();
    env_module(&logs).instantiate(store)?;
    Ok(logs)
}

/// Builder for the `env` module with every standard host function.
pub fn env_module(logs: &GuestLogs) -> HostModuleBuilder {
    with_logging(HostModuleBuilder::new(ENV_MODULE), logs)
}

/// Add `log(level: i32, ptr: i32, len: i32)` to `builder`.
///
/// # Memory Protocol
///
/// The guest passes:
/// - `level`: Log level (0=debug, 1=info, 2=warn, 3=error)
/// - `ptr`: Offset of the message in the caller's memory
/// - `len`: Length of the message in bytes (UTF-8)
///
/// A range outside the caller's memory traps; invalid UTF-8 is replaced.
fn with_logging(builder: HostModuleBuilder, logs: &GuestLogs) -> HostModuleBuilder {
    let logs = logs.clone();
    let ty = FunctionType::new([ValueType::I32, ValueType::I32, ValueType::I32], []);

    builder.function("log", ty, move |ctx, params| {
        let &[level, ptr, len] = params else {
            return Err(HostFunctionError::InvalidArgument {
                reason: format!("log expects 3 params, got {}", params.len()),
            }
            .into());
        };

        let memory = ctx.memory().ok_or_else(|| HostFunctionError::MemoryUnavailable {
            function: format!("{ENV_MODULE}.log"),
        })?;

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let (level, ptr, len) = (level as u32 as i32, ptr as u32, len as u32);

        let Some(bytes) = memory.read(ptr, len) else {
            warn!(
                module = %ctx.module().name(),
                ptr,
                len,
                memory_size = memory.size(),
                "Memory access out of bounds"
            );
            return Err(RuntimeError::trap(
                format!("{ENV_MODULE}.log"),
                TrapCode::MemoryOutOfBounds,
            ));
        };

        let message = String::from_utf8_lossy(&bytes);
        LoggingHost::log(&logs, ctx, level_from_i32(level), &message);
        Ok(vec![])
    })
}
