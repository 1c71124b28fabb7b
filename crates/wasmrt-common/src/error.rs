//! Error types for wasmrt.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Top-level errors for building, compiling and calling modules
//! - [`TrapCode`]: Runtime faults that abort a single call
//! - [`HostFunctionError`]: Errors from host function implementations

use std::fmt;

use thiserror::Error;

/// Top-level runtime errors.
///
/// Every variant is recovered at the boundary of the operation that caused it
/// and returned to the caller. A failed build or compile keeps the module from
/// ever becoming callable; a failed call leaves the module usable.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No callable module is registered under the given name.
    #[error("Module not found: {name}")]
    ModuleNotFound {
        /// Name of the module that was looked up.
        name: String,
    },

    /// A module with this name already went past the declared state.
    #[error("Module already instantiated: {name}")]
    ModuleAlreadyInstantiated {
        /// Name of the module.
        name: String,
    },

    /// The module definition is structurally inconsistent.
    #[error("Invalid module: {reason}")]
    InvalidModule {
        /// Description of the inconsistency.
        reason: String,
    },

    /// A function import could not be resolved against the store.
    #[error("Unresolved import: {module}.{name}")]
    UnresolvedImport {
        /// Module the import refers to.
        module: String,
        /// Export name inside that module.
        name: String,
    },

    /// An export lookup by name failed.
    #[error("Export not found: {module}.{name}")]
    ExportNotFound {
        /// Module that was searched.
        module: String,
        /// The missing export name.
        name: String,
    },

    /// The execution backend could not prepare a function.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// The caller passed the wrong number of parameters.
    #[error("Arity mismatch calling {function}: expected {expected} params, got {actual}")]
    ArityMismatch {
        /// Debug name of the function.
        function: String,
        /// Declared parameter count.
        expected: usize,
        /// Supplied parameter count.
        actual: usize,
    },

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap in {function}: {code}")]
    Trap {
        /// Debug name of the function that trapped.
        function: String,
        /// The fault that aborted the call.
        code: TrapCode,
    },

    /// Declared or requested memory exceeds the configured page limit.
    #[error("Memory limit exceeded: {requested_pages} pages requested, limit is {limit_pages}")]
    MemoryLimitExceeded {
        /// Pages the module asked for.
        requested_pages: u64,
        /// Maximum pages allowed.
        limit_pages: u32,
    },

    /// The module engine was released and can no longer be invoked.
    #[error("Module released: {name}")]
    ModuleReleased {
        /// Name of the released module.
        name: String,
    },

    /// An operation was attempted in the wrong lifecycle state.
    #[error("Module {module} is in state {state}, which does not allow this operation")]
    InvalidState {
        /// Name of the module.
        module: String,
        /// Current lifecycle state.
        state: String,
    },

    /// A host function returned an error.
    #[error("Host function error: {0}")]
    HostFunction(#[from] HostFunctionError),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Runtime faults that abort the current call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCode {
    /// An `unreachable` instruction was executed.
    Unreachable,
    /// A load or store fell outside linear memory.
    MemoryOutOfBounds,
    /// Integer division by zero.
    IntegerDivideByZero,
    /// The operand stack did not hold what an instruction needed.
    StackUnderflow,
    /// The call stack exceeded the configured depth.
    CallStackExhausted,
    /// The caller cancelled the call.
    Cancelled,
    /// The call context deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrapCode::Unreachable => write!(f, "unreachable executed"),
            TrapCode::MemoryOutOfBounds => write!(f, "out of bounds memory access"),
            TrapCode::IntegerDivideByZero => write!(f, "integer divide by zero"),
            TrapCode::StackUnderflow => write!(f, "operand stack underflow"),
            TrapCode::CallStackExhausted => write!(f, "call stack exhausted"),
            TrapCode::Cancelled => write!(f, "call cancelled"),
            TrapCode::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Errors from host function implementations.
#[derive(Error, Debug)]
pub enum HostFunctionError {
    /// The calling module has no memory the host function could use.
    #[error("Memory not available to host function {function}")]
    MemoryUnavailable {
        /// The host function name.
        function: String,
    },

    /// Invalid argument was passed to a host function.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of why the argument was invalid.
        reason: String,
    },
}

impl RuntimeError {
    /// Create a new `ModuleNotFound` error.
    pub fn module_not_found(name: impl Into<String>) -> Self {
        Self::ModuleNotFound { name: name.into() }
    }

    /// Create a new `InvalidModule` error.
    pub fn invalid_module(reason: impl Into<String>) -> Self {
        Self::InvalidModule {
            reason: reason.into(),
        }
    }

    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(function: impl Into<String>, code: TrapCode) -> Self {
        Self::Trap {
            function: function.into(),
            code,
        }
    }

    /// Create a new `ExportNotFound` error.
    pub fn export_not_found(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ExportNotFound {
            module: module.into(),
            name: name.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns the trap code if this error is a trap.
    pub fn trap_code(&self) -> Option<TrapCode> {
        match self {
            Self::Trap { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns `true` if this error is a trap.
    pub fn is_trap(&self) -> bool {
        matches!(self, Self::Trap { .. })
    }

    /// Returns `true` if this error indicates a module or export was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ModuleNotFound { .. } | Self::ExportNotFound { .. }
        )
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self,
            Self::MemoryLimitExceeded { .. }
                | Self::Trap {
                    code: TrapCode::CallStackExhausted | TrapCode::DeadlineExceeded,
                    ..
                }
        )
    }
}
