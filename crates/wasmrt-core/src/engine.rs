//! Execution backend contract.
//!
//! The [`Engine`] / [`ModuleEngine`] pair decouples module loading from code
//! execution. An engine is fixed when the [`Store`](crate::Store) is built and
//! compiles each module's functions once; the resulting module engine answers
//! address queries and runs calls for that module until it is closed.
//!
//! Calls carry a [`CallContext`]: the module the call runs in plus the
//! caller's request id, cancellation flag and deadline. Calls crossing into
//! another module derive a child context so one logical chain spans them all.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use uuid::Uuid;

use wasmrt_common::{RuntimeError, TrapCode};

use crate::function::FunctionInstance;
use crate::instance::ModuleInstance;
use crate::memory::MemoryInstance;
use crate::module::Index;

/// Store-scoped backend that compiles functions declared or imported by a
/// module.
///
/// Implemented by an interpreter or an ahead-of-time compiler.
pub trait Engine: Send + Sync + fmt::Debug {
    /// Compile a module's functions and return the module engine for it.
    ///
    /// * `name` - the name the module is instantiated under, for errors.
    /// * `imported_functions` - functions this module imports, already
    ///   compiled by this engine when their owning modules were loaded.
    /// * `module_functions` - functions declared in this module.
    ///
    /// Inputs are expected to be validated already; the engine only prepares
    /// executable representations. Fails if any declared function cannot be
    /// compiled.
    fn new_module_engine(
        &self,
        name: &str,
        imported_functions: &[Arc<FunctionInstance>],
        module_functions: &[Arc<FunctionInstance>],
    ) -> Result<Box<dyn ModuleEngine>, RuntimeError>;
}

/// Compiled functions of one module.
///
/// Must be closed exactly once. Dropping an unclosed module engine is a leak
/// and is reported by the implementation.
pub trait ModuleEngine: Send + Sync + fmt::Debug {
    /// Name of the module this engine was compiled for.
    fn name(&self) -> &str;

    /// Opaque handle of the compiled function at `index` in the module's
    /// function index space, suitable for a table element.
    ///
    /// Stable for the lifetime of this module engine.
    fn function_address(&self, index: Index) -> Option<FunctionAddress>;

    /// Invoke `function` with `params` and return its results.
    ///
    /// Arguments and results are flat 64-bit words regardless of the declared
    /// value types. Faults are returned as errors and never leave a partial
    /// result.
    fn call(
        &self,
        ctx: &CallContext,
        function: &FunctionInstance,
        params: &[u64],
    ) -> Result<Vec<u64>, RuntimeError>;

    /// Release compiled code. Calls after this fail with
    /// [`RuntimeError::ModuleReleased`].
    fn close(&self) -> Result<(), RuntimeError>;

    fn is_closed(&self) -> bool;
}

/// Opaque address of a compiled function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionAddress(usize);

impl FunctionAddress {
    pub fn new(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

/// Shared cancellation flag for a call chain.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Request cancellation. Running code observes it at its next check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Context for one logical call chain.
///
/// Execution is never preempted; compiled code checks the context
/// cooperatively through [`CallContext::check`].
#[derive(Debug, Clone)]
pub struct CallContext {
    module: Arc<ModuleInstance>,
    request_id: Uuid,
    cancel: CancelHandle,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Start a new chain running in `module`.
    pub fn new(module: Arc<ModuleInstance>) -> Self {
        Self {
            module,
            request_id: Uuid::new_v4(),
            cancel: CancelHandle::default(),
            deadline: None,
        }
    }

    /// Fail calls that are still running after `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    /// Same chain, running in another module.
    #[must_use]
    pub fn for_module(&self, module: Arc<ModuleInstance>) -> Self {
        Self {
            module,
            request_id: self.request_id,
            cancel: self.cancel.clone(),
            deadline: self.deadline,
        }
    }

    /// Module whose memory and functions the current code sees.
    pub fn module(&self) -> &Arc<ModuleInstance> {
        &self.module
    }

    /// Memory of the current module, if it has one.
    pub fn memory(&self) -> Option<Arc<MemoryInstance>> {
        self.module.memory()
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Handle that cancels every call sharing this chain.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Trap if the chain was cancelled or its deadline has passed.
    pub fn check(&self, function: &str) -> Result<(), RuntimeError> {
        if self.cancel.is_cancelled() {
            return Err(RuntimeError::trap(function, TrapCode::Cancelled));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(RuntimeError::trap(function, TrapCode::DeadlineExceeded));
        }
        Ok(())
    }
}
