//! Host modules.
//!
//! A host module is a set of Rust functions registered in the store under a
//! module name, so wasm modules can import them like any other export. Host
//! functions run with the caller's [`CallContext`], which gives them the
//! calling module's memory.

use std::fmt;
use std::sync::Arc;

use wasmrt_common::RuntimeError;

use crate::engine::CallContext;
use crate::instance::ModuleInstance;
use crate::module::FunctionType;
use crate::store::Store;

/// Host function implementation.
pub type HostFunction =
    Arc<dyn Fn(&CallContext, &[u64]) -> Result<Vec<u64>, RuntimeError> + Send + Sync>;

/// One function of a host module.
#[derive(Clone)]
pub struct HostFunctionDefinition {
    pub name: String,
    pub ty: FunctionType,
    pub func: HostFunction,
}

impl fmt::Debug for HostFunctionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunctionDefinition")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}

/// Builder for a host module.
///
/// # Example
///
/// ```ignore
/// let env = HostModuleBuilder::new("env")
///     .function("answer", FunctionType::new([], [ValueType::I32]), |_, _| Ok(vec![42]))
///     .instantiate(&store)?;
/// ```
#[derive(Debug, Clone)]
pub struct HostModuleBuilder {
    name: String,
    functions: Vec<HostFunctionDefinition>,
}

impl HostModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    /// Add a function, exported under `name`.
    #[must_use]
    pub fn function<F>(mut self, name: impl Into<String>, ty: FunctionType, func: F) -> Self
    where
        F: Fn(&CallContext, &[u64]) -> Result<Vec<u64>, RuntimeError> + Send + Sync + 'static,
    {
        self.functions.push(HostFunctionDefinition {
            name: name.into(),
            ty,
            func: Arc::new(func),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn functions(&self) -> &[HostFunctionDefinition] {
        &self.functions
    }

    /// Register the module in `store`.
    pub fn instantiate(self, store: &Store) -> Result<Arc<ModuleInstance>, RuntimeError> {
        store.instantiate_host_module(&self)
    }
}
