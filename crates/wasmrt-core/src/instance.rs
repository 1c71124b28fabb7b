//! Module instances.
//!
//! A [`ModuleInstance`] is the live runtime image of one loaded module. It
//! moves through a fixed lifecycle:
//!
//! ```text
//! Declared -> Built -> Compiled -> Callable -> Released
//! ```
//!
//! No transition skips a state. Functions and memory are populated while
//! `Declared`; exports only exist once the module engine is attached, and
//! calls are only accepted while `Callable`. `Released` is terminal.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use wasmrt_common::RuntimeError;

use crate::engine::{CallContext, ModuleEngine};
use crate::function::FunctionInstance;
use crate::memory::MemoryInstance;
use crate::module::Index;

/// Lifecycle state of a module instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModuleState {
    /// Registered by name, nothing built yet.
    #[default]
    Declared,
    /// Functions and memory populated.
    Built,
    /// Module engine attached.
    Compiled,
    /// Exports wired, accepting calls.
    Callable,
    /// Module engine closed. Terminal.
    Released,
}

impl ModuleState {
    fn next(self) -> Option<Self> {
        match self {
            ModuleState::Declared => Some(ModuleState::Built),
            ModuleState::Built => Some(ModuleState::Compiled),
            ModuleState::Compiled => Some(ModuleState::Callable),
            ModuleState::Callable => Some(ModuleState::Released),
            ModuleState::Released => None,
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleState::Declared => write!(f, "declared"),
            ModuleState::Built => write!(f, "built"),
            ModuleState::Compiled => write!(f, "compiled"),
            ModuleState::Callable => write!(f, "callable"),
            ModuleState::Released => write!(f, "released"),
        }
    }
}

/// An exported instance element.
#[derive(Debug, Clone)]
pub enum ExportInstance {
    Function(Arc<FunctionInstance>),
    Memory(Arc<MemoryInstance>),
}

#[derive(Default)]
struct Inner {
    state: ModuleState,
    claimed: bool,
    imported_functions: Vec<Arc<FunctionInstance>>,
    functions: Vec<Arc<FunctionInstance>>,
    memory: Option<Arc<MemoryInstance>>,
    exports: HashMap<String, ExportInstance>,
    engine: Option<Arc<dyn ModuleEngine>>,
}

/// The live runtime image of one module.
///
/// Shared as `Arc<ModuleInstance>`. Mutation happens only while the owning
/// [`Store`](crate::Store) builds it; afterwards it is read-only until
/// released.
pub struct ModuleInstance {
    name: String,
    inner: RwLock<Inner>,
}

impl ModuleInstance {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ModuleState {
        self.inner.read().state
    }

    pub fn is_callable(&self) -> bool {
        self.state() == ModuleState::Callable
    }

    /// Functions declared by this module, in declaration order.
    pub fn functions(&self) -> Vec<Arc<FunctionInstance>> {
        self.inner.read().functions.clone()
    }

    /// Functions this module imports, in import order.
    pub fn imported_functions(&self) -> Vec<Arc<FunctionInstance>> {
        self.inner.read().imported_functions.clone()
    }

    /// Function at `index` in the function index space (imports first).
    pub fn function(&self, index: Index) -> Option<Arc<FunctionInstance>> {
        let inner = self.inner.read();
        let index = index as usize;
        let imported = inner.imported_functions.len();
        if index < imported {
            inner.imported_functions.get(index).cloned()
        } else {
            inner.functions.get(index - imported).cloned()
        }
    }

    pub fn memory(&self) -> Option<Arc<MemoryInstance>> {
        self.inner.read().memory.clone()
    }

    pub fn export(&self, name: &str) -> Option<ExportInstance> {
        self.inner.read().exports.get(name).cloned()
    }

    /// Snapshot of all exports.
    pub fn exports(&self) -> HashMap<String, ExportInstance> {
        self.inner.read().exports.clone()
    }

    pub fn exported_function(&self, name: &str) -> Result<Arc<FunctionInstance>, RuntimeError> {
        match self.export(name) {
            Some(ExportInstance::Function(f)) => Ok(f),
            _ => Err(RuntimeError::export_not_found(&self.name, name)),
        }
    }

    pub fn exported_memory(&self, name: &str) -> Result<Arc<MemoryInstance>, RuntimeError> {
        match self.export(name) {
            Some(ExportInstance::Memory(m)) => Ok(m),
            _ => Err(RuntimeError::export_not_found(&self.name, name)),
        }
    }

    /// The attached module engine, if the module is callable.
    pub fn module_engine(&self) -> Result<Arc<dyn ModuleEngine>, RuntimeError> {
        let inner = self.inner.read();
        match (inner.state, &inner.engine) {
            (ModuleState::Callable, Some(engine)) => Ok(Arc::clone(engine)),
            (ModuleState::Released, _) => Err(RuntimeError::ModuleReleased {
                name: self.name.clone(),
            }),
            (state, _) => Err(RuntimeError::InvalidState {
                module: self.name.clone(),
                state: state.to_string(),
            }),
        }
    }

    /// Call an exported function in a fresh call chain.
    pub fn call(self: &Arc<Self>, export: &str, params: &[u64]) -> Result<Vec<u64>, RuntimeError> {
        let ctx = CallContext::new(Arc::clone(self));
        self.call_with_context(&ctx, export, params)
    }

    /// Call an exported function as part of an existing call chain.
    pub fn call_with_context(
        self: &Arc<Self>,
        ctx: &CallContext,
        export: &str,
        params: &[u64],
    ) -> Result<Vec<u64>, RuntimeError> {
        let engine = self.module_engine()?;
        let function = self.exported_function(export)?;
        if Arc::ptr_eq(ctx.module(), self) {
            engine.call(ctx, &function, params)
        } else {
            engine.call(&ctx.for_module(Arc::clone(self)), &function, params)
        }
    }

    /// Reserve this instance for a single build. Fails if another build
    /// already claimed it or it is past `Declared`.
    pub(crate) fn claim(&self) -> Result<(), RuntimeError> {
        let mut inner = self.inner.write();
        if inner.claimed || inner.state != ModuleState::Declared {
            return Err(RuntimeError::ModuleAlreadyInstantiated {
                name: self.name.clone(),
            });
        }
        inner.claimed = true;
        Ok(())
    }

    pub(crate) fn set_imported_functions(
        &self,
        functions: Vec<Arc<FunctionInstance>>,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.write_declared()?;
        inner.imported_functions = functions;
        Ok(())
    }

    pub(crate) fn set_functions(
        &self,
        functions: Vec<Arc<FunctionInstance>>,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.write_declared()?;
        inner.functions = functions;
        Ok(())
    }

    pub(crate) fn set_memory(
        &self,
        memory: Option<Arc<MemoryInstance>>,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.write_declared()?;
        inner.memory = memory;
        Ok(())
    }

    /// Attach the module engine, moving `Built -> Compiled`.
    pub(crate) fn attach_engine(&self, engine: Arc<dyn ModuleEngine>) -> Result<(), RuntimeError> {
        let mut inner = self.inner.write();
        Self::step(&self.name, &mut inner, ModuleState::Compiled)?;
        inner.engine = Some(engine);
        Ok(())
    }

    /// Publish exports, moving `Compiled -> Callable`.
    pub(crate) fn publish(
        &self,
        exports: HashMap<String, ExportInstance>,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.inner.write();
        Self::step(&self.name, &mut inner, ModuleState::Callable)?;
        inner.exports = exports;
        Ok(())
    }

    /// Move `Declared -> Built`.
    pub(crate) fn mark_built(&self) -> Result<(), RuntimeError> {
        let mut inner = self.inner.write();
        Self::step(&self.name, &mut inner, ModuleState::Built)
    }

    /// Close the module engine (if any) and mark the instance released.
    ///
    /// Releasing twice is a no-op.
    pub(crate) fn release(&self) -> Result<(), RuntimeError> {
        let engine = {
            let mut inner = self.inner.write();
            if inner.state == ModuleState::Released {
                return Ok(());
            }
            inner.state = ModuleState::Released;
            inner.exports.clear();
            inner.engine.take()
        };
        debug!(module = %self.name, "Releasing module instance");
        match engine {
            Some(engine) => engine.close(),
            None => Ok(()),
        }
    }

    fn write_declared(&self) -> Result<parking_lot::RwLockWriteGuard<'_, Inner>, RuntimeError> {
        let inner = self.inner.write();
        if inner.state != ModuleState::Declared {
            return Err(RuntimeError::InvalidState {
                module: self.name.clone(),
                state: inner.state.to_string(),
            });
        }
        Ok(inner)
    }

    fn step(name: &str, inner: &mut Inner, to: ModuleState) -> Result<(), RuntimeError> {
        if inner.state.next() != Some(to) {
            return Err(RuntimeError::InvalidState {
                module: name.to_string(),
                state: inner.state.to_string(),
            });
        }
        inner.state = to;
        Ok(())
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ModuleInstance")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("functions", &inner.functions.len())
            .field("has_memory", &inner.memory.is_some())
            .field("exports", &inner.exports.len())
            .finish_non_exhaustive()
    }
}
