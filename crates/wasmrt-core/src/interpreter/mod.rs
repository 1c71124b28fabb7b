//! Interpreter backend.
//!
//! [`InterpreterEngine`] lowers code bodies into a flat operation list when a
//! module engine is created and executes them on a value stack. It supports
//! straight-line code: locals, calls, integer arithmetic, 32/64-bit loads and
//! stores, and `memory.size` / `memory.grow`. Anything else fails
//! compilation.
//!
//! Compiled functions are cached by function instance id so modules importing
//! them reuse the exporter's compiled code. Closing a module engine evicts its
//! own entries.

mod compile;
mod exec;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, instrument, warn};

use wasmrt_common::{EngineConfig, RuntimeError};

use crate::engine::{CallContext, Engine, FunctionAddress, ModuleEngine};
use crate::function::{FunctionInstance, FunctionKind};
use crate::host::HostFunction;
use crate::module::Index;

use self::compile::Op;

type FunctionCache = DashMap<u64, Arc<CompiledFunction>>;

/// Store-scoped interpreter.
pub struct InterpreterEngine {
    max_call_depth: u32,
    compiled: Arc<FunctionCache>,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    live: AtomicUsize,
    leaked: AtomicUsize,
}

impl InterpreterEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_call_depth: config.max_call_depth,
            compiled: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Module engines created and not yet closed or dropped.
    pub fn live_module_engines(&self) -> usize {
        self.counters.live.load(Ordering::Relaxed)
    }

    /// Module engines that were dropped without being closed.
    pub fn leaked_module_engines(&self) -> usize {
        self.counters.leaked.load(Ordering::Relaxed)
    }

    /// Number of functions currently compiled.
    pub fn compiled_functions(&self) -> usize {
        self.compiled.len()
    }

    fn compile_function(
        function: &Arc<FunctionInstance>,
        function_count: usize,
    ) -> Result<Body, RuntimeError> {
        match function.kind() {
            FunctionKind::Host(func) => Ok(Body::Host(Arc::clone(func))),
            FunctionKind::Wasm(code) => {
                let local_count = function.ty().params.len() + code.locals.len();
                let ops = compile::compile(code, local_count, function_count).map_err(|reason| {
                    RuntimeError::compilation_failed(format!("{}: {reason}", function.debug_name()))
                })?;
                Ok(Body::Wasm { ops, local_count })
            }
        }
    }
}

impl fmt::Debug for InterpreterEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterEngine")
            .field("max_call_depth", &self.max_call_depth)
            .field("compiled_functions", &self.compiled.len())
            .field("live_module_engines", &self.live_module_engines())
            .finish_non_exhaustive()
    }
}

impl Engine for InterpreterEngine {
    #[instrument(skip_all, fields(module = %name))]
    fn new_module_engine(
        &self,
        name: &str,
        imported_functions: &[Arc<FunctionInstance>],
        module_functions: &[Arc<FunctionInstance>],
    ) -> Result<Box<dyn ModuleEngine>, RuntimeError> {
        let imported = imported_functions
            .iter()
            .map(|f| {
                self.compiled
                    .get(&f.id())
                    .map(|entry| Arc::clone(entry.value()))
                    .ok_or_else(|| {
                        RuntimeError::compilation_failed(format!(
                            "{name}: imported function {} is not compiled by this engine",
                            f.debug_name()
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let function_count = imported_functions.len() + module_functions.len();
        let bodies = module_functions
            .iter()
            .map(|f| Self::compile_function(f, function_count))
            .collect::<Result<Vec<_>, _>>()?;

        let module = Arc::new_cyclic(|owner: &Weak<CompiledModule>| {
            let declared = module_functions.iter().zip(bodies).map(|(source, body)| {
                Arc::new(CompiledFunction {
                    source: Arc::clone(source),
                    owner: owner.clone(),
                    body,
                })
            });
            CompiledModule {
                name: name.to_string(),
                functions: imported.into_iter().chain(declared).collect(),
                imported_count: imported_functions.len(),
                closed: AtomicBool::new(false),
            }
        });

        for f in module.declared() {
            self.compiled.insert(f.source.id(), Arc::clone(f));
        }
        self.counters.live.fetch_add(1, Ordering::Relaxed);

        debug!(
            module = %name,
            imported = imported_functions.len(),
            declared = module_functions.len(),
            "Module compiled"
        );

        Ok(Box::new(InterpreterModuleEngine {
            module,
            max_call_depth: self.max_call_depth,
            cache: Arc::clone(&self.compiled),
            counters: Arc::clone(&self.counters),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Executable form of a function.
enum Body {
    Wasm { ops: Vec<Op>, local_count: usize },
    Host(HostFunction),
}

struct CompiledFunction {
    source: Arc<FunctionInstance>,
    owner: Weak<CompiledModule>,
    body: Body,
}

impl fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ops = match &self.body {
            Body::Wasm { ops, .. } => Some(ops.len()),
            Body::Host(_) => None,
        };
        f.debug_struct("CompiledFunction")
            .field("function", &self.source.debug_name())
            .field("ops", &ops)
            .finish_non_exhaustive()
    }
}

/// Compiled functions of one module, imports first.
#[derive(Debug)]
struct CompiledModule {
    name: String,
    functions: Vec<Arc<CompiledFunction>>,
    imported_count: usize,
    closed: AtomicBool,
}

impl CompiledModule {
    fn declared(&self) -> &[Arc<CompiledFunction>] {
        &self.functions[self.imported_count..]
    }
}

#[derive(Debug)]
struct InterpreterModuleEngine {
    module: Arc<CompiledModule>,
    max_call_depth: u32,
    cache: Arc<FunctionCache>,
    counters: Arc<Counters>,
    closed: AtomicBool,
}

impl InterpreterModuleEngine {
    fn lookup(&self, function: &FunctionInstance) -> Option<Arc<CompiledFunction>> {
        self.module
            .functions
            .get(function.index() as usize)
            .filter(|f| f.source.id() == function.id())
            .cloned()
            .or_else(|| {
                self.cache
                    .get(&function.id())
                    .map(|entry| Arc::clone(entry.value()))
            })
    }

    fn evict(&self) {
        for f in self.module.declared() {
            self.cache.remove(&f.source.id());
        }
        self.module.closed.store(true, Ordering::Release);
        self.counters.live.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ModuleEngine for InterpreterModuleEngine {
    fn name(&self) -> &str {
        &self.module.name
    }

    fn function_address(&self, index: Index) -> Option<FunctionAddress> {
        self.module
            .functions
            .get(index as usize)
            .map(|f| FunctionAddress::new(Arc::as_ptr(f) as usize))
    }

    fn call(
        &self,
        ctx: &CallContext,
        function: &FunctionInstance,
        params: &[u64],
    ) -> Result<Vec<u64>, RuntimeError> {
        if self.is_closed() {
            return Err(RuntimeError::ModuleReleased {
                name: self.module.name.clone(),
            });
        }

        let expected = function.ty().params.len();
        if params.len() != expected {
            return Err(RuntimeError::ArityMismatch {
                function: function.debug_name(),
                expected,
                actual: params.len(),
            });
        }

        let compiled = self.lookup(function).ok_or_else(|| {
            RuntimeError::compilation_failed(format!(
                "{} is not compiled by module engine {}",
                function.debug_name(),
                self.module.name
            ))
        })?;

        exec::Executor::new(self.max_call_depth).invoke(ctx, &compiled, params)
    }

    fn close(&self) -> Result<(), RuntimeError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.evict();
        debug!(module = %self.module.name, "Module engine closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for InterpreterModuleEngine {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            warn!(module = %self.module.name, "Module engine dropped without close");
            self.counters.leaked.fetch_add(1, Ordering::Relaxed);
            self.evict();
        }
    }
}
