//! The store: module name to instance registry.
//!
//! A [`Store`] owns every [`ModuleInstance`] created through it and the
//! [`Engine`] that compiles them. It is constructed explicitly and torn down
//! explicitly with [`Store::close`]; there is no global store.
//!
//! Instantiation runs the lifecycle in order:
//!
//! 1. Validate the definition and resolve function imports
//! 2. Claim the instance registered under the module name
//! 3. Build function instances and memory
//! 4. Compile with the engine and attach the module engine
//! 5. Wire exports and mark the instance callable
//!
//! If any step fails the instance is removed from the registry, so a broken
//! instance is never discoverable by name.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use wasmrt_common::{EngineKind, RuntimeConfig, RuntimeError};

use crate::engine::{CallContext, Engine};
use crate::function::{FunctionInstance, FunctionKind};
use crate::host::HostModuleBuilder;
use crate::instance::{ExportInstance, ModuleInstance, ModuleState};
use crate::interpreter::InterpreterEngine;
use crate::memory::MemoryInstance;
use crate::module::{ExternKind, Index, Module};

/// Registry of module instances, keyed by module name.
///
/// # Thread Safety
///
/// `Store` is `Send + Sync`. Lookups and get-or-create are linearizable per
/// name: concurrent callers asking for the same name observe one instance.
pub struct Store {
    engine: Arc<dyn Engine>,
    config: RuntimeConfig,
    module_instances: DashMap<String, Arc<ModuleInstance>>,
}

impl Store {
    /// Create a store backed by `engine`.
    pub fn new(engine: Arc<dyn Engine>, config: RuntimeConfig) -> Self {
        Self {
            engine,
            config,
            module_instances: DashMap::new(),
        }
    }

    /// Create a store with the backend selected by `config.engine.kind`.
    ///
    /// Fails with `InvalidConfig` if a limit is out of range.
    pub fn with_config(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let engine: Arc<dyn Engine> = match config.engine.kind {
            EngineKind::Interpreter => Arc::new(InterpreterEngine::new(&config.engine)),
        };
        info!(kind = ?config.engine.kind, "Store created");
        Ok(Self::new(engine, config.clone()))
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Get the instance registered under `name`, creating an empty one if
    /// there is none.
    ///
    /// Repeated calls with the same name return the identical instance.
    pub fn module_instance(&self, name: &str) -> Arc<ModuleInstance> {
        let entry = self
            .module_instances
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(module = %name, "Module instance declared");
                Arc::new(ModuleInstance::new(name))
            });
        Arc::clone(entry.value())
    }

    /// Get the callable instance registered under `name`.
    pub fn module(&self, name: &str) -> Result<Arc<ModuleInstance>, RuntimeError> {
        self.module_instances
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|instance| instance.is_callable())
            .ok_or_else(|| RuntimeError::module_not_found(name))
    }

    /// Names of all registered instances, sorted.
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .module_instances
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Build the declared functions of `module` into `instance`.
    ///
    /// Each function's type is resolved through the function section and its
    /// name through the optional name section, falling back to `"unknown"`.
    /// The result is in declaration order.
    pub fn build_function_instances(
        &self,
        module: &Module,
        instance: &Arc<ModuleInstance>,
    ) -> Result<Vec<Arc<FunctionInstance>>, RuntimeError> {
        let imported = module.imported_function_count();
        let mut functions = Vec::with_capacity(module.function_section.len());

        for (i, &type_index) in module.function_section.iter().enumerate() {
            let ty = module.type_section.get(type_index as usize).ok_or_else(|| {
                RuntimeError::invalid_module(format!(
                    "function[{i}] type index {type_index} out of range (len={})",
                    module.type_section.len()
                ))
            })?;
            let code = module.code_section.get(i).ok_or_else(|| {
                RuntimeError::invalid_module(format!("function[{i}] has no code body"))
            })?;
            let index = Index::try_from(imported + i)
                .map_err(|_| RuntimeError::invalid_module("function index space overflow"))?;

            functions.push(Arc::new(FunctionInstance::new(
                instance,
                index,
                module.function_name(index),
                ty.clone(),
                FunctionKind::Wasm(code.clone()),
            )));
        }

        instance.set_functions(functions.clone())?;
        Ok(functions)
    }

    /// Allocate the memory declared by `module`, if any, into `instance`.
    pub fn build_memory_instance(
        &self,
        module: &Module,
        instance: &Arc<ModuleInstance>,
    ) -> Result<Option<Arc<MemoryInstance>>, RuntimeError> {
        let memory = match module.memory() {
            Some(limits) => Some(Arc::new(MemoryInstance::new(
                limits,
                self.config.engine.max_memory_pages,
            )?)),
            None => None,
        };
        instance.set_memory(memory.clone())?;
        Ok(memory)
    }

    /// Instantiate `module` under `name` and make it callable.
    #[instrument(skip(self, module), fields(module = %name))]
    pub fn instantiate(
        &self,
        module: &Module,
        name: &str,
    ) -> Result<Arc<ModuleInstance>, RuntimeError> {
        module.validate(self.config.engine.max_memory_pages)?;
        let imported = self.resolve_imports(module)?;

        let instance = self.module_instance(name);
        instance.claim()?;

        let result = self.build_and_compile(module, &instance, &imported);
        self.finish(name, instance, result)
    }

    /// Instantiate a host module built with [`HostModuleBuilder`].
    #[instrument(skip(self, builder), fields(module = %builder.name()))]
    pub fn instantiate_host_module(
        &self,
        builder: &HostModuleBuilder,
    ) -> Result<Arc<ModuleInstance>, RuntimeError> {
        let name = builder.name().to_string();
        let instance = self.module_instance(&name);
        instance.claim()?;

        let result = self.build_host_module(builder, &instance);

        self.finish(&name, instance, result)
    }

    /// Call an export of a callable module, applying the configured deadline.
    pub fn call(
        &self,
        module: &str,
        export: &str,
        params: &[u64],
    ) -> Result<Vec<u64>, RuntimeError> {
        let instance = self.module(module)?;
        let mut ctx = CallContext::new(Arc::clone(&instance));
        if let Some(timeout) = self.config.execution.timeout() {
            ctx = ctx.with_timeout(timeout);
        }
        instance.call_with_context(&ctx, export, params)
    }

    /// Close the module engine of `name` and remove it from the store.
    pub fn release_module(&self, name: &str) -> Result<(), RuntimeError> {
        let (_, instance) = self
            .module_instances
            .remove(name)
            .ok_or_else(|| RuntimeError::module_not_found(name))?;
        info!(module = %name, "Module released");
        instance.release()
    }

    /// Release every module. The first error is returned after all modules
    /// have been attempted.
    pub fn close(&self) -> Result<(), RuntimeError> {
        let mut first_error = None;
        for name in self.module_names() {
            match self.release_module(&name) {
                Ok(()) | Err(RuntimeError::ModuleNotFound { .. }) => {}
                Err(e) => {
                    warn!(module = %name, error = %e, "Failed to release module");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn resolve_imports(&self, module: &Module) -> Result<Vec<Arc<FunctionInstance>>, RuntimeError> {
        module
            .import_section
            .iter()
            .map(|import| {
                let unresolved = || RuntimeError::UnresolvedImport {
                    module: import.module.clone(),
                    name: import.name.clone(),
                };
                let target = self.module(&import.module).map_err(|_| unresolved())?;
                let function = target.exported_function(&import.name).map_err(|_| unresolved())?;

                let expected = &module.type_section[import.type_index as usize];
                if function.ty() != expected {
                    return Err(RuntimeError::invalid_module(format!(
                        "import {}.{} signature mismatch: expected {expected}, found {}",
                        import.module,
                        import.name,
                        function.ty()
                    )));
                }
                Ok(function)
            })
            .collect()
    }

    fn build_and_compile(
        &self,
        module: &Module,
        instance: &Arc<ModuleInstance>,
        imported: &[Arc<FunctionInstance>],
    ) -> Result<(), RuntimeError> {
        instance.set_imported_functions(imported.to_vec())?;
        let functions = self.build_function_instances(module, instance)?;
        let memory = self.build_memory_instance(module, instance)?;
        instance.mark_built()?;

        let engine = self
            .engine
            .new_module_engine(instance.name(), imported, &functions)?;
        instance.attach_engine(Arc::from(engine))?;

        let mut exports = HashMap::with_capacity(module.export_section.len());
        for export in &module.export_section {
            let item = match export.kind {
                ExternKind::Func => instance
                    .function(export.index)
                    .map(ExportInstance::Function),
                ExternKind::Memory => memory.clone().map(ExportInstance::Memory),
            }
            .ok_or_else(|| {
                RuntimeError::invalid_module(format!(
                    "export {} index {} out of range",
                    export.name, export.index
                ))
            })?;
            exports.insert(export.name.clone(), item);
        }
        instance.publish(exports)
    }

    fn build_host_module(
        &self,
        builder: &HostModuleBuilder,
        instance: &Arc<ModuleInstance>,
    ) -> Result<(), RuntimeError> {
        let mut functions = Vec::with_capacity(builder.functions().len());
        let mut exports = HashMap::new();
        for (i, def) in builder.functions().iter().enumerate() {
            let index = Index::try_from(i)
                .map_err(|_| RuntimeError::invalid_module("function index space overflow"))?;
            let function = Arc::new(FunctionInstance::new(
                instance,
                index,
                def.name.clone(),
                def.ty.clone(),
                FunctionKind::Host(Arc::clone(&def.func)),
            ));
            if exports
                .insert(def.name.clone(), ExportInstance::Function(Arc::clone(&function)))
                .is_some()
            {
                return Err(RuntimeError::invalid_module(format!(
                    "duplicate host function {}",
                    def.name
                )));
            }
            functions.push(function);
        }
        instance.set_functions(functions.clone())?;
        instance.mark_built()?;

        let engine = self
            .engine
            .new_module_engine(instance.name(), &[], &functions)?;
        instance.attach_engine(Arc::from(engine))?;
        instance.publish(exports)
    }

    fn finish(
        &self,
        name: &str,
        instance: Arc<ModuleInstance>,
        result: Result<(), RuntimeError>,
    ) -> Result<Arc<ModuleInstance>, RuntimeError> {
        match result {
            Ok(()) => {
                debug_assert_eq!(instance.state(), ModuleState::Callable);
                info!(
                    module = %name,
                    functions = instance.functions().len(),
                    has_memory = instance.memory().is_some(),
                    "Module instantiated"
                );
                Ok(instance)
            }
            Err(e) => {
                warn!(module = %name, error = %e, "Instantiation failed");
                self.module_instances
                    .remove_if(name, |_, registered| Arc::ptr_eq(registered, &instance));
                if let Err(close_err) = instance.release() {
                    warn!(module = %name, error = %close_err, "Failed to release partial module");
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("engine", &self.engine)
            .field("modules", &self.module_instances.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let loaded = self
            .module_instances
            .iter()
            .filter(|entry| entry.value().state() != ModuleState::Declared)
            .count();
        if loaded > 0 {
            warn!(modules = loaded, "Store dropped without close");
        }
    }
}
