//! Function instances.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::host::HostFunction;
use crate::instance::ModuleInstance;
use crate::module::{Code, FunctionType, Index};

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

/// What a function instance executes.
#[derive(Clone)]
pub enum FunctionKind {
    /// A function declared in a module, with its code body.
    Wasm(Code),
    /// A function implemented by the host.
    Host(HostFunction),
}

impl fmt::Debug for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionKind::Wasm(code) => f
                .debug_struct("Wasm")
                .field("locals", &code.locals.len())
                .field("body_len", &code.body.len())
                .finish(),
            FunctionKind::Host(_) => f.debug_struct("Host").finish_non_exhaustive(),
        }
    }
}

/// A runtime-resolved function belonging to a module instance.
///
/// Created once while the owning module is built and immutable afterwards.
/// The owning module is held weakly: the module owns its functions, not the
/// other way round.
#[derive(Debug)]
pub struct FunctionInstance {
    id: u64,
    ty: FunctionType,
    module: Weak<ModuleInstance>,
    module_name: String,
    index: Index,
    name: String,
    kind: FunctionKind,
}

impl FunctionInstance {
    pub(crate) fn new(
        module: &Arc<ModuleInstance>,
        index: Index,
        name: impl Into<String>,
        ty: FunctionType,
        kind: FunctionKind,
    ) -> Self {
        Self {
            id: NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed),
            ty,
            module: Arc::downgrade(module),
            module_name: module.name().to_string(),
            index,
            name: name.into(),
            kind,
        }
    }

    /// Process-unique identity, stable for the life of the instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Declared signature.
    pub fn ty(&self) -> &FunctionType {
        &self.ty
    }

    /// The owning module, unless it has been dropped.
    pub fn module(&self) -> Option<Arc<ModuleInstance>> {
        self.module.upgrade()
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Index in the owning module's function index space.
    pub fn index(&self) -> Index {
        self.index
    }

    /// Debug name from the name section, or `"unknown"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `module.name`, used in errors and logs.
    pub fn debug_name(&self) -> String {
        format!("{}.{}", self.module_name, self.name)
    }

    pub fn kind(&self) -> &FunctionKind {
        &self.kind
    }

    pub fn is_host(&self) -> bool {
        matches!(self.kind, FunctionKind::Host(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ValueType;

    fn instance() -> Arc<ModuleInstance> {
        Arc::new(ModuleInstance::new("math"))
    }

    fn wasm(
        module: &Arc<ModuleInstance>,
        index: u32,
        name: &str,
        ty: FunctionType,
    ) -> FunctionInstance {
        FunctionInstance::new(module, index, name, ty, FunctionKind::Wasm(Code::default()))
    }

    #[test]
    fn test_function_instance_metadata() {
        let module = instance();
        let ty = FunctionType::new([ValueType::I32], [ValueType::I32]);
        let f = wasm(&module, 3, "inc", ty.clone());

        assert_eq!(f.ty(), &ty);
        assert_eq!(f.index(), 3);
        assert_eq!(f.name(), "inc");
        assert_eq!(f.module_name(), "math");
        assert_eq!(f.debug_name(), "math.inc");
        assert!(!f.is_host());
        assert!(Arc::ptr_eq(&f.module().unwrap(), &module));
    }

    #[test]
    fn test_function_ids_are_unique() {
        let module = instance();
        let a = wasm(&module, 0, "a", FunctionType::default());
        let b = wasm(&module, 0, "a", FunctionType::default());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_module_reference_is_weak() {
        let module = instance();
        let f = wasm(&module, 0, "f", FunctionType::default());
        drop(module);
        assert!(f.module().is_none());
        assert_eq!(f.module_name(), "math");
    }
}
