//! Core runtime for wasmrt.
//!
//! This crate turns decoded module definitions into live, callable instances:
//! - [`Store`]: Registry of module instances, keyed by name
//! - [`ModuleInstance`]: Functions, memory and exports of one loaded module
//! - [`MemoryInstance`]: Bounds-checked little-endian linear memory
//! - [`Engine`] / [`ModuleEngine`]: Pluggable execution backend contract
//! - [`InterpreterEngine`]: The bundled interpreter backend
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Store                            │
//! │  (One per embedding, thread-safe)                       │
//! │  - name -> ModuleInstance                               │
//! │  - Engine fixed at construction                         │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ModuleInstance                        │
//! │  (Declared -> Built -> Compiled -> Callable -> Released)│
//! │  - FunctionInstances, imports first                     │
//! │  - Optional MemoryInstance                              │
//! │  - Exports                                              │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    ModuleEngine                         │
//! │  (Per module, closed on release)                        │
//! │  - Compiled functions                                   │
//! │  - Calls under a CallContext                            │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod function;
pub mod host;
pub mod instance;
pub mod interpreter;
pub mod memory;
pub mod module;
pub mod store;

pub use engine::{CallContext, CancelHandle, Engine, FunctionAddress, ModuleEngine};
pub use function::{FunctionInstance, FunctionKind};
pub use host::{HostFunction, HostFunctionDefinition, HostModuleBuilder};
pub use instance::{ExportInstance, ModuleInstance, ModuleState};
pub use interpreter::InterpreterEngine;
pub use memory::{MemoryInstance, PAGE_SIZE};
pub use module::{
    Code, Export, ExternKind, FunctionType, Import, Index, LimitsType, Module, NameAssoc, NameMap,
    NameSection, UNKNOWN_NAME, ValueType,
};
pub use store::Store;
