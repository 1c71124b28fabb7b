//! Integration tests for wasmrt-core.
//!
//! These tests verify the complete pipeline:
//! - Module definition to store instantiation
//! - Compilation by the interpreter engine
//! - Calls, traps and linear memory effects
//! - Cross-module imports and host modules
//! - Release and teardown

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use wasmrt_common::{RuntimeConfig, RuntimeError, TrapCode};
use wasmrt_core::{
    CallContext, Code, Export, ExternKind, FunctionType, HostModuleBuilder, Import, LimitsType,
    Module, ModuleState, NameSection, Store, ValueType,
};
use wasmrt_host::linker::register_all;
use wasmrt_host::logging::LogLevel;

const I32: ValueType = ValueType::I32;

fn store() -> Store {
    Store::with_config(&RuntimeConfig::default()).unwrap()
}

fn export_func(name: &str, index: u32) -> Export {
    Export {
        name: name.to_string(),
        kind: ExternKind::Func,
        index,
    }
}

fn export_memory(name: &str) -> Export {
    Export {
        name: name.to_string(),
        kind: ExternKind::Memory,
        index: 0,
    }
}

/// `add(a, b) = a + b` and `store(addr, value)` writing into its own memory.
fn math_module() -> Module {
    Module {
        type_section: vec![
            FunctionType::new([I32, I32], [I32]),
            FunctionType::new([I32, I32], []),
        ],
        function_section: vec![0, 1],
        code_section: vec![
            Code::new([], [0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b]),
            Code::new([], [0x20, 0x00, 0x20, 0x01, 0x36, 0x02, 0x00, 0x0b]),
        ],
        memory_section: vec![LimitsType { min: 1, max: None }],
        export_section: vec![
            export_func("add", 0),
            export_func("store", 1),
            export_memory("memory"),
        ],
        ..Default::default()
    }
}

// ============================================================================
// Test: Basic Execution
// ============================================================================

#[test]
fn test_basic_execution() {
    let store = store();
    let instance = store.instantiate(&math_module(), "math").unwrap();

    assert_eq!(instance.state(), ModuleState::Callable);
    assert_eq!(instance.call("add", &[2, 40]).unwrap(), vec![42]);
    assert_eq!(store.call("math", "add", &[1, 1]).unwrap(), vec![2]);

    store.close().unwrap();
}

#[test]
fn test_memory_effects_are_visible() {
    let store = store();
    let instance = store.instantiate(&math_module(), "math").unwrap();

    assert!(instance.call("store", &[8, 0x0102_0304]).unwrap().is_empty());

    let memory = instance.exported_memory("memory").unwrap();
    assert!(Arc::ptr_eq(&memory, &instance.memory().unwrap()));
    assert_eq!(memory.read(8, 4).unwrap(), vec![0x04, 0x03, 0x02, 0x01]);
    assert_eq!(memory.read_u32(8), Some(0x0102_0304));

    store.close().unwrap();
}

#[test]
fn test_function_names_from_name_section() {
    let store = store();
    let nop = Code::new([], [0x0b]);
    let module = Module {
        type_section: vec![FunctionType::default()],
        function_section: vec![0; 5],
        code_section: vec![nop; 5],
        name_section: Some(NameSection {
            module_name: Some("named".to_string()),
            function_names: [(1, "two"), (3, "four"), (4, "five")].into_iter().collect(),
        }),
        ..Default::default()
    };

    let instance = store.instantiate(&module, "named").unwrap();
    let names: Vec<String> = instance
        .functions()
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    assert_eq!(names, vec!["unknown", "two", "unknown", "four", "five"]);

    store.close().unwrap();
}

#[test]
fn test_function_address_is_stable() {
    let store = store();
    let instance = store.instantiate(&math_module(), "math").unwrap();
    let engine = instance.module_engine().unwrap();

    let first = engine.function_address(0).unwrap();
    assert_eq!(engine.function_address(0), Some(first));
    assert_ne!(engine.function_address(1), Some(first));
    assert!(engine.function_address(2).is_none());

    store.close().unwrap();
}

// ============================================================================
// Test: Call Errors
// ============================================================================

#[test]
fn test_arity_mismatch() {
    let store = store();
    let instance = store.instantiate(&math_module(), "math").unwrap();

    let err = instance.call("add", &[1]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::ArityMismatch {
            expected: 2,
            actual: 1,
            ..
        }
    ));

    store.close().unwrap();
}

#[test]
fn test_unknown_export_and_module() {
    let store = store();
    let instance = store.instantiate(&math_module(), "math").unwrap();

    assert!(instance.call("missing", &[]).unwrap_err().is_not_found());
    assert!(store.call("nope", "add", &[1, 2]).unwrap_err().is_not_found());
    // A memory export is not callable
    assert!(instance.call("memory", &[]).unwrap_err().is_not_found());

    store.close().unwrap();
}

#[test]
fn test_trap_leaves_module_usable() {
    let store = store();
    let mut module = math_module();
    module.type_section.push(FunctionType::default());
    module.function_section.push(2);
    module.code_section.push(Code::new([], [0x00, 0x0b]));
    module.export_section.push(export_func("crash", 2));

    let instance = store.instantiate(&module, "math").unwrap();

    let err = instance.call("crash", &[]).unwrap_err();
    assert!(err.is_trap());
    assert_eq!(err.trap_code(), Some(TrapCode::Unreachable));

    assert_eq!(instance.call("add", &[3, 4]).unwrap(), vec![7]);
    store.close().unwrap();
}

#[test]
fn test_out_of_bounds_store_traps_without_partial_write() {
    let store = store();
    let instance = store.instantiate(&math_module(), "math").unwrap();
    let memory = instance.memory().unwrap();

    let err = instance.call("store", &[65_534, 0xffff_ffff]).unwrap_err();
    assert_eq!(err.trap_code(), Some(TrapCode::MemoryOutOfBounds));
    assert_eq!(memory.read(65_534, 2).unwrap(), vec![0, 0]);

    store.close().unwrap();
}

#[test]
fn test_unbounded_recursion_traps_on_small_thread_stack() {
    // (func call 0) at the default call depth
    let module = Module {
        type_section: vec![FunctionType::default()],
        function_section: vec![0],
        code_section: vec![Code::new([], [0x10, 0x00, 0x0b])],
        export_section: vec![export_func("run", 0)],
        ..Default::default()
    };

    let handle = std::thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(move || {
            let store = store();
            store.instantiate(&module, "recurse").unwrap();
            let err = store.call("recurse", "run", &[]).unwrap_err();
            store.close().unwrap();
            err.trap_code()
        })
        .unwrap();

    assert_eq!(handle.join().unwrap(), Some(TrapCode::CallStackExhausted));
}

// ============================================================================
// Test: Build Failures
// ============================================================================

#[test]
fn test_memory_over_limit_is_not_published() {
    let mut config = RuntimeConfig::default();
    config.engine.max_memory_pages = 4;
    let store = Store::with_config(&config).unwrap();

    let mut module = math_module();
    module.memory_section = vec![LimitsType { min: 5, max: None }];

    let err = store.instantiate(&module, "math").unwrap_err();
    assert!(err.is_resource_limit());
    assert!(store.module_names().is_empty());
}

#[test]
fn test_compile_failure_is_not_published() {
    let store = store();
    let mut module = math_module();
    module.code_section[1] = Code::new([], [0x20, 0x00, 0xfc, 0x0b]);

    let err = store.instantiate(&module, "math").unwrap_err();
    assert!(matches!(err, RuntimeError::CompilationFailed { .. }));
    assert!(store.module("math").is_err());

    // The name is free for a correct definition
    store.instantiate(&math_module(), "math").unwrap();
    store.close().unwrap();
}

#[test]
fn test_unresolved_import() {
    let store = store();
    let module = Module {
        type_section: vec![FunctionType::new([I32, I32], [I32])],
        import_section: vec![Import {
            module: "math".to_string(),
            name: "add".to_string(),
            type_index: 0,
        }],
        ..Default::default()
    };

    assert!(matches!(
        store.instantiate(&module, "app"),
        Err(RuntimeError::UnresolvedImport { .. })
    ));

    store.instantiate(&math_module(), "math").unwrap();
    let mut wrong = module.clone();
    wrong.import_section[0].name = "missing".to_string();
    assert!(matches!(
        store.instantiate(&wrong, "app"),
        Err(RuntimeError::UnresolvedImport { .. })
    ));

    // Signature mismatch
    let mut mismatched = module;
    mismatched.type_section[0] = FunctionType::new([I32], [I32]);
    assert!(matches!(
        store.instantiate(&mismatched, "app"),
        Err(RuntimeError::InvalidModule { .. })
    ));

    store.close().unwrap();
}

// ============================================================================
// Test: Cross-Module Calls
// ============================================================================

/// Imports `math.add` and `math.store`; `run(x)` stores at 0 in math's memory
/// and returns `add(x, x)`.
fn app_module() -> Module {
    let binary = FunctionType::new([I32, I32], [I32]);
    let store_fn = FunctionType::new([I32, I32], []);
    Module {
        type_section: vec![binary, store_fn, FunctionType::new([I32], [I32])],
        import_section: vec![
            Import {
                module: "math".to_string(),
                name: "add".to_string(),
                type_index: 0,
            },
            Import {
                module: "math".to_string(),
                name: "store".to_string(),
                type_index: 1,
            },
        ],
        function_section: vec![2],
        code_section: vec![Code::new(
            [],
            [
                0x41, 0x00, 0x20, 0x00, 0x10, 0x01, // math.store(0, x)
                0x20, 0x00, 0x20, 0x00, 0x10, 0x00, // math.add(x, x)
                0x0b,
            ],
        )],
        memory_section: vec![LimitsType { min: 1, max: None }],
        export_section: vec![export_func("run", 2)],
        ..Default::default()
    }
}

#[test]
fn test_cross_module_call() {
    let store = store();
    let math = store.instantiate(&math_module(), "math").unwrap();
    let app = store.instantiate(&app_module(), "app").unwrap();

    assert_eq!(app.imported_functions().len(), 2);
    assert_eq!(app.function(0).unwrap().module_name(), "math");
    assert_eq!(app.call("run", &[21]).unwrap(), vec![42]);

    // The callee wrote into its own memory, not the caller's
    assert_eq!(math.memory().unwrap().read_u32(0), Some(21));
    assert_eq!(app.memory().unwrap().read_u32(0), Some(0));

    store.close().unwrap();
}

#[test]
fn test_released_import_fails_calls() {
    let store = store();
    store.instantiate(&math_module(), "math").unwrap();
    let app = store.instantiate(&app_module(), "app").unwrap();

    store.release_module("math").unwrap();
    assert!(matches!(
        app.call("run", &[1]),
        Err(RuntimeError::ModuleReleased { .. })
    ));

    store.close().unwrap();
}

#[test]
fn test_release_then_call_fails() {
    let store = store();
    let math = store.instantiate(&math_module(), "math").unwrap();

    store.release_module("math").unwrap();
    assert_eq!(math.state(), ModuleState::Released);
    assert!(matches!(
        math.call("add", &[1, 2]),
        Err(RuntimeError::ModuleReleased { .. })
    ));
    assert!(store.call("math", "add", &[1, 2]).unwrap_err().is_not_found());
}

// ============================================================================
// Test: Host Modules
// ============================================================================

/// Imports `env.log`; `run(ptr, len)` logs the message at info level.
fn logger_module() -> Module {
    Module {
        type_section: vec![
            FunctionType::new([I32, I32, I32], []),
            FunctionType::new([I32, I32], []),
        ],
        import_section: vec![Import {
            module: "env".to_string(),
            name: "log".to_string(),
            type_index: 0,
        }],
        function_section: vec![1],
        code_section: vec![Code::new(
            [],
            [0x41, 0x01, 0x20, 0x00, 0x20, 0x01, 0x10, 0x00, 0x0b],
        )],
        memory_section: vec![LimitsType { min: 1, max: None }],
        export_section: vec![export_func("run", 1), export_memory("memory")],
        ..Default::default()
    }
}

#[test]
fn test_host_log_reads_caller_memory() {
    let store = store();
    let logs = register_all(&store).unwrap();
    let guest = store.instantiate(&logger_module(), "guest").unwrap();

    let message = b"hello from guest";
    let memory = guest.exported_memory("memory").unwrap();
    assert!(memory.write(100, message));

    let request_id = Uuid::new_v4();
    let ctx = CallContext::new(Arc::clone(&guest)).with_request_id(request_id);
    guest
        .call_with_context(&ctx, "run", &[100, message.len() as u64])
        .unwrap();

    let entries = logs.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].level, LogLevel::Info);
    assert_eq!(entries[0].message, "hello from guest");
    assert_eq!(entries[0].module, "guest");
    assert_eq!(entries[0].request_id, request_id.to_string());

    store.close().unwrap();
}

#[test]
fn test_host_log_out_of_bounds_traps() {
    let store = store();
    let logs = register_all(&store).unwrap();
    let guest = store.instantiate(&logger_module(), "guest").unwrap();

    let err = guest.call("run", &[65_530, 100]).unwrap_err();
    assert_eq!(err.trap_code(), Some(TrapCode::MemoryOutOfBounds));
    assert!(logs.is_empty());

    store.close().unwrap();
}

#[test]
fn test_custom_host_module() {
    let store = store();
    HostModuleBuilder::new("host")
        .function("double", FunctionType::new([I32], [I32]), |_, params| {
            Ok(vec![params[0] * 2])
        })
        .instantiate(&store)
        .unwrap();

    let module = Module {
        type_section: vec![FunctionType::new([I32], [I32])],
        import_section: vec![Import {
            module: "host".to_string(),
            name: "double".to_string(),
            type_index: 0,
        }],
        function_section: vec![0],
        code_section: vec![Code::new([], [0x20, 0x00, 0x10, 0x00, 0x20, 0x00, 0x6a, 0x0b])],
        export_section: vec![export_func("triple", 1)],
        ..Default::default()
    };
    let app = store.instantiate(&module, "app").unwrap();
    assert_eq!(app.call("triple", &[5]).unwrap(), vec![15]);

    store.close().unwrap();
}

// ============================================================================
// Test: Call Context
// ============================================================================

#[test]
fn test_cancelled_chain_traps() {
    let store = store();
    let math = store.instantiate(&math_module(), "math").unwrap();

    let ctx = CallContext::new(Arc::clone(&math));
    ctx.cancel_handle().cancel();
    let err = math.call_with_context(&ctx, "add", &[1, 2]).unwrap_err();
    assert_eq!(err.trap_code(), Some(TrapCode::Cancelled));

    store.close().unwrap();
}

#[test]
fn test_expired_deadline_traps_across_modules() {
    let store = store();
    store.instantiate(&math_module(), "math").unwrap();
    let app = store.instantiate(&app_module(), "app").unwrap();

    let ctx = CallContext::new(Arc::clone(&app)).with_timeout(Duration::ZERO);
    let err = app.call_with_context(&ctx, "run", &[1]).unwrap_err();
    assert_eq!(err.trap_code(), Some(TrapCode::DeadlineExceeded));

    store.close().unwrap();
}

// ============================================================================
// Test: Concurrency
// ============================================================================

#[test]
fn test_concurrent_calls() {
    let store = store();
    let math = store.instantiate(&math_module(), "math").unwrap();

    std::thread::scope(|scope| {
        for t in 0..8u64 {
            let math = Arc::clone(&math);
            scope.spawn(move || {
                for i in 0..100u64 {
                    assert_eq!(math.call("add", &[t, i]).unwrap(), vec![t + i]);
                }
            });
        }
    });

    store.close().unwrap();
}

#[test]
fn test_concurrent_module_instance_identity() {
    let store = store();
    let instances: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| store.module_instance("shared")))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(store.module_names(), vec!["shared".to_string()]);
}

// ============================================================================
// Test: Serialized Definitions
// ============================================================================

#[test]
fn test_module_from_toml() {
    let definition = r#"
        type_section = [{ params = ["i32", "i32"], results = ["i32"] }]
        function_section = [0]
        code_section = [{ body = [0x20, 0, 0x20, 1, 0x6c, 0x0b] }]
        memory_section = [{ min = 1, max = 2 }]
        export_section = [
            { name = "mul", kind = "func", index = 0 },
            { name = "memory", kind = "memory", index = 0 },
        ]
    "#;
    let module: Module = toml::from_str(definition).unwrap();

    let store = store();
    let instance = store.instantiate(&module, "calc").unwrap();
    assert_eq!(instance.call("mul", &[6, 7]).unwrap(), vec![42]);
    assert_eq!(instance.exported_memory("memory").unwrap().max(), Some(2));

    store.close().unwrap();
}

#[test]
fn test_module_from_json() {
    let definition = r#"{
        "type_section": [{"params": ["i64", "i64"], "results": ["i64"]}],
        "function_section": [0],
        "code_section": [{"body": [32, 0, 32, 1, 125, 11]}],
        "export_section": [{"name": "sub", "kind": "func", "index": 0}],
        "name_section": {"function_names": [{"index": 0, "name": "sub64"}]}
    }"#;
    let module: Module = serde_json::from_str(definition).unwrap();

    let store = store();
    let instance = store.instantiate(&module, "calc").unwrap();
    assert_eq!(instance.call("sub", &[10, 3]).unwrap(), vec![7]);
    assert_eq!(instance.exported_function("sub").unwrap().name(), "sub64");
    assert_eq!(
        instance.call("sub", &[0, 1]).unwrap(),
        vec![u64::MAX],
        "i64 arithmetic wraps"
    );

    store.close().unwrap();
}
