//! wasmrt CLI entry point.
//!
//! Loads decoded module definitions, instantiates them in a store after the
//! `env` host module, and invokes an exported function.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wasmrt_common::{ConfigFile, ModuleEntry};
use wasmrt_core::{ExportInstance, Module, Store};
use wasmrt_host::linker::register_all;

#[derive(Debug, Parser)]
#[command(name = "wasmrt", version, about = "Instantiate and run WebAssembly module definitions")]
struct Cli {
    /// TOML configuration file with runtime settings and modules to load.
    #[arg(long, env = "WASMRT_CONFIG")]
    config: Option<PathBuf>,

    /// Module definition to instantiate, after those in the config file.
    #[arg(long = "module", value_name = "NAME=PATH", value_parser = parse_module_entry)]
    modules: Vec<ModuleEntry>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Call an exported function and print its results, one per line.
    Invoke {
        module: String,
        function: String,
        #[arg(value_parser = parse_value, allow_negative_numbers = true)]
        args: Vec<u64>,
    },
    /// List instantiated modules and their exports.
    List,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wasmrt=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ConfigFile::default(),
    };
    config.modules.extend(cli.modules);

    info!(
        engine = ?config.runtime.engine.kind,
        modules = config.modules.len(),
        "Configuration loaded"
    );

    let store = Store::with_config(&config.runtime).context("Invalid runtime configuration")?;
    let result = run(&store, &config.modules, &cli.command);
    store.close().context("Failed to close store")?;
    result
}

fn run(store: &Store, modules: &[ModuleEntry], command: &Command) -> anyhow::Result<()> {
    let logs = register_all(store).context("Failed to register host functions")?;

    for entry in modules {
        let module = load_module(Path::new(&entry.path))?;
        store
            .instantiate(&module, &entry.name)
            .with_context(|| format!("Failed to instantiate module {}", entry.name))?;
    }

    match command {
        Command::Invoke {
            module,
            function,
            args,
        } => {
            let results = store
                .call(module, function, args)
                .with_context(|| format!("Call to {module}.{function} failed"))?;
            debug!(guest_logs = logs.drain().len(), "Call finished");
            for value in results {
                println!("{value}");
            }
        }
        Command::List => {
            for name in store.module_names() {
                let instance = store.module(&name)?;
                let mut exports: Vec<_> = instance.exports().into_iter().collect();
                exports.sort_by(|a, b| a.0.cmp(&b.0));

                println!("{name}");
                for (export, item) in exports {
                    match item {
                        ExportInstance::Function(f) => println!("  func   {export} {}", f.ty()),
                        ExportInstance::Memory(m) => {
                            println!("  memory {export} {} pages", m.pages());
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Read a module definition, JSON for `.json` files and TOML otherwise.
fn load_module(path: &Path) -> anyhow::Result<Module> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read module {}", path.display()))?;

    let module = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid module definition {}", path.display()))?
    } else {
        toml::from_str(&content)
            .with_context(|| format!("Invalid module definition {}", path.display()))?
    };
    Ok(module)
}

fn parse_module_entry(s: &str) -> Result<ModuleEntry, String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{s}'"))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, got '{s}'"));
    }
    Ok(ModuleEntry {
        name: name.to_string(),
        path: path.to_string(),
    })
}

/// Parse an argument word. Negative numbers are passed in two's complement.
#[allow(clippy::cast_sign_loss)]
fn parse_value(s: &str) -> Result<u64, String> {
    s.parse::<u64>()
        .or_else(|_| s.parse::<i64>().map(|v| v as u64))
        .map_err(|e| format!("invalid argument '{s}': {e}"))
}
