//! The runtime invoker: one guest run from blob to captured output.
//!
//! Every invocation gets a fresh `Store` (and so a fresh linear memory);
//! only the compiled module is shared through the per-app cache entry.
//! WASI and the optional host bridge are linked side by side, the guest's
//! `_start` runs to completion, and all sandbox state drops on the way
//! out regardless of how the run ended.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;
use wasmtime::{Linker, Store, StoreLimits, StoreLimitsBuilder, Trap};
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use strato_core::RuntimeKind;

use crate::bridge::HostBridge;
use crate::cache::CacheEntry;
use crate::interpreter;

/// Largest output a guest may write to stdout or stderr.
const MAX_GUEST_OUTPUT: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("compiling module failed: {0}")]
    Compile(#[source] anyhow::Error),

    #[error("failed to instantiate WASI: {0}")]
    Wasi(#[source] anyhow::Error),

    #[error("failed to instantiate guest module: {0}")]
    Instantiate(#[source] anyhow::Error),

    #[error("guest trapped: {0}")]
    Trap(#[source] anyhow::Error),

    #[error("guest exited with status {0}")]
    GuestExit(i32),

    #[error("invocation fuel exhausted")]
    FuelExhausted,

    #[error("js interpreter is not installed")]
    InterpreterUnavailable,

    #[error("js source is not valid utf-8")]
    InvalidSource,

    #[error("sandbox setup failed: {0}")]
    Setup(#[source] anyhow::Error),
}

/// Per-invocation sandbox budgets.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub memory_bytes: usize,
    pub table_elements: usize,
    /// CPU ceiling: the run traps once this much fuel is burnt.
    pub fuel: u64,
    /// Descriptor budgets carried with the policy. wasmtime-wasi exposes
    /// no descriptor-table cap today.
    /// TODO: enforce once wasmtime-wasi grows a descriptor budget knob.
    pub max_open_files: u32,
    pub max_open_dirs: u32,
    /// Host directory mounted at `/` inside the guest.
    pub mount_dir: PathBuf,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 64 * 1024 * 1024,
            table_elements: 10_000,
            fuel: 500_000_000,
            max_open_files: 10,
            max_open_dirs: 10,
            mount_dir: PathBuf::from("/"),
        }
    }
}

pub struct InvokeArgs {
    /// WASM for `go`, JS source for `js`.
    pub blob: Bytes,
    pub runtime: RuntimeKind,
    pub env: HashMap<String, String>,
    pub cache: Arc<CacheEntry>,
    /// Bytes exposed to the guest on stdin.
    pub input: Bytes,
    pub bridge: Option<HostBridge>,
    pub limits: SandboxLimits,
}

#[derive(Debug)]
pub struct InvokeOutput {
    pub stdout: Bytes,
    pub stderr: Bytes,
}

struct InvocationState {
    wasi: WasiP1Ctx,
    limits: StoreLimits,
}

/// Program arguments for a `js` run: the interpreter evaluates the
/// deploy's source via `-e`.
pub fn js_args(source: &str) -> Vec<String> {
    vec![String::new(), "-e".to_string(), source.to_string()]
}

/// Run one guest to completion.
pub async fn invoke(args: InvokeArgs) -> Result<InvokeOutput, InvokeError> {
    let (wasm, extra_args) = match args.runtime {
        RuntimeKind::Go => (args.blob.clone(), Vec::new()),
        RuntimeKind::Js => {
            let interpreter = interpreter::get().ok_or(InvokeError::InterpreterUnavailable)?;
            let source =
                std::str::from_utf8(&args.blob).map_err(|_| InvokeError::InvalidSource)?;
            (interpreter, js_args(source))
        }
    };

    let module = args
        .cache
        .get_or_compile(&wasm)
        .map_err(InvokeError::Compile)?;
    let engine = args.cache.engine();

    let stdout = MemoryOutputPipe::new(MAX_GUEST_OUTPUT);
    let stderr = MemoryOutputPipe::new(MAX_GUEST_OUTPUT);

    let mut argv = Vec::with_capacity(1 + extra_args.len());
    argv.push("run".to_string());
    argv.extend(extra_args);
    let env: Vec<(String, String)> = args
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut builder = WasiCtxBuilder::new();
    builder
        .args(&argv)
        .envs(&env)
        .stdin(MemoryInputPipe::new(args.input.clone()))
        .stdout(stdout.clone())
        .stderr(stderr.clone())
        .inherit_network()
        .allow_tcp(true)
        .allow_udp(true)
        .allow_ip_name_lookup(true);
    builder
        .preopened_dir(&args.limits.mount_dir, "/", DirPerms::all(), FilePerms::all())
        .map_err(InvokeError::Wasi)?;
    let wasi = builder.build_p1();

    let mut linker: Linker<InvocationState> = Linker::new(engine);
    preview1::add_to_linker_async(&mut linker, |state: &mut InvocationState| &mut state.wasi)
        .map_err(InvokeError::Wasi)?;
    if let Some(bridge) = &args.bridge {
        bridge.add_to_linker(&mut linker).map_err(InvokeError::Wasi)?;
    }

    let limits = StoreLimitsBuilder::new()
        .memory_size(args.limits.memory_bytes)
        .table_elements(args.limits.table_elements as u32)
        .build();
    let mut store = Store::new(engine, InvocationState { wasi, limits });
    store.limiter(|state| &mut state.limits);
    store.set_fuel(args.limits.fuel).map_err(InvokeError::Setup)?;

    let instance = linker
        .instantiate_async(&mut store, &module)
        .await
        .map_err(InvokeError::Instantiate)?;
    let start = instance
        .get_typed_func::<(), ()>(&mut store, "_start")
        .map_err(InvokeError::Instantiate)?;

    let run = start.call_async(&mut store, ()).await;
    // WASI system and store drop on every exit path.
    drop(store);

    if let Err(err) = run {
        classify_run_error(err)?;
    }

    let output = InvokeOutput {
        stdout: stdout.contents(),
        stderr: stderr.contents(),
    };
    if !output.stderr.is_empty() {
        debug!(
            stderr = %String::from_utf8_lossy(&output.stderr),
            "guest wrote to stderr"
        );
    }
    Ok(output)
}

/// `proc_exit(0)` is a normal termination; everything else surfaces.
fn classify_run_error(err: anyhow::Error) -> Result<(), InvokeError> {
    if let Some(exit) = err.downcast_ref::<wasmtime_wasi::I32Exit>() {
        if exit.0 == 0 {
            return Ok(());
        }
        return Err(InvokeError::GuestExit(exit.0));
    }
    if matches!(err.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
        return Err(InvokeError::FuelExhausted);
    }
    Err(InvokeError::Trap(err))
}
