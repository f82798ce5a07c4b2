//! stratod — the Strato serving daemon.
//!
//! Assembles the platform: store, compilation cache, cluster, metric
//! sink, runtime kinds, and the WASM front door. Runs until SIGINT or
//! SIGTERM, then shuts down cleanly.
//!
//! # Usage
//!
//! ```text
//! stratod --config strato.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, bail};
use bytes::Bytes;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use strato_actors::{
    EndpointRuntime, FrontDoor, KIND_RUNTIME, KIND_TASK_RUNTIME, KIND_WASM_SERVER,
    METRIC_SINK_NAME, MetricSink, ServerMessage, TaskRuntime, WasmServer,
};
use strato_cluster::{Addr, Cluster, ClusterConfig};
use strato_core::Config;
use strato_runtime::{ModuleCache, SandboxLimits, interpreter};
use strato_store::{AppStore, MemoryMetricStore, MemoryStore, MetricStore};

#[derive(Parser)]
#[command(name = "stratod", about = "Strato WASM serving daemon")]
struct Cli {
    /// Path to the TOML config; seeded with defaults when missing.
    #[arg(long, default_value = "strato.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,strato=debug".parse().expect("static filter parses")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    // ── Stores ─────────────────────────────────────────────────────
    let cache = Arc::new(ModuleCache::new());
    let (store, metric_store): (Arc<dyn AppStore>, Arc<dyn MetricStore>) =
        match config.storage_driver.as_str() {
            "memory" => {
                let cache = cache.clone();
                let store = MemoryStore::new()
                    .with_rollback_hook(Arc::new(move |id| cache.delete(id)));
                (Arc::new(store), Arc::new(MemoryMetricStore::new()))
            }
            other => bail!("unsupported storage driver: {other}"),
        };
    info!(driver = %config.storage_driver, "store initialized");

    // ── JS interpreter ─────────────────────────────────────────────
    if let Some(path) = &config.js_interpreter {
        let blob = std::fs::read(path)
            .with_context(|| format!("failed to read js interpreter from {}", path.display()))?;
        interpreter::install(Bytes::from(blob));
        info!(path = %path.display(), "js interpreter installed");
    } else {
        warn!("no js interpreter configured, js apps will fail to run");
    }

    // ── Cluster & actors ───────────────────────────────────────────
    let cluster = Cluster::new(ClusterConfig {
        id: config.cluster.id.clone(),
        region: config.cluster.region.clone(),
        member_addr: config.cluster.member_addr.clone(),
    });

    let limits = SandboxLimits {
        memory_bytes: config.limits.memory_bytes,
        fuel: config.limits.fuel,
        max_open_files: config.limits.max_open_files,
        max_open_dirs: config.limits.max_open_dirs,
        mount_dir: config.limits.mount_dir.clone(),
        ..SandboxLimits::default()
    };

    let sink = strato_cluster::spawn(MetricSink::new(metric_store), 256);
    cluster.register_named(METRIC_SINK_NAME, sink);

    {
        let store = store.clone();
        let cache = cache.clone();
        let cluster_ref = cluster.clone();
        let limits = limits.clone();
        cluster.register_kind(KIND_RUNTIME, 8, move || {
            EndpointRuntime::new(
                store.clone(),
                cache.clone(),
                cluster_ref.clone(),
                limits.clone(),
            )
        });
    }
    {
        let store = store.clone();
        let cache = cache.clone();
        let cluster_ref = cluster.clone();
        let limits = limits.clone();
        cluster.register_kind(KIND_TASK_RUNTIME, 16, move || {
            TaskRuntime::new(
                store.clone(),
                cache.clone(),
                cluster_ref.clone(),
                limits.clone(),
            )
        });
    }
    {
        let cluster_ref = cluster.clone();
        cluster.register_kind(KIND_WASM_SERVER, 256, move || {
            WasmServer::new(cluster_ref.clone())
        });
    }

    let server: Addr<ServerMessage> = cluster
        .activate(KIND_WASM_SERVER)
        .context("failed to activate the wasm server actor")?;

    // ── Front door ─────────────────────────────────────────────────
    let bind_addr = config
        .wasm_server_addr
        .parse()
        .with_context(|| format!("invalid wasm_server_addr {:?}", config.wasm_server_addr))?;
    let front_door = FrontDoor::new(
        bind_addr,
        store,
        server,
        config.request_timeout(),
        config.max_body_bytes,
    )
    .bind()
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let serve = tokio::spawn(front_door.serve(shutdown_rx));

    wait_for_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    serve.await.context("wasm server task panicked")??;
    info!("stratod stopped");
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            warn!(%err, "could not install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
