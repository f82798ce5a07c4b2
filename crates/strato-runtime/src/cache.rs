//! Per-app compilation cache.
//!
//! `ModuleCache` maps app ids to opaque [`CacheEntry`] handles. Each entry
//! owns a wasmtime [`Engine`] plus a table of modules compiled in it,
//! keyed by blob fingerprint — a `Module` is only reusable inside the
//! engine that compiled it, so engine and table travel together.
//!
//! The map itself never interprets entries. On rollback the management
//! layer deletes the app's entry before the new active deploy becomes
//! visible, so the next invocation recompiles against the new blob.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;
use uuid::Uuid;
use wasmtime::{Config, Engine, Module};

/// A reusable compiled-module cache for one app.
pub struct CacheEntry {
    engine: Engine,
    modules: RwLock<HashMap<String, Module>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheEntry {
    pub fn new() -> anyhow::Result<Self> {
        let mut config = Config::new();
        config.async_support(true);
        config.consume_fuel(true);
        let engine = Engine::new(&config)?;
        Ok(Self {
            engine,
            modules: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Return the compiled module for `blob`, compiling and inserting it
    /// on first sight of the fingerprint.
    pub fn get_or_compile(&self, blob: &[u8]) -> anyhow::Result<Module> {
        let key = strato_core::fingerprint(blob);
        {
            let modules = self
                .modules
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(module) = modules.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(module.clone());
            }
        }

        let module = Module::new(&self.engine, blob)?;
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, module.clone());
        Ok(module)
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Concurrent map of app id → cache entry. Unbounded; single-node
/// deployments hold one entry per app.
#[derive(Default)]
pub struct ModuleCache {
    entries: RwLock<HashMap<Uuid, Arc<CacheEntry>>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<CacheEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Insert or replace the entry for `id`.
    pub fn put(&self, id: Uuid, entry: Arc<CacheEntry>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);
    }

    /// Drop the entry for `id`. Succeeds silently when absent.
    pub fn delete(&self, id: Uuid) {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            debug!(app = %id, "compilation cache entry invalidated");
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
