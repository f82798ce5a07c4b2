//! Process-wide JS interpreter blob.
//!
//! `js` deploys carry raw JavaScript source; the WASM that actually runs
//! is a SpiderMonkey build compiled to WASI, shipped alongside the daemon
//! and installed here once at boot. Per-app compilation caches still pay
//! off for `js` apps because compiling the interpreter module is what
//! dominates their cold start.

use std::sync::OnceLock;

use bytes::Bytes;

static INTERPRETER: OnceLock<Bytes> = OnceLock::new();

/// Install the interpreter blob. The first install wins; later calls
/// return `false` and leave the blob untouched.
pub fn install(blob: Bytes) -> bool {
    INTERPRETER.set(blob).is_ok()
}

pub fn get() -> Option<Bytes> {
    INTERPRETER.get().cloned()
}

pub fn installed() -> bool {
    INTERPRETER.get().is_some()
}
