//! strato-runtime — WASM invocation for the Strato platform.
//!
//! Three pieces:
//! - [`cache`]: the per-app compilation cache that amortises cold starts
//! - [`bridge`]: the `env` host functions a guest uses to exchange HTTP
//!   request/response bytes with the host
//! - [`invoker`]: compiles (or reuses) a module, wires WASI plus the
//!   bridge, and runs the guest to completion inside a fresh store

pub mod bridge;
pub mod cache;
pub mod interpreter;
pub mod invoker;

pub use bridge::{BridgePayload, HostBridge};
pub use cache::{CacheEntry, ModuleCache};
pub use invoker::{InvokeArgs, InvokeError, InvokeOutput, SandboxLimits, invoke};
