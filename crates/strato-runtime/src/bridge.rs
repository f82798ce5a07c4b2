//! Host bridge: the `env` host functions a guest calls to exchange HTTP
//! bytes with the host.
//!
//! Protocol, driven entirely by the guest SDK:
//! 1. `malloc() -> i32` — the length of the serialized request. The name
//!    is legacy; nothing is allocated on the host side. The guest uses
//!    the length to reserve a buffer in its own linear memory.
//! 2. `write_request(offset)` — the host copies the request bytes into
//!    guest memory at `offset`.
//! 3. `write_response(offset, size)` — the host copies `size` bytes out
//!    of guest memory; last write wins.
//!
//! A bridge instance is scoped to a single invocation and not reusable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use bytes::Bytes;
use serde::Serialize;
use wasmtime::{Caller, Extern, Linker, Memory};

/// The request map exposed to the guest, MessagePack-encoded with named
/// fields so the per-language SDKs can decode it without a schema.
#[derive(Debug, Serialize)]
pub struct BridgePayload<'a> {
    pub id: String,
    pub method: &'a str,
    pub url: &'a str,
    pub body: &'a Bytes,
    pub env: &'a HashMap<String, String>,
}

impl BridgePayload<'_> {
    pub fn encode(&self) -> Result<Bytes, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self).map(Bytes::from)
    }
}

struct BridgeState {
    request: Bytes,
    response: Vec<u8>,
}

/// Per-invocation request/response byte exchange. Cloning shares the
/// underlying state, so the caller keeps a handle while the invoker owns
/// another.
#[derive(Clone)]
pub struct HostBridge {
    state: Arc<Mutex<BridgeState>>,
}

impl HostBridge {
    /// `request` is frozen for the lifetime of the bridge.
    pub fn new(request: Bytes) -> Self {
        Self {
            state: Arc::new(Mutex::new(BridgeState {
                request,
                response: Vec::new(),
            })),
        }
    }

    pub fn request_len(&self) -> usize {
        self.lock().request.len()
    }

    /// The bytes the guest wrote, empty when it never called
    /// `write_response`.
    pub fn response(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock().response)
    }

    pub fn has_response(&self) -> bool {
        !self.lock().response.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the three exports under host module `env`.
    pub fn add_to_linker<T: Send>(&self, linker: &mut Linker<T>) -> anyhow::Result<()> {
        let state = self.state.clone();
        linker.func_wrap("env", "malloc", move || -> i32 {
            let state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.request.len() as i32
        })?;

        let state = self.state.clone();
        linker.func_wrap(
            "env",
            "write_request",
            move |mut caller: Caller<'_, T>, offset: i32| -> anyhow::Result<()> {
                let memory = guest_memory(&mut caller)?;
                let request = {
                    let state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    state.request.clone()
                };
                memory.write(&mut caller, offset as u32 as usize, &request)?;
                Ok(())
            },
        )?;

        let state = self.state.clone();
        linker.func_wrap(
            "env",
            "write_response",
            move |mut caller: Caller<'_, T>, offset: i32, size: i32| -> anyhow::Result<()> {
                let memory = guest_memory(&mut caller)?;
                let mut buf = vec![0u8; size as u32 as usize];
                memory.read(&caller, offset as u32 as usize, &mut buf)?;
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state.response = buf;
                Ok(())
            },
        )?;

        Ok(())
    }
}

fn guest_memory<T>(caller: &mut Caller<'_, T>) -> anyhow::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| anyhow!("guest exports no linear memory"))
}
