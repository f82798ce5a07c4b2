//! Internal invocation messages.
//!
//! The data-only messages derive serde so cluster transports can encode
//! them however they like; the mailbox envelopes around them carry
//! in-process channels and stay local.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use strato_cluster::Addr;
use strato_core::RuntimeKind;

/// One HTTP request on its way to a runtime actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Unique per HTTP request; the response carries it back.
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub active_deploy_id: Uuid,
    pub runtime: RuntimeKind,
    pub method: String,
    /// Path with the leading app-uuid segment stripped.
    pub url: String,
    pub body: Bytes,
    pub env: HashMap<String, String>,
    /// Preview invocations skip metric emission.
    pub preview: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub request_id: Uuid,
    pub status_code: i32,
    pub response: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTask {
    pub id: Uuid,
    pub request_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopTask {
    pub id: Uuid,
    pub request_id: Uuid,
}

/// Ack for task start/stop; an empty `err` means success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartStopResponse {
    pub id: Uuid,
    pub request_id: Uuid,
    pub err: String,
}

impl StartStopResponse {
    pub fn ok(id: Uuid, request_id: Uuid) -> Self {
        Self {
            id,
            request_id,
            err: String::new(),
        }
    }

    pub fn error(id: Uuid, request_id: Uuid, err: impl ToString) -> Self {
        Self {
            id,
            request_id,
            err: err.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_empty()
    }
}

/// Mailbox protocol of the front-door server actor.
pub enum ServerMessage {
    /// An HTTP handler parked on `reply`.
    Invocation {
        request: InvocationRequest,
        reply: oneshot::Sender<InvocationResponse>,
    },
    /// A runtime actor's answer, correlated by request id.
    Response(InvocationResponse),
    /// Task lifecycle command from the management API.
    TaskStart {
        command: StartTask,
        reply: oneshot::Sender<StartStopResponse>,
    },
    TaskStop {
        command: StopTask,
        reply: oneshot::Sender<StartStopResponse>,
    },
    /// A task runtime's ack, correlated by request id.
    StartStop(StartStopResponse),
    /// The waiting handler gave up; drop its correlation entry.
    Abandon { request_id: Uuid },
}

/// Mailbox protocol of endpoint runtime actors.
pub enum RuntimeMessage {
    Request {
        request: InvocationRequest,
        reply_to: Addr<ServerMessage>,
    },
}

/// Mailbox protocol of task runtime actors. Clone so the repeater can
/// re-send ticks.
#[derive(Clone)]
pub enum TaskMessage {
    Start {
        command: StartTask,
        reply_to: Addr<ServerMessage>,
    },
    Stop {
        command: StopTask,
        reply_to: Addr<ServerMessage>,
    },
    Tick,
}
