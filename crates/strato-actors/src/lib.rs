//! strato-actors — the actors that serve WASM workloads.
//!
//! One endpoint runtime actor per HTTP invocation, one task runtime
//! actor per running task, a best-effort metric sink, and the front-door
//! server that bridges HTTP into the actor world.

pub mod messages;
pub mod metric;
pub mod runtime;
pub mod server;
pub mod task;

pub use messages::{
    InvocationRequest, InvocationResponse, RuntimeMessage, ServerMessage, StartStopResponse,
    StartTask, StopTask, TaskMessage,
};
pub use metric::MetricSink;
pub use runtime::EndpointRuntime;
pub use server::{FrontDoor, WasmServer};
pub use task::TaskRuntime;

/// Actor kind names, shared with the cluster registry.
pub const KIND_RUNTIME: &str = "runtime";
pub const KIND_TASK_RUNTIME: &str = "task_runtime";
pub const KIND_METRIC: &str = "metric";
pub const KIND_WASM_SERVER: &str = "wasm_server";

/// Well-known address of the metric sink singleton.
pub const METRIC_SINK_NAME: &str = "metric/1";
