//! Endpoint runtime actor: owns a module instance for exactly one
//! invocation, then poisons itself.
//!
//! Parallelism comes from the front door activating a fresh actor per
//! request; a single instance never multiplexes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use strato_cluster::{Actor, Cluster, Context};
use strato_core::envelope;
use strato_core::{EndpointMetric, RuntimeMetric};
use strato_runtime::{
    BridgePayload, CacheEntry, HostBridge, InvokeArgs, ModuleCache, SandboxLimits, invoke,
};
use strato_store::AppStore;

use crate::METRIC_SINK_NAME;
use crate::messages::{InvocationRequest, InvocationResponse, RuntimeMessage, ServerMessage};

const INTERNAL_ERROR_BODY: &[u8] = b"internal server error";

pub struct EndpointRuntime {
    store: Arc<dyn AppStore>,
    cache: Arc<ModuleCache>,
    cluster: Arc<Cluster>,
    limits: SandboxLimits,
    started: DateTime<Utc>,
    served: bool,
}

impl EndpointRuntime {
    pub fn new(
        store: Arc<dyn AppStore>,
        cache: Arc<ModuleCache>,
        cluster: Arc<Cluster>,
        limits: SandboxLimits,
    ) -> Self {
        Self {
            store,
            cache,
            cluster,
            limits,
            started: Utc::now(),
            served: false,
        }
    }

    /// Run one invocation. Returns `(status, body, emit_metric)`.
    async fn serve(&self, request: &InvocationRequest) -> (i32, Bytes, bool) {
        let deploy = match self.store.get_deploy(request.active_deploy_id).await {
            Ok(deploy) => deploy,
            Err(err) => {
                warn!(%err, deploy = %request.active_deploy_id, "could not load active deploy");
                return (500, Bytes::from_static(INTERNAL_ERROR_BODY), false);
            }
        };

        let entry = match self.cache.get(request.endpoint_id) {
            Some(entry) => entry,
            None => {
                debug!(endpoint = %request.endpoint_id, "no cache hit");
                match CacheEntry::new() {
                    Ok(entry) => Arc::new(entry),
                    Err(err) => {
                        warn!(%err, "could not build compilation cache entry");
                        return (500, Bytes::from_static(INTERNAL_ERROR_BODY), true);
                    }
                }
            }
        };

        let payload = BridgePayload {
            id: request.id.to_string(),
            method: &request.method,
            url: &request.url,
            body: &request.body,
            env: &request.env,
        };
        let request_bytes = match payload.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "failed to serialize request for the guest");
                return (500, Bytes::from_static(INTERNAL_ERROR_BODY), true);
            }
        };

        let bridge = HostBridge::new(request_bytes.clone());
        let outcome = invoke(InvokeArgs {
            blob: deploy.blob().clone(),
            runtime: request.runtime,
            env: request.env.clone(),
            cache: Arc::clone(&entry),
            input: request_bytes,
            bridge: Some(bridge.clone()),
            limits: self.limits.clone(),
        })
        .await;

        // The entry goes back even after a failed run; compiled modules
        // stay valid for the next invocation.
        self.cache.put(request.endpoint_id, entry);

        let output = match outcome {
            Ok(output) => output,
            Err(err) => {
                warn!(%err, endpoint = %request.endpoint_id, "runtime invoke error");
                return (500, Bytes::from_static(INTERNAL_ERROR_BODY), true);
            }
        };

        // The bridge wins when the guest used it; stdout is the fallback
        // for guests that just print their envelope.
        let raw = if bridge.has_response() {
            bridge.response()
        } else {
            output.stdout.clone()
        };

        match envelope::parse_response(&raw) {
            Ok((status, body)) => (status, body, true),
            Err(err) => {
                warn!(%err, "could not parse runtime response");
                (500, Bytes::from_static(INTERNAL_ERROR_BODY), true)
            }
        }
    }

    async fn emit_metric(&self, request: &InvocationRequest, status: i32) {
        let metric = RuntimeMetric::Endpoint(EndpointMetric {
            id: Uuid::new_v4(),
            endpoint_id: request.endpoint_id,
            deploy_id: request.active_deploy_id,
            request_url: request.url.clone(),
            status_code: status,
            start_time: self.started,
            duration: (Utc::now() - self.started).to_std().unwrap_or_default(),
        });
        match self.cluster.named::<RuntimeMetric>(METRIC_SINK_NAME) {
            Ok(sink) => {
                if sink.send(metric).await.is_err() {
                    debug!("metric sink terminated, dropping metric");
                }
            }
            Err(err) => debug!(%err, "metric sink unavailable"),
        }
    }
}

#[async_trait]
impl Actor for EndpointRuntime {
    type Msg = RuntimeMessage;

    async fn started(&mut self, _ctx: &mut Context<RuntimeMessage>) {
        self.started = Utc::now();
    }

    async fn handle(&mut self, ctx: &mut Context<RuntimeMessage>, msg: RuntimeMessage) {
        let RuntimeMessage::Request { request, reply_to } = msg;

        if self.served {
            warn!(request = %request.id, "runtime actor already served, ignoring request");
            return;
        }
        self.served = true;

        let (status, body, emit_metric) = self.serve(&request).await;

        let response = InvocationResponse {
            request_id: request.id,
            status_code: status,
            response: body,
        };
        if reply_to.send(ServerMessage::Response(response)).await.is_err() {
            debug!(request = %request.id, "front door gone before the response arrived");
        }

        ctx.poison();

        if emit_metric && !request.preview {
            self.emit_metric(&request, status).await;
        }
    }
}
