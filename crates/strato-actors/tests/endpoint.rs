//! Endpoint runtime actor behavior, driven through real invocations of
//! small WAT guests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use strato_actors::{
    EndpointRuntime, InvocationRequest, MetricSink, METRIC_SINK_NAME, RuntimeMessage,
    ServerMessage,
};
use strato_cluster::{Actor, Addr, Cluster, ClusterConfig, Context};
use strato_core::{App, Deploy, Endpoint, RuntimeKind, RuntimeMetric};
use strato_runtime::{ModuleCache, SandboxLimits};
use strato_store::{AppStore, MemoryMetricStore, MemoryStore, MetricStore};

/// Writes a fixed `201\nhello` envelope through the bridge.
const STATUS_GUEST: &str = r#"
(module
  (import "env" "write_response" (func $write_response (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "201\nhello")
  (func (export "_start")
    (call $write_response (i32.const 0) (i32.const 9))))
"#;

/// Forwards every server message into an inspectable channel.
struct Collector {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

#[async_trait]
impl Actor for Collector {
    type Msg = ServerMessage;

    async fn handle(&mut self, _ctx: &mut Context<ServerMessage>, msg: ServerMessage) {
        let _ = self.tx.send(msg);
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    metric_store: Arc<MemoryMetricStore>,
    cache: Arc<ModuleCache>,
    cluster: Arc<Cluster>,
}

impl Fixture {
    fn new() -> Self {
        let cluster = Cluster::new(ClusterConfig::default());
        let metric_store = Arc::new(MemoryMetricStore::new());
        let sink = strato_cluster::spawn(MetricSink::new(metric_store.clone()), 64);
        cluster.register_named(METRIC_SINK_NAME, sink);
        Self {
            store: Arc::new(MemoryStore::new()),
            metric_store,
            cache: Arc::new(ModuleCache::new()),
            cluster,
        }
    }

    fn runtime_actor(&self) -> Addr<RuntimeMessage> {
        strato_cluster::spawn(
            EndpointRuntime::new(
                self.store.clone(),
                self.cache.clone(),
                self.cluster.clone(),
                SandboxLimits::default(),
            ),
            8,
        )
    }

    /// Register an endpoint app with `guest` as its active deploy.
    async fn endpoint_with_deploy(&self, guest: &str) -> (Uuid, Uuid) {
        let mut endpoint = Endpoint::new("test", RuntimeKind::Go, HashMap::new());
        let app = App::Endpoint(endpoint.clone());
        let deploy = Deploy::for_app(&app, Bytes::copy_from_slice(guest.as_bytes()));
        let deploy_id = deploy.id();
        endpoint.active_deploy_id = deploy_id;
        endpoint.deploy_history.push(deploy_id);

        self.store
            .create_app(App::Endpoint(endpoint.clone()))
            .await
            .unwrap();
        self.store.create_deploy(deploy).await.unwrap();
        (endpoint.id, deploy_id)
    }
}

fn invocation(endpoint_id: Uuid, deploy_id: Uuid, preview: bool) -> InvocationRequest {
    InvocationRequest {
        id: Uuid::new_v4(),
        endpoint_id,
        active_deploy_id: deploy_id,
        runtime: RuntimeKind::Go,
        method: "GET".to_string(),
        url: "/".to_string(),
        body: Bytes::new(),
        env: HashMap::new(),
        preview,
    }
}

async fn next_response(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Option<Uuid> {
    match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
        Ok(Some(ServerMessage::Response(response))) => {
            assert_eq!(response.status_code, 201);
            assert_eq!(&response.response[..], b"hello");
            Some(response.request_id)
        }
        Ok(Some(_)) => panic!("unexpected message kind"),
        Ok(None) | Err(_) => None,
    }
}

#[tokio::test]
async fn serves_one_request_and_records_a_metric() {
    let fixture = Fixture::new();
    let (endpoint_id, deploy_id) = fixture.endpoint_with_deploy(STATUS_GUEST).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reply_to = strato_cluster::spawn(Collector { tx }, 64);

    let actor = fixture.runtime_actor();
    let request = invocation(endpoint_id, deploy_id, false);
    let request_id = request.id;
    actor
        .send(RuntimeMessage::Request { request, reply_to })
        .await
        .unwrap();

    assert_eq!(next_response(&mut rx).await, Some(request_id));

    // The metric lands asynchronously.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let metrics = fixture.metric_store.get_metrics(endpoint_id).await.unwrap();
    assert_eq!(metrics.len(), 1);
    match &metrics[0] {
        RuntimeMetric::Endpoint(m) => {
            assert_eq!(m.status_code, 201);
            assert_eq!(m.deploy_id, deploy_id);
        }
        other => panic!("expected endpoint metric, got {other:?}"),
    }
}

#[tokio::test]
async fn second_request_to_the_same_actor_is_ignored() {
    let fixture = Fixture::new();
    let (endpoint_id, deploy_id) = fixture.endpoint_with_deploy(STATUS_GUEST).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reply_to = strato_cluster::spawn(Collector { tx }, 64);

    let actor = fixture.runtime_actor();
    for _ in 0..2 {
        let sent = actor
            .send(RuntimeMessage::Request {
                request: invocation(endpoint_id, deploy_id, false),
                reply_to: reply_to.clone(),
            })
            .await;
        if sent.is_err() {
            // The actor already poisoned itself; the rejection is the
            // same guarantee.
            break;
        }
    }

    assert!(next_response(&mut rx).await.is_some());

    // No second response ever shows up.
    let second = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(second.is_err(), "actor served twice");
}

#[tokio::test]
async fn preview_requests_skip_metrics() {
    let fixture = Fixture::new();
    let (endpoint_id, deploy_id) = fixture.endpoint_with_deploy(STATUS_GUEST).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reply_to = strato_cluster::spawn(Collector { tx }, 64);

    fixture
        .runtime_actor()
        .send(RuntimeMessage::Request {
            request: invocation(endpoint_id, deploy_id, true),
            reply_to,
        })
        .await
        .unwrap();

    assert!(next_response(&mut rx).await.is_some());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fixture.metric_store.get_metrics(endpoint_id).await.is_err());
}

#[tokio::test]
async fn broken_blob_yields_500_and_a_500_metric() {
    let fixture = Fixture::new();
    let (endpoint_id, deploy_id) = fixture.endpoint_with_deploy("not wasm at all").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reply_to = strato_cluster::spawn(Collector { tx }, 64);

    fixture
        .runtime_actor()
        .send(RuntimeMessage::Request {
            request: invocation(endpoint_id, deploy_id, false),
            reply_to,
        })
        .await
        .unwrap();

    match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
        Ok(Some(ServerMessage::Response(response))) => {
            assert_eq!(response.status_code, 500);
            assert_eq!(&response.response[..], b"internal server error");
        }
        other => panic!("expected a response, got err={}", other.is_err()),
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    let metrics = fixture.metric_store.get_metrics(endpoint_id).await.unwrap();
    assert_eq!(metrics.len(), 1);
    match &metrics[0] {
        RuntimeMetric::Endpoint(m) => assert_eq!(m.status_code, 500),
        other => panic!("expected endpoint metric, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_deploy_yields_500_and_no_metric() {
    let fixture = Fixture::new();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reply_to = strato_cluster::spawn(Collector { tx }, 64);

    let endpoint_id = Uuid::new_v4();
    fixture
        .runtime_actor()
        .send(RuntimeMessage::Request {
            request: invocation(endpoint_id, Uuid::new_v4(), false),
            reply_to,
        })
        .await
        .unwrap();

    match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
        Ok(Some(ServerMessage::Response(response))) => {
            assert_eq!(response.status_code, 500);
        }
        other => panic!("expected a response, got {:?}", other.is_err()),
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fixture.metric_store.get_metrics(endpoint_id).await.is_err());
}
