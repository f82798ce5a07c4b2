//! WASM front-door server.
//!
//! Two halves:
//! - [`WasmServer`], the actor that owns the request/response correlation
//!   maps and activates runtime actors through the cluster. All map
//!   access is serialised by its mailbox.
//! - [`FrontDoor`], the hyper HTTP server whose handlers build
//!   [`InvocationRequest`]s, park on a single-capacity channel, and write
//!   whatever comes back.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use strato_cluster::{Actor, Addr, Cluster, Context};
use strato_store::AppStore;

use crate::messages::{
    InvocationRequest, InvocationResponse, RuntimeMessage, ServerMessage, StartStopResponse,
    StartTask, StopTask, TaskMessage,
};
use crate::{KIND_RUNTIME, KIND_TASK_RUNTIME};

/// The front-door actor: correlation maps plus runtime activation.
pub struct WasmServer {
    cluster: Arc<Cluster>,
    responses: HashMap<Uuid, oneshot::Sender<InvocationResponse>>,
    start_stops: HashMap<Uuid, oneshot::Sender<StartStopResponse>>,
    /// Running task actors, so `StopTask` reaches the actor that holds
    /// the repeater.
    tasks: HashMap<Uuid, Addr<TaskMessage>>,
}

impl WasmServer {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self {
            cluster,
            responses: HashMap::new(),
            start_stops: HashMap::new(),
            tasks: HashMap::new(),
        }
    }

    fn fail_invocation(&mut self, request_id: Uuid, body: &'static str) {
        if let Some(reply) = self.responses.remove(&request_id) {
            let _ = reply.send(InvocationResponse {
                request_id,
                status_code: 500,
                response: Bytes::from_static(body.as_bytes()),
            });
        }
    }

    async fn dispatch_invocation(
        &mut self,
        ctx: &Context<ServerMessage>,
        request: InvocationRequest,
    ) {
        let request_id = request.id;
        match self.cluster.activate::<RuntimeMessage>(KIND_RUNTIME) {
            Ok(runtime) => {
                let send = runtime.send(RuntimeMessage::Request {
                    request,
                    reply_to: ctx.addr(),
                });
                if send.await.is_err() {
                    error!(request = %request_id, "runtime actor rejected the request");
                    self.fail_invocation(request_id, "internal server error");
                }
            }
            Err(err) => {
                error!(%err, "could not activate a runtime actor");
                self.fail_invocation(request_id, "internal server error");
            }
        }
    }

    async fn dispatch_task_start(&mut self, ctx: &Context<ServerMessage>, command: StartTask) {
        let task_id = command.id;
        let request_id = command.request_id;
        match self.cluster.activate::<TaskMessage>(KIND_TASK_RUNTIME) {
            Ok(task) => {
                let send = task.send(TaskMessage::Start {
                    command,
                    reply_to: ctx.addr(),
                });
                if send.await.is_err() {
                    self.fail_start_stop(task_id, request_id, "task runtime rejected the start");
                } else {
                    self.tasks.insert(task_id, task);
                }
            }
            Err(err) => {
                error!(%err, "could not activate a task runtime actor");
                self.fail_start_stop(task_id, request_id, "no task runtime available");
            }
        }
    }

    async fn dispatch_task_stop(&mut self, ctx: &Context<ServerMessage>, command: StopTask) {
        let task_id = command.id;
        let request_id = command.request_id;
        match self.tasks.remove(&task_id) {
            Some(task) => {
                let send = task.send(TaskMessage::Stop {
                    command,
                    reply_to: ctx.addr(),
                });
                if send.await.is_err() {
                    self.fail_start_stop(task_id, request_id, "task runtime already terminated");
                }
            }
            None => {
                self.fail_start_stop(task_id, request_id, "task is not running");
            }
        }
    }

    fn fail_start_stop(&mut self, task_id: Uuid, request_id: Uuid, err: &str) {
        if let Some(reply) = self.start_stops.remove(&request_id) {
            let _ = reply.send(StartStopResponse::error(task_id, request_id, err));
        }
    }
}

#[async_trait::async_trait]
impl Actor for WasmServer {
    type Msg = ServerMessage;

    async fn handle(&mut self, ctx: &mut Context<ServerMessage>, msg: ServerMessage) {
        match msg {
            ServerMessage::Invocation { request, reply } => {
                self.responses.insert(request.id, reply);
                self.dispatch_invocation(ctx, request).await;
            }

            ServerMessage::Response(response) => match self.responses.remove(&response.request_id)
            {
                Some(reply) => {
                    let _ = reply.send(response);
                }
                None => {
                    debug!(request = %response.request_id, "late response discarded");
                }
            },

            ServerMessage::TaskStart { command, reply } => {
                self.start_stops.insert(command.request_id, reply);
                self.dispatch_task_start(ctx, command).await;
            }

            ServerMessage::TaskStop { command, reply } => {
                self.start_stops.insert(command.request_id, reply);
                self.dispatch_task_stop(ctx, command).await;
            }

            ServerMessage::StartStop(ack) => {
                if !ack.is_ok() {
                    self.tasks.remove(&ack.id);
                }
                match self.start_stops.remove(&ack.request_id) {
                    Some(reply) => {
                        let _ = reply.send(ack);
                    }
                    None => {
                        debug!(request = %ack.request_id, "late start/stop ack discarded");
                    }
                }
            }

            ServerMessage::Abandon { request_id } => {
                self.responses.remove(&request_id);
                self.start_stops.remove(&request_id);
            }
        }
    }
}

/// The HTTP half: parses the route, loads the app, and round-trips one
/// invocation through the front-door actor.
pub struct FrontDoor {
    bind_addr: SocketAddr,
    store: Arc<dyn AppStore>,
    server: Addr<ServerMessage>,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl FrontDoor {
    pub fn new(
        bind_addr: SocketAddr,
        store: Arc<dyn AppStore>,
        server: Addr<ServerMessage>,
        request_timeout: Duration,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            bind_addr,
            store,
            server,
            request_timeout,
            max_body_bytes,
        }
    }

    /// Bind the listener. Split from `serve` so callers binding port 0
    /// can learn the chosen port first.
    pub async fn bind(self) -> anyhow::Result<BoundFrontDoor> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .context("failed to bind wasm server")?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "wasm server listening");
        Ok(BoundFrontDoor {
            listener,
            local_addr,
            handler: Arc::new(Handler {
                store: self.store,
                server: self.server,
                request_timeout: self.request_timeout,
                max_body_bytes: self.max_body_bytes,
            }),
        })
    }
}

pub struct BoundFrontDoor {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<Handler>,
}

impl BoundFrontDoor {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until the shutdown signal flips.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = accepted.context("accept failed")?;
                    let handler = self.handler.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let svc = service_fn(move |req: Request<Incoming>| {
                            let handler = handler.clone();
                            async move {
                                Ok::<_, std::convert::Infallible>(handler.handle(req).await)
                            }
                        });

                        if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                            debug!(%peer_addr, %err, "connection error");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("wasm server shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

struct Handler {
    store: Arc<dyn AppStore>,
    server: Addr<ServerMessage>,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl Handler {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        // Every response carries the request id, error paths included.
        let request_id = Uuid::new_v4();
        let (parts, body) = req.into_parts();

        let path = parts.uri.path().trim_start_matches('/');
        let (id_part, rest) = match path.split_once('/') {
            Some((id, rest)) => (id, rest),
            None => (path, ""),
        };
        if id_part.is_empty() {
            return text_response(StatusCode::BAD_REQUEST, request_id, "invalid application id given");
        }
        let app_id = match Uuid::parse_str(id_part) {
            Ok(id) => id,
            Err(err) => return text_response(StatusCode::BAD_REQUEST, request_id, err.to_string()),
        };

        let app = match self.store.get_app(app_id).await {
            Ok(app) => app,
            Err(err) if err.is_not_found() => {
                return text_response(StatusCode::NOT_FOUND, request_id, err.to_string());
            }
            Err(err) => {
                warn!(%err, app = %app_id, "store lookup failed");
                return text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    request_id,
                    "internal server error",
                );
            }
        };
        if !app.has_active_deploy() {
            return text_response(StatusCode::NOT_FOUND, request_id, "no active deploy");
        }

        let body = match Limited::new(body, self.max_body_bytes).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                return if err.downcast_ref::<LengthLimitError>().is_some() {
                    text_response(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        request_id,
                        "request body too large",
                    )
                } else {
                    text_response(
                        StatusCode::BAD_REQUEST,
                        request_id,
                        "failed to read request body",
                    )
                };
            }
        };

        let request = InvocationRequest {
            id: request_id,
            endpoint_id: app_id,
            active_deploy_id: app.active_deploy_id(),
            runtime: app.runtime(),
            method: parts.method.to_string(),
            url: format!("/{rest}"),
            body,
            env: app.env().clone(),
            preview: parts.headers.contains_key("x-preview"),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .server
            .send(ServerMessage::Invocation {
                request,
                reply: reply_tx,
            })
            .await;
        if sent.is_err() {
            return text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                request_id,
                "wasm server unavailable",
            );
        }

        let response = match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    request_id,
                    "internal server error",
                );
            }
            Err(_) => {
                // The runtime may still finish; its late response is
                // dropped once the entry is gone.
                warn!(request = %request_id, "invocation timed out");
                let _ = self.server.send(ServerMessage::Abandon { request_id }).await;
                return text_response(StatusCode::GATEWAY_TIMEOUT, request_id, "request timed out");
            }
        };

        let status = u16::try_from(response.status_code)
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Response::builder()
            .status(status)
            .header("x-request-id", request_id.to_string())
            .body(Full::new(response.response))
            .unwrap()
    }
}

fn text_response(
    status: StatusCode,
    request_id: Uuid,
    body: impl Into<String>,
) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("x-request-id", request_id.to_string())
        .body(Full::new(Bytes::from(body.into())))
        .unwrap()
}
