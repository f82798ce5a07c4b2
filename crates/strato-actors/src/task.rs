//! Task runtime actor: one actor per running task, driven by a
//! repeating self-tick.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use strato_cluster::{Actor, Cluster, Context, Repeater};
use strato_core::{App, RuntimeMetric, Task, TaskMetric};
use strato_runtime::{CacheEntry, InvokeArgs, ModuleCache, SandboxLimits, invoke};
use strato_store::AppStore;

use crate::METRIC_SINK_NAME;
use crate::messages::{ServerMessage, StartStopResponse, TaskMessage};

pub struct TaskRuntime {
    store: Arc<dyn AppStore>,
    cache: Arc<ModuleCache>,
    cluster: Arc<Cluster>,
    limits: SandboxLimits,
    task: Option<Task>,
    repeater: Option<Repeater>,
}

impl TaskRuntime {
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
            task: None,
            repeater: None,
        }
    }

    /// Load the task and install the tick schedule.
    async fn start(&mut self, id: Uuid, ctx: &Context<TaskMessage>) -> anyhow::Result<()> {
        let app = self.store.get_app(id).await?;
        let App::Task(task) = app else {
            bail!("app {id} is not a task");
        };
        if task.interval_secs <= 0 {
            bail!("task {id} has a non-positive interval ({})", task.interval_secs);
        }

        let period = Duration::from_secs(task.interval_secs as u64);
        self.repeater = Some(ctx.send_repeat(TaskMessage::Tick, period));
        self.task = Some(task);
        Ok(())
    }

    /// One tick: run the task's active deploy to completion.
    async fn tick(&self) {
        let Some(task) = &self.task else {
            return;
        };
        if task.active_deploy_id.is_nil() {
            warn!(task = %task.id, "tick skipped, task has no active deploy");
            return;
        }

        let deploy = match self.store.get_deploy(task.active_deploy_id).await {
            Ok(deploy) => deploy,
            Err(err) => {
                warn!(%err, task = %task.id, "could not load the task's active deploy");
                return;
            }
        };

        let entry = match self.cache.get(task.id) {
            Some(entry) => entry,
            None => {
                debug!(task = %task.id, "no cache hit");
                match CacheEntry::new() {
                    Ok(entry) => Arc::new(entry),
                    Err(err) => {
                        warn!(%err, "could not build compilation cache entry");
                        return;
                    }
                }
            }
        };

        let start_time = Utc::now();
        let outcome = invoke(InvokeArgs {
            blob: deploy.blob().clone(),
            runtime: task.runtime,
            env: task.env.clone(),
            cache: Arc::clone(&entry),
            input: Bytes::new(),
            bridge: None,
            limits: self.limits.clone(),
        })
        .await;
        self.cache.put(task.id, entry);

        match outcome {
            Ok(output) => {
                if !output.stdout.is_empty() {
                    debug!(
                        task = %task.id,
                        stdout = %String::from_utf8_lossy(&output.stdout),
                        "task tick output"
                    );
                }
            }
            Err(err) => warn!(%err, task = %task.id, "task tick failed"),
        }

        let metric = RuntimeMetric::Task(TaskMetric {
            id: Uuid::new_v4(),
            task_id: task.id,
            deploy_id: task.active_deploy_id,
            start_time,
            duration: (Utc::now() - start_time).to_std().unwrap_or_default(),
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
impl Actor for TaskRuntime {
    type Msg = TaskMessage;

    async fn handle(&mut self, ctx: &mut Context<TaskMessage>, msg: TaskMessage) {
        match msg {
            TaskMessage::Start { command, reply_to } => {
                let ack = match self.start(command.id, ctx).await {
                    Ok(()) => StartStopResponse::ok(command.id, command.request_id),
                    Err(err) => {
                        warn!(%err, task = %command.id, "task start failed");
                        ctx.poison();
                        StartStopResponse::error(command.id, command.request_id, err)
                    }
                };
                if reply_to.send(ServerMessage::StartStop(ack)).await.is_err() {
                    debug!("front door gone before the start ack arrived");
                }
            }

            TaskMessage::Tick => self.tick().await,

            TaskMessage::Stop { command, reply_to } => {
                if let Some(repeater) = self.repeater.take() {
                    repeater.cancel();
                }
                let ack = StartStopResponse::ok(command.id, command.request_id);
                if reply_to.send(ServerMessage::StartStop(ack)).await.is_err() {
                    debug!("front door gone before the stop ack arrived");
                }
                ctx.poison();
            }
        }
    }
}
