//! In-memory store implementations.
//!
//! Default driver for single-node runs and the fixture for tests. All
//! mutations serialise through one write lock, which is also where the
//! rollback invalidation hook fires: a cached compiled module is dropped
//! before the new active deploy becomes visible to readers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use strato_core::{App, AppUpdate, Deploy, RuntimeMetric};

use crate::error::{StoreError, StoreResult};
use crate::store::{AppStore, MetricStore};

/// Called with the app id when an update switches its active deploy.
pub type RollbackHook = Arc<dyn Fn(Uuid) + Send + Sync>;

pub struct MemoryStore {
    inner: RwLock<Inner>,
    on_rollback: Option<RollbackHook>,
}

#[derive(Default)]
struct Inner {
    apps: HashMap<Uuid, App>,
    deploys: HashMap<Uuid, Deploy>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            on_rollback: None,
        }
    }

    /// Install the invalidation hook invoked under the write lock before
    /// an active-deploy switch becomes visible.
    pub fn with_rollback_hook(mut self, hook: RollbackHook) -> Self {
        self.on_rollback = Some(hook);
        self
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_env(target: &mut HashMap<String, String>, env: Option<HashMap<String, String>>) {
    if let Some(env) = env {
        target.extend(env);
    }
}

#[async_trait]
impl AppStore for MemoryStore {
    async fn create_app(&self, app: App) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let id = app.id();
        if inner.apps.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        inner.apps.insert(id, app);
        Ok(())
    }

    async fn update_app(&self, id: Uuid, params: AppUpdate) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let app = inner
            .apps
            .get_mut(&id)
            .ok_or_else(|| StoreError::app_not_found(id))?;

        if app.app_type() != params.app_type() {
            return Err(StoreError::KindMismatch {
                id,
                expected: params.app_type().as_str(),
                actual: app.app_type().as_str(),
            });
        }

        // Invalidate cached modules before the switch becomes readable.
        if let Some(new_active) = params.active_deploy_id() {
            if new_active != app.active_deploy_id() {
                if let Some(hook) = &self.on_rollback {
                    hook(id);
                }
                debug!(app = %id, deploy = %new_active, "active deploy switched");
            }
        }

        match (app, params) {
            (App::Endpoint(e), AppUpdate::Endpoint(p)) => {
                merge_env(&mut e.env, p.env);
                if let Some(active) = p.active_deploy_id {
                    e.active_deploy_id = active;
                }
                e.deploy_history.extend(p.deploys);
            }
            (App::Task(t), AppUpdate::Task(p)) => {
                merge_env(&mut t.env, p.env);
                if let Some(active) = p.active_deploy_id {
                    t.active_deploy_id = active;
                }
                t.deploy_history.extend(p.deploys);
                if let Some(interval) = p.interval_secs {
                    t.interval_secs = interval;
                }
            }
            (App::Process(pr), AppUpdate::Process(p)) => {
                merge_env(&mut pr.env, p.env);
                if let Some(active) = p.active_deploy_id {
                    pr.active_deploy_id = active;
                }
                pr.deploy_history.extend(p.deploys);
            }
            // Kind equality was checked above.
            _ => unreachable!("app/update kind mismatch after check"),
        }

        Ok(())
    }

    async fn get_app(&self, id: Uuid) -> StoreResult<App> {
        let inner = self.inner.read().await;
        inner
            .apps
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::app_not_found(id))
    }

    async fn get_apps(&self) -> StoreResult<Vec<App>> {
        let inner = self.inner.read().await;
        Ok(inner.apps.values().cloned().collect())
    }

    async fn create_deploy(&self, deploy: Deploy) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.deploys.insert(deploy.id(), deploy);
        Ok(())
    }

    async fn get_deploy(&self, id: Uuid) -> StoreResult<Deploy> {
        let inner = self.inner.read().await;
        inner
            .deploys
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::deploy_not_found(id))
    }
}

#[derive(Default)]
pub struct MemoryMetricStore {
    metrics: RwLock<HashMap<Uuid, Vec<RuntimeMetric>>>,
}

impl MemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricStore for MemoryMetricStore {
    async fn create_metric(&self, metric: RuntimeMetric) -> StoreResult<()> {
        let mut metrics = self.metrics.write().await;
        metrics.entry(metric.app_id()).or_default().push(metric);
        Ok(())
    }

    async fn get_metrics(&self, app_id: Uuid) -> StoreResult<Vec<RuntimeMetric>> {
        let metrics = self.metrics.read().await;
        metrics
            .get(&app_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: "metrics",
                id: app_id,
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use strato_core::{
        Endpoint, EndpointMetric, EndpointUpdate, RuntimeKind, Task, TaskUpdate,
    };

    use super::*;

    fn endpoint_app() -> App {
        App::Endpoint(Endpoint::new("api", RuntimeKind::Go, HashMap::new()))
    }

    #[tokio::test]
    async fn app_create_and_get() {
        let store = MemoryStore::new();
        let app = endpoint_app();
        let id = app.id();

        store.create_app(app.clone()).await.unwrap();
        let got = store.get_app(id).await.unwrap();
        assert_eq!(got, app);
    }

    #[tokio::test]
    async fn create_duplicate_app_fails() {
        let store = MemoryStore::new();
        let app = endpoint_app();
        store.create_app(app.clone()).await.unwrap();
        assert!(matches!(
            store.create_app(app).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn get_missing_app_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get_app(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn update_merges_env_and_appends_history() {
        let store = MemoryStore::new();
        let mut env = HashMap::new();
        env.insert("A".to_string(), "1".to_string());
        let app = App::Endpoint(Endpoint::new("api", RuntimeKind::Go, env));
        let id = app.id();
        store.create_app(app).await.unwrap();

        let deploy_id = Uuid::new_v4();
        let mut new_env = HashMap::new();
        new_env.insert("B".to_string(), "2".to_string());
        store
            .update_app(
                id,
                AppUpdate::Endpoint(EndpointUpdate {
                    env: Some(new_env),
                    active_deploy_id: Some(deploy_id),
                    deploys: vec![deploy_id],
                }),
            )
            .await
            .unwrap();

        let got = store.get_app(id).await.unwrap();
        assert_eq!(got.env().get("A").map(String::as_str), Some("1"));
        assert_eq!(got.env().get("B").map(String::as_str), Some("2"));
        assert_eq!(got.active_deploy_id(), deploy_id);
        assert_eq!(got.deploy_history(), &[deploy_id]);
    }

    #[tokio::test]
    async fn update_with_wrong_kind_fails() {
        let store = MemoryStore::new();
        let app = endpoint_app();
        let id = app.id();
        store.create_app(app).await.unwrap();

        let err = store
            .update_app(id, AppUpdate::Task(TaskUpdate::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::KindMismatch { .. }));
    }

    #[tokio::test]
    async fn task_interval_updates() {
        let store = MemoryStore::new();
        let app = App::Task(Task::new("t", RuntimeKind::Go, 10, HashMap::new()));
        let id = app.id();
        store.create_app(app).await.unwrap();

        store
            .update_app(
                id,
                AppUpdate::Task(TaskUpdate {
                    interval_secs: Some(30),
                    ..TaskUpdate::default()
                }),
            )
            .await
            .unwrap();

        match store.get_app(id).await.unwrap() {
            App::Task(t) => assert_eq!(t.interval_secs, 30),
            other => panic!("expected task, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rollback_hook_fires_only_on_active_deploy_change() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let store = MemoryStore::new()
            .with_rollback_hook(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

        let app = endpoint_app();
        let id = app.id();
        store.create_app(app).await.unwrap();

        // Env-only update: no invalidation.
        store
            .update_app(
                id,
                AppUpdate::Endpoint(EndpointUpdate {
                    env: Some(HashMap::new()),
                    ..EndpointUpdate::default()
                }),
            )
            .await
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Deploy switch: invalidation fires once.
        store
            .update_app(
                id,
                AppUpdate::Endpoint(EndpointUpdate {
                    active_deploy_id: Some(Uuid::new_v4()),
                    ..EndpointUpdate::default()
                }),
            )
            .await
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deploy_create_and_get() {
        let store = MemoryStore::new();
        let app = endpoint_app();
        let deploy = Deploy::for_app(&app, Bytes::from_static(b"\0asm"));
        let deploy_id = deploy.id();

        store.create_deploy(deploy.clone()).await.unwrap();
        assert_eq!(store.get_deploy(deploy_id).await.unwrap(), deploy);

        let err = store.get_deploy(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn metrics_append_per_app() {
        let store = MemoryMetricStore::new();
        let endpoint_id = Uuid::new_v4();

        for status in [200, 404] {
            store
                .create_metric(RuntimeMetric::Endpoint(EndpointMetric {
                    id: Uuid::new_v4(),
                    endpoint_id,
                    deploy_id: Uuid::new_v4(),
                    request_url: "/".to_string(),
                    status_code: status,
                    start_time: chrono::Utc::now(),
                    duration: std::time::Duration::from_millis(3),
                }))
                .await
                .unwrap();
        }

        let metrics = store.get_metrics(endpoint_id).await.unwrap();
        assert_eq!(metrics.len(), 2);

        assert!(store.get_metrics(Uuid::new_v4()).await.is_err());
    }
}
