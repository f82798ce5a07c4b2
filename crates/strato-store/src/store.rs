//! The storage contracts.

use async_trait::async_trait;
use uuid::Uuid;

use strato_core::{App, AppUpdate, Deploy, RuntimeMetric};

use crate::error::StoreResult;

/// App and deploy persistence. Implementations must be safe to share
/// across tasks.
#[async_trait]
pub trait AppStore: Send + Sync {
    async fn create_app(&self, app: App) -> StoreResult<()>;

    /// Apply update params to an existing app. Environments merge; the
    /// active deploy switches only when the params carry one; deploy ids
    /// append to the history.
    async fn update_app(&self, id: Uuid, params: AppUpdate) -> StoreResult<()>;

    async fn get_app(&self, id: Uuid) -> StoreResult<App>;

    async fn get_apps(&self) -> StoreResult<Vec<App>>;

    async fn create_deploy(&self, deploy: Deploy) -> StoreResult<()>;

    async fn get_deploy(&self, id: Uuid) -> StoreResult<Deploy>;
}

/// Runtime metric persistence. Best-effort: callers drop failures.
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn create_metric(&self, metric: RuntimeMetric) -> StoreResult<()>;

    /// All metrics recorded for an app, in insertion order.
    async fn get_metrics(&self, app_id: Uuid) -> StoreResult<Vec<RuntimeMetric>>;
}
