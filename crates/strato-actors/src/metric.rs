//! Metric sink: best-effort persistence of runtime metrics.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use strato_cluster::{Actor, Context};
use strato_core::RuntimeMetric;
use strato_store::MetricStore;

/// Receives one-shot [`RuntimeMetric`] messages and forwards them to the
/// metric store. Failures are logged and dropped.
pub struct MetricSink {
    store: Arc<dyn MetricStore>,
}

impl MetricSink {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Actor for MetricSink {
    type Msg = RuntimeMetric;

    async fn handle(&mut self, _ctx: &mut Context<RuntimeMetric>, metric: RuntimeMetric) {
        if let Err(err) = self.store.create_metric(metric).await {
            warn!(%err, "failed to persist runtime metric, dropping it");
        }
    }
}
