//! Operator-facing stats assembly: the metrics snapshot plus session
//! store occupancy and name-cache health, shared by the stats endpoint
//! and the in-conversation stats node.

use serde::Serialize;

use hc_backend::{NameCache, NameCacheStats};
use hc_domain::metrics::{Metrics, MetricsSnapshot};
use hc_sessions::{SessionStore, StoreStats};

#[derive(Debug, Clone, Serialize)]
pub struct OperatorStats {
    pub metrics: MetricsSnapshot,
    pub store: StoreStats,
    pub name_cache: NameCacheStats,
}

pub async fn gather(
    metrics: &Metrics,
    store: &dyn SessionStore,
    cache: &NameCache,
) -> OperatorStats {
    OperatorStats {
        metrics: metrics.snapshot(),
        store: store.stats().await,
        name_cache: cache.stats(),
    }
}
