use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::registry::{ResourceKind, ResourceMetrics, ResourceRegistry};
use super::CoordinationError;
use crate::store::{keys, StateStore};

/// Maximum heartbeat age before a resource is treated as stale. Resources
/// heartbeat every 5s, so this allows two missed beats plus slack.
pub const FRESHNESS_WINDOW_MS: i64 = 15_000;

/// Picks the least-loaded healthy router out of the dynamic registry,
/// evicting stale candidates as a side effect of each pass.
#[derive(Clone)]
pub struct ResourceSelector {
    store: Arc<dyn StateStore>,
    registry: ResourceRegistry,
}

impl ResourceSelector {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            registry: ResourceRegistry::new(store.clone()),
            store,
        }
    }

    pub async fn select_router(&self) -> Result<String, CoordinationError> {
        let candidates = self.registry.available(ResourceKind::Router).await?;
        self.select_least_loaded(ResourceKind::Router, &candidates)
            .await
    }

    /// Ties between equally-loaded candidates break by iteration order
    /// (first encountered); set iteration order is not defined, which is
    /// an accepted non-determinism.
    pub async fn select_least_loaded(
        &self,
        kind: ResourceKind,
        candidates: &[String],
    ) -> Result<String, CoordinationError> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut best: Option<(&String, u64)> = None;

        for candidate in candidates {
            let metrics = self.registry.metrics(kind, candidate).await?;

            if is_stale(&metrics, now) {
                tracing::warn!(
                    %kind,
                    id = %candidate,
                    last_heartbeat = metrics.last_heartbeat_ms,
                    "stale resource evicted from available set"
                );
                self.store.set_remove(kind.available_set(), candidate).await?;
                self.store.delete(&kind.metrics_key(candidate)).await?;
                continue;
            }

            match best {
                Some((_, load)) if metrics.connected_clients >= load => {}
                _ => best = Some((candidate, metrics.connected_clients)),
            }
        }

        best.map(|(id, _)| id.clone())
            .ok_or(CoordinationError::NoHealthyResource(kind))
    }
}

fn is_stale(metrics: &ResourceMetrics, now_ms: i64) -> bool {
    now_ms - metrics.last_heartbeat_ms >= FRESHNESS_WINDOW_MS
}

/// Selects among the statically configured signaling-server addresses.
/// The fleet may be configured before any instance has reported a
/// heartbeat, so the precedence rule is: any candidate with a fresh report
/// wins by least load; only when zero candidates report fresh metrics does
/// selection fall back to round-robin over the static list.
pub struct SignalingSelector {
    store: Arc<dyn StateStore>,
    candidates: Vec<String>,
    next_index: AtomicUsize,
}

impl SignalingSelector {
    pub fn new(store: Arc<dyn StateStore>, candidates: Vec<String>) -> Self {
        Self {
            store,
            candidates,
            next_index: AtomicUsize::new(0),
        }
    }

    pub async fn select(&self) -> Result<String, CoordinationError> {
        if self.candidates.is_empty() {
            return Err(CoordinationError::NoHealthyResource(
                ResourceKind::Signaling,
            ));
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut best: Option<(&String, u64)> = None;

        for url in &self.candidates {
            let metrics_key = keys::signaling_metrics(&signaling_server_id(url));
            let hash = self.store.hash_get_all(&metrics_key).await?;
            let metrics = ResourceMetrics::from_hash(&hash);

            if is_stale(&metrics, now) {
                // The static list is configuration, not registry state;
                // only the health-reporting set membership is dropped.
                self.store
                    .set_remove(keys::AVAILABLE_SIGNALING_SERVERS, url)
                    .await?;
                continue;
            }

            match best {
                Some((_, load)) if metrics.connected_clients >= load => {}
                _ => best = Some((url, metrics.connected_clients)),
            }
        }

        if let Some((url, _)) = best {
            return Ok(url.clone());
        }

        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let url = &self.candidates[index % self.candidates.len()];
        tracing::warn!(
            url = %url,
            "no signaling server reported fresh metrics, falling back to round-robin"
        );
        Ok(url.clone())
    }
}

/// Metrics id for a signaling URL: the host:port with the scheme dropped.
pub fn signaling_server_id(url: &str) -> String {
    url.trim_start_matches("wss://")
        .trim_start_matches("ws://")
        .trim_end_matches('/')
        .to_owned()
}
