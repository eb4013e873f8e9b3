use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::store::{keys, StateStore, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Router,
    Signaling,
}

impl ResourceKind {
    pub fn available_set(&self) -> &'static str {
        match self {
            Self::Router => keys::AVAILABLE_ROUTERS,
            Self::Signaling => keys::AVAILABLE_SIGNALING_SERVERS,
        }
    }

    pub fn metrics_key(&self, id: &str) -> String {
        match self {
            Self::Router => keys::router_metrics(id),
            Self::Signaling => keys::signaling_metrics(id),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Router => "SFU",
            Self::Signaling => "signaling server",
        })
    }
}

/// Health/load record kept under `{kind}:{id}:metrics`.
#[derive(Debug, Clone, Default)]
pub struct ResourceMetrics {
    pub connected_clients: u64,
    pub last_heartbeat_ms: i64,
}

impl ResourceMetrics {
    /// Missing or unparseable fields degrade to zero, which reads as a
    /// heartbeat from the epoch and therefore as stale.
    pub fn from_hash(hash: &HashMap<String, String>) -> Self {
        Self {
            connected_clients: hash
                .get("connected_clients")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            last_heartbeat_ms: hash
                .get("last_heartbeat")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        }
    }
}

/// Tracks live router and signaling-instance identities through the shared
/// state store. Heartbeats are best-effort: a missed write simply ages the
/// record until the selector evicts it.
#[derive(Clone)]
pub struct ResourceRegistry {
    store: Arc<dyn StateStore>,
}

impl ResourceRegistry {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Idempotent: re-registering an existing id refreshes its record.
    pub async fn register(&self, kind: ResourceKind, id: &str) -> StoreResult<()> {
        self.store.set_add(kind.available_set(), id).await?;
        self.write_metrics(kind, id, 0).await?;
        tracing::info!(%kind, id, "resource registered");
        Ok(())
    }

    pub async fn heartbeat(
        &self,
        kind: ResourceKind,
        id: &str,
        connected_clients: u64,
    ) -> StoreResult<()> {
        self.write_metrics(kind, id, connected_clients).await
    }

    /// Invoked on an observed disconnect.
    pub async fn deregister(&self, kind: ResourceKind, id: &str) -> StoreResult<()> {
        self.store.set_remove(kind.available_set(), id).await?;
        self.store.delete(&kind.metrics_key(id)).await?;
        tracing::info!(%kind, id, "resource deregistered");
        Ok(())
    }

    pub async fn available(&self, kind: ResourceKind) -> StoreResult<Vec<String>> {
        self.store.set_members(kind.available_set()).await
    }

    pub async fn metrics(&self, kind: ResourceKind, id: &str) -> StoreResult<ResourceMetrics> {
        let hash = self.store.hash_get_all(&kind.metrics_key(id)).await?;
        Ok(ResourceMetrics::from_hash(&hash))
    }

    async fn write_metrics(
        &self,
        kind: ResourceKind,
        id: &str,
        connected_clients: u64,
    ) -> StoreResult<()> {
        self.store
            .hash_set(
                &kind.metrics_key(id),
                &[
                    ("status", "online".to_owned()),
                    ("connected_clients", connected_clients.to_string()),
                    (
                        "last_heartbeat",
                        chrono::Utc::now().timestamp_millis().to_string(),
                    ),
                ],
            )
            .await
    }
}
