//! Periodic self-reporting into the resource registry. The orchestrator's
//! selector prefers whichever instance last reported the lowest client
//! count; an instance that stops reporting ages out of selection.

use std::sync::Arc;
use std::time::Duration;

use parley_shared::coordination::{signaling_server_id, ResourceKind, ResourceRegistry};
use parley_shared::store::{keys, StateStore, StoreResult};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

pub fn spawn(state: Arc<crate::AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let url = state.config.external_ws_url.clone();
        let instance_id = signaling_server_id(&url);
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            let connected = state.sessions.client_count() as u64;
            if let Err(err) =
                report(&state.store, &state.registry, &instance_id, &url, connected).await
            {
                tracing::warn!(error = %err, "signaling heartbeat failed");
            }
        }
    })
}

/// One heartbeat: refresh candidacy, load and freshness. The URL rides
/// along in the metrics hash so operators can map ids back to addresses.
pub(crate) async fn report(
    store: &Arc<dyn StateStore>,
    registry: &ResourceRegistry,
    instance_id: &str,
    url: &str,
    connected_clients: u64,
) -> StoreResult<()> {
    store
        .set_add(keys::AVAILABLE_SIGNALING_SERVERS, url)
        .await?;
    registry
        .heartbeat(ResourceKind::Signaling, instance_id, connected_clients)
        .await?;
    store
        .hash_set(&keys::signaling_metrics(instance_id), &[("url", url.to_owned())])
        .await?;
    Ok(())
}
