use std::sync::Arc;

use async_trait::async_trait;

use super::{BusError, MessageBus, RelayMessage};
use crate::store::{keys, StateStore};

/// Degraded relay path over the state store's pub/sub mechanism. Payloads
/// are identical to the primary bus; only the channel naming
/// (`fallback:{topic}:{key}`) and the ordering guarantee differ.
pub struct RedisPubSubBus {
    store: Arc<dyn StateStore>,
}

impl RedisPubSubBus {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageBus for RedisPubSubBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        message: &RelayMessage,
    ) -> Result<(), BusError> {
        let payload = serde_json::to_string(message)?;
        let channel = keys::fallback_channel(topic, key);
        self.store.publish(&channel, &payload).await?;
        tracing::debug!(channel = %channel, "bus message published on fallback channel");
        Ok(())
    }
}
