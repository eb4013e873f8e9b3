use std::sync::Arc;

use async_trait::async_trait;

use super::{BusError, MessageBus, RelayMessage};

/// Try the primary bus, fall back to the secondary on any failure. The
/// system stays functional with relaxed ordering guarantees while the
/// primary is down; every degradation is logged.
pub struct FailoverBus {
    primary: Arc<dyn MessageBus>,
    fallback: Arc<dyn MessageBus>,
}

impl FailoverBus {
    pub fn new(primary: Arc<dyn MessageBus>, fallback: Arc<dyn MessageBus>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl MessageBus for FailoverBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        message: &RelayMessage,
    ) -> Result<(), BusError> {
        match self.primary.publish(topic, key, message).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(
                    topic,
                    key,
                    error = %err,
                    "primary bus publish failed, degrading to fallback channel"
                );
                self.fallback.publish(topic, key, message).await
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FailingBus, RecordingBus};
    use super::*;
    use crate::bus::message::{topics, PrepareMeetingCommand};
    use crate::types::ids::MeetingId;

    fn prepare_message() -> RelayMessage {
        RelayMessage::PrepareMeeting(PrepareMeetingCommand {
            meeting_id: MeetingId::new("M1"),
        })
    }

    #[tokio::test]
    async fn healthy_primary_never_touches_the_fallback() {
        let primary = Arc::new(RecordingBus::default());
        let fallback = Arc::new(RecordingBus::default());
        let bus = FailoverBus::new(primary.clone(), fallback.clone());

        bus.publish(topics::ROUTER_COMMANDS, "sfu-1", &prepare_message())
            .await
            .unwrap();

        assert_eq!(primary.published().len(), 1);
        assert!(fallback.published().is_empty());
    }

    #[tokio::test]
    async fn failed_primary_republishes_the_identical_payload() {
        let fallback = Arc::new(RecordingBus::default());
        let bus = FailoverBus::new(Arc::new(FailingBus), fallback.clone());

        let message = prepare_message();
        bus.publish(topics::ROUTER_COMMANDS, "sfu-1", &message)
            .await
            .unwrap();

        let published = fallback.published();
        assert_eq!(published.len(), 1);
        let (topic, key, payload) = &published[0];
        assert_eq!(topic, topics::ROUTER_COMMANDS);
        assert_eq!(key, "sfu-1");
        assert_eq!(payload, &serde_json::to_string(&message).unwrap());
    }
}
