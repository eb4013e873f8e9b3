use async_trait::async_trait;

pub mod amqp;
pub mod failover;
pub mod message;
pub mod redis_pubsub;

pub use amqp::AmqpBus;
pub use failover::FailoverBus;
pub use message::{topics, RelayMessage};
pub use redis_pubsub::RedisPubSubBus;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("bus publish timed out")]
    Timeout,

    #[error("fallback publish failed: {0}")]
    Fallback(#[from] crate::store::StoreError),

    #[error("message serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// At-least-once publish transport between signaling instances and media
/// routers. Messages on one topic are ordered per key (router id or
/// meeting id) on the primary implementation; the fallback path relaxes
/// that to best-effort.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, message: &RelayMessage)
        -> Result<(), BusError>;
}
