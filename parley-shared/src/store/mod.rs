use std::collections::HashMap;

use async_trait::async_trait;

pub mod keys;
pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store operation {operation} timed out")]
    Timeout { operation: &'static str },

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

impl From<crate::timeout::Elapsed> for StoreError {
    fn from(elapsed: crate::timeout::Elapsed) -> Self {
        Self::Timeout {
            operation: elapsed.operation,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key/value, hash, set and pub/sub operations against the shared state
/// store. Every component reaches the store through this trait so the
/// coordination logic runs unchanged against Redis in production and the
/// in-memory store in tests.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Liveness probe for health endpoints.
    async fn ping(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write `value` only if `key` is absent. Returns whether the write
    /// happened. This is the compare-and-set used to make meeting binding
    /// single-winner under concurrent first joins.
    async fn set_nx(&self, key: &str, value: &str) -> StoreResult<bool>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn hash_set(&self, key: &str, entries: &[(&str, String)]) -> StoreResult<()>;
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()>;
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;
    async fn set_len(&self, key: &str) -> StoreResult<u64>;

    /// Fire-and-forget pub/sub publish, used by the degraded relay path.
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()>;
}
