use std::future::Future;
use std::time::Duration;

/// Default bound for a single state-store round trip.
pub const STORE_OP_TIMEOUT: Duration = Duration::from_secs(3);

/// Default bound for a primary-bus publish before the fallback path kicks in.
pub const BUS_PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
#[error("{operation} timed out after {timeout:?}")]
pub struct Elapsed {
    pub operation: &'static str,
    pub timeout: Duration,
}

/// Race a future against a deadline. Every call that depends on the state
/// store or the bus goes through here; a timeout is a retryable failure,
/// never a hang and never a panic.
pub async fn with_timeout<F, T>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(value) => Ok(value),
        Err(_) => {
            tracing::warn!(operation, ?timeout, "operation timed out");
            Err(Elapsed { operation, timeout })
        }
    }
}
