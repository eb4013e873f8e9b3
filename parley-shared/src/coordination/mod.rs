pub mod coordinator;
pub mod registry;
pub mod selector;

pub use coordinator::{MeetingBinding, MeetingCoordinator};
pub use registry::{ResourceKind, ResourceMetrics, ResourceRegistry};
pub use selector::{signaling_server_id, ResourceSelector, SignalingSelector, FRESHNESS_WINDOW_MS};

use crate::errors::{AppError, ErrorCode};
use crate::types::ids::MeetingId;

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    /// No candidate of the requested kind passed the freshness check.
    /// Retryable unavailability, never a crash.
    #[error("no healthy {0} available")]
    NoHealthyResource(ResourceKind),

    /// A client action needs the meeting's router before one is bound.
    #[error("no router assigned for meeting {0} yet")]
    RouterNotAssigned(MeetingId),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Bus(#[from] crate::bus::BusError),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<CoordinationError> for AppError {
    fn from(err: CoordinationError) -> Self {
        match err {
            CoordinationError::NoHealthyResource(ResourceKind::Router) => AppError::new(
                ErrorCode::NoHealthyRouter,
                "No available SFU found. Please try again later.",
            ),
            CoordinationError::NoHealthyResource(ResourceKind::Signaling) => AppError::new(
                ErrorCode::NoHealthySignalingServer,
                "No signaling server available. Please try again later.",
            ),
            CoordinationError::RouterNotAssigned(meeting_id) => AppError::new(
                ErrorCode::RouterNotAssigned,
                format!("Meeting {meeting_id} has no SFU assigned yet. Please try rejoining."),
            ),
            CoordinationError::Store(err) => err.into(),
            CoordinationError::Bus(err) => err.into(),
            CoordinationError::Serialize(err) => {
                AppError::internal(format!("serialization failed: {err}"))
            }
        }
    }
}
