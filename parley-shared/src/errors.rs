use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{service}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Meeting coordination errors
/// - E2xxx: Signaling errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    BadRequest,
    StoreTimeout,
    BusUnavailable,

    // Meeting coordination (E1xxx)
    NoHealthyRouter,
    NoHealthySignalingServer,
    MeetingNotFound,
    NotMeetingParticipant,

    // Signaling (E2xxx)
    NotRegistered,
    RouterNotAssigned,
    InvalidMessageFormat,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::BadRequest => "E0005",
            Self::StoreTimeout => "E0006",
            Self::BusUnavailable => "E0007",

            // Meeting coordination
            Self::NoHealthyRouter => "E1001",
            Self::NoHealthySignalingServer => "E1002",
            Self::MeetingNotFound => "E1003",
            Self::NotMeetingParticipant => "E1004",

            // Signaling
            Self::NotRegistered => "E2001",
            Self::RouterNotAssigned => "E2002",
            Self::InvalidMessageFormat => "E2003",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError | Self::BadRequest | Self::InvalidMessageFormat => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound | Self::MeetingNotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::NotRegistered => StatusCode::UNAUTHORIZED,
            Self::NotMeetingParticipant => StatusCode::FORBIDDEN,
            // Transient infrastructure failures and resource exhaustion are
            // all surfaced as retryable unavailability.
            Self::StoreTimeout
            | Self::BusUnavailable
            | Self::NoHealthyRouter
            | Self::NoHealthySignalingServer
            | Self::RouterNotAssigned => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether a client should expect the same request to succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreTimeout
                | Self::BusUnavailable
                | Self::NoHealthyRouter
                | Self::NoHealthySignalingServer
                | Self::RouterNotAssigned
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn unavailable(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Known { code, .. } => *code,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl From<crate::store::StoreError> for AppError {
    fn from(err: crate::store::StoreError) -> Self {
        match err {
            crate::store::StoreError::Timeout { .. } => Self::new(
                ErrorCode::StoreTimeout,
                "State store timed out. Please try again later.",
            ),
            other => {
                tracing::error!(error = %other, "state store failure");
                Self::new(ErrorCode::InternalError, "state store failure")
            }
        }
    }
}

impl From<crate::bus::BusError> for AppError {
    fn from(err: crate::bus::BusError) -> Self {
        tracing::error!(error = %err, "message bus failure");
        Self::new(
            ErrorCode::BusUnavailable,
            "Message bus unavailable. Please try again later.",
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known {
                code,
                message,
                details,
            } => {
                let status = code.status_code();
                let mut resp = ApiErrorResponse::new(code.code(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0001", "internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
