use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use parley_shared::errors::AppResult;
use parley_shared::middleware::CallerIdentity;
use parley_shared::types::{
    ApiResponse, CreateMeetingRequest, JoinMeetingRequest, MeetingAssignment,
};

use crate::AppState;

// ---------------------------------------------------------------------------
// POST /meeting/create
// ---------------------------------------------------------------------------

pub async fn create_meeting(
    CallerIdentity(client_id): CallerIdentity,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateMeetingRequest>,
) -> AppResult<Json<ApiResponse<MeetingAssignment>>> {
    tracing::info!(
        client_id = %client_id,
        meeting_name = %payload.meeting_name,
        "creating meeting"
    );

    let (meeting_id, binding) = state
        .coordinator
        .join_or_create(
            &state.router_selector,
            &state.signaling_selector,
            None,
            &client_id,
        )
        .await?;

    Ok(Json(ApiResponse::ok_with_message(
        MeetingAssignment {
            meeting_id,
            meeting_name: Some(payload.meeting_name),
            sfu: binding.router_id,
            signaling_server: binding.signaling_url,
        },
        "Meeting created successfully",
    )))
}

// ---------------------------------------------------------------------------
// POST /meeting/join
// ---------------------------------------------------------------------------

pub async fn join_meeting(
    CallerIdentity(client_id): CallerIdentity,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<JoinMeetingRequest>,
) -> AppResult<Json<ApiResponse<MeetingAssignment>>> {
    tracing::info!(
        client_id = %client_id,
        meeting_id = %payload.meeting_id,
        "joining meeting"
    );

    let (meeting_id, binding) = state
        .coordinator
        .join_or_create(
            &state.router_selector,
            &state.signaling_selector,
            Some(payload.meeting_id),
            &client_id,
        )
        .await?;

    Ok(Json(ApiResponse::ok(MeetingAssignment {
        meeting_id,
        meeting_name: None,
        sfu: binding.router_id,
        signaling_server: binding.signaling_url,
    })))
}
