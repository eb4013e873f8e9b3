use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use parley_shared::types::{HealthCheck, HealthResponse, HealthStatus};

use crate::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store_check = match state.store.ping().await {
        Ok(()) => HealthCheck {
            name: "redis".into(),
            status: HealthStatus::Healthy,
            message: None,
        },
        Err(err) => HealthCheck {
            name: "redis".into(),
            status: HealthStatus::Unhealthy,
            message: Some(err.to_string()),
        },
    };

    let bus_check = match &state.amqp {
        Some(amqp) if amqp.is_connected() => HealthCheck {
            name: "amqp".into(),
            status: HealthStatus::Healthy,
            message: None,
        },
        _ => HealthCheck {
            name: "amqp".into(),
            status: HealthStatus::Degraded,
            message: Some("relaying over state-store pub/sub fallback".into()),
        },
    };

    let sessions_check = HealthCheck {
        name: "sessions".into(),
        status: HealthStatus::Healthy,
        message: Some(format!(
            "{} clients, {} SFUs",
            state.sessions.client_count(),
            state.sessions.sfu_count()
        )),
    };

    Json(
        HealthResponse::healthy("parley-signaling", env!("CARGO_PKG_VERSION"))
            .with_checks(vec![store_check, bus_check, sessions_check]),
    )
}
