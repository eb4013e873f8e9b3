use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use parley_shared::store::StateStore;
use parley_shared::types::{HealthCheck, HealthResponse, HealthStatus};

use crate::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store_check = match state.redis.ping().await {
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

    // A dead broker degrades (fallback channels still relay) rather than
    // failing the service.
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

    Json(
        HealthResponse::healthy("parley-orchestrator", env!("CARGO_PKG_VERSION"))
            .with_checks(vec![store_check, bus_check]),
    )
}
