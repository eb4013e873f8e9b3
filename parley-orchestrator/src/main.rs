use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod config;
mod routes;

use config::AppConfig;
use parley_shared::bus::{AmqpBus, FailoverBus, MessageBus, RedisPubSubBus};
use parley_shared::coordination::{MeetingCoordinator, ResourceSelector, SignalingSelector};
use parley_shared::store::{RedisStore, StateStore};

pub struct AppState {
    pub config: AppConfig,
    pub redis: RedisStore,
    pub amqp: Option<AmqpBus>,
    pub coordinator: MeetingCoordinator,
    pub router_selector: ResourceSelector,
    pub signaling_selector: SignalingSelector,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parley_shared::middleware::init_tracing("parley-orchestrator");

    let config = AppConfig::load()?;
    let port = config.port;

    // No state store, no service: this is the one startup-time fatal.
    let redis = RedisStore::connect(&config.redis_url).await?;
    let store: Arc<dyn StateStore> = Arc::new(redis.clone());

    // The bus is not fatal: commands degrade to the state store's pub/sub
    // until the broker comes back.
    let fallback = Arc::new(RedisPubSubBus::new(store.clone()));
    let (amqp, bus): (Option<AmqpBus>, Arc<dyn MessageBus>) =
        match AmqpBus::connect(&config.amqp_url).await {
            Ok(amqp) => (
                Some(amqp.clone()),
                Arc::new(FailoverBus::new(Arc::new(amqp), fallback)),
            ),
            Err(err) => {
                tracing::warn!(error = %err, "AMQP unavailable, relaying over fallback channels only");
                (None, fallback)
            }
        };

    let state = Arc::new(AppState {
        redis,
        amqp,
        coordinator: MeetingCoordinator::new(store.clone(), bus),
        router_selector: ResourceSelector::new(store.clone()),
        signaling_selector: SignalingSelector::new(store.clone(), config.signaling_urls()),
        config,
    });

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/meeting/create", post(routes::meeting::create_meeting))
        .route("/meeting/join", post(routes::meeting::join_meeting))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "parley-orchestrator starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
