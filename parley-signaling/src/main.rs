use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod config;
mod health;
mod heartbeat;
mod relay;
mod session;

use config::AppConfig;
use parley_shared::bus::{AmqpBus, FailoverBus, MessageBus, RedisPubSubBus};
use parley_shared::coordination::{MeetingCoordinator, ResourceRegistry};
use parley_shared::store::{RedisStore, StateStore};
use session::SessionRegistry;

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn StateStore>,
    pub amqp: Option<AmqpBus>,
    pub bus: Arc<dyn MessageBus>,
    pub coordinator: MeetingCoordinator,
    pub registry: ResourceRegistry,
    pub sessions: SessionRegistry,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parley_shared::middleware::init_tracing("parley-signaling");

    let config = AppConfig::load()?;
    let port = config.port;

    // No state store, no service: this is the one startup-time fatal.
    let redis = RedisStore::connect(&config.redis_url).await?;
    let store: Arc<dyn StateStore> = Arc::new(redis);

    // The bus is not fatal: relaying degrades to the state store's pub/sub
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
        store: store.clone(),
        amqp,
        bus: bus.clone(),
        coordinator: MeetingCoordinator::new(store.clone(), bus),
        registry: ResourceRegistry::new(store),
        sessions: SessionRegistry::new(),
        config,
    });

    relay::spawn_consumers(state.clone());
    heartbeat::spawn(state.clone());

    let app = Router::new()
        .route("/health", get(health::health_check))
        .route("/ws", get(session::handler::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "parley-signaling starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
