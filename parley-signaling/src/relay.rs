//! Inbound side of the relay: consumes `router_commands` and
//! `meeting_events` traffic from the bus (and the degraded pub/sub
//! channels) and delivers it to the WebSocket sessions this instance owns.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::options::BasicAckOptions;

use parley_shared::bus::message::topics;
use parley_shared::bus::{AmqpBus, RelayMessage};
use parley_shared::coordination::signaling_server_id;
use parley_shared::store::keys;
use parley_shared::types::{Envelope, MessageKind, RouterId};

use crate::session::handler::send_to_local_participants;
use crate::AppState;

const FALLBACK_RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub fn spawn_consumers(state: Arc<AppState>) {
    if let Some(amqp) = state.amqp.clone() {
        let amqp_state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = consume_amqp(amqp_state, amqp).await {
                tracing::error!(error = %err, "AMQP consumer stopped");
            }
        });
    }

    // The fallback channels are consumed even while the broker is healthy:
    // another instance may already be degraded and publishing there.
    tokio::spawn(async move {
        loop {
            if let Err(err) = consume_fallback(&state).await {
                tracing::warn!(error = %err, "fallback consumer disconnected, retrying");
            }
            tokio::time::sleep(FALLBACK_RECONNECT_DELAY).await;
        }
    });
}

// ---------------------------------------------------------------------------
// Consumers
// ---------------------------------------------------------------------------

async fn consume_amqp(state: Arc<AppState>, amqp: AmqpBus) -> anyhow::Result<()> {
    let instance_id = signaling_server_id(&state.config.external_ws_url);
    let queue_name = format!("parley-signaling.{instance_id}");
    let mut consumer = amqp
        .subscribe(
            &queue_name,
            &[
                &format!("{}.*", topics::ROUTER_COMMANDS),
                &format!("{}.*", topics::MEETING_EVENTS),
            ],
        )
        .await?;

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(err) => {
                tracing::warn!(error = %err, "bad AMQP delivery");
                continue;
            }
        };

        if let Some((topic, key)) = delivery.routing_key.as_str().split_once('.') {
            match serde_json::from_slice::<RelayMessage>(&delivery.data) {
                Ok(message) => handle_relay(&state, topic, key, message).await,
                Err(err) => {
                    tracing::warn!(
                        routing_key = %delivery.routing_key,
                        error = %err,
                        "unparseable relay message"
                    );
                }
            }
        }

        if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
            tracing::warn!(error = %err, "failed to ack delivery");
        }
    }

    Ok(())
}

async fn consume_fallback(state: &Arc<AppState>) -> anyhow::Result<()> {
    let client = redis::Client::open(state.config.redis_url.as_str())?;
    let mut pubsub = client.get_async_connection().await?.into_pubsub();
    pubsub
        .psubscribe(keys::fallback_channel_pattern(topics::ROUTER_COMMANDS))
        .await?;
    pubsub
        .psubscribe(keys::fallback_channel_pattern(topics::MEETING_EVENTS))
        .await?;
    tracing::info!("subscribed to fallback relay channels");

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let channel = message.get_channel_name().to_owned();
        let Ok(payload) = message.get_payload::<String>() else {
            continue;
        };

        // Channel shape: fallback:{topic}:{key}
        let Some((topic, key)) = channel
            .strip_prefix("fallback:")
            .and_then(|rest| rest.split_once(':'))
        else {
            continue;
        };

        match serde_json::from_str::<RelayMessage>(&payload) {
            Ok(relay_message) => handle_relay(state, topic, key, relay_message).await,
            Err(err) => {
                tracing::warn!(channel = %channel, error = %err, "unparseable fallback message");
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Route one relayed message to the sessions held on this instance.
/// Traffic addressed to peers on other instances is ignored here; every
/// instance receives its own copy.
pub(crate) async fn handle_relay(state: &AppState, topic: &str, key: &str, message: RelayMessage) {
    match topic {
        topics::ROUTER_COMMANDS => {
            let router_id = RouterId::new(key);
            let Some(envelope) = to_envelope(&message) else {
                return;
            };
            if !state.sessions.send_to_sfu(&router_id, envelope) {
                tracing::debug!(router_id = %router_id, "router not connected here");
            }
        }
        topics::MEETING_EVENTS => match message {
            RelayMessage::SfuSignalToClient(payload) => {
                let target = payload.target_client_id.clone();
                if !state
                    .sessions
                    .send_to_client(&target, payload.into_client_envelope())
                {
                    tracing::warn!(
                        target_client_id = %target,
                        "dropping SFU signal for a client not connected here"
                    );
                }
            }
            RelayMessage::MeetingEvent(event) => {
                let envelope = Envelope {
                    kind: MessageKind::MeetingEvent,
                    payload: serde_json::json!({
                        "type": event.event_type,
                        "payload": event.event_data,
                    }),
                    sender_id: None,
                    meeting_id: Some(event.meeting_id.clone()),
                };
                send_to_local_participants(state, &event.meeting_id, envelope, None).await;
            }
            other => {
                tracing::debug!(message = ?other, "unexpected message on meeting_events");
            }
        },
        other => {
            tracing::debug!(topic = %other, "message on unknown topic");
        }
    }
}

/// Relay messages and WebSocket envelopes share the `{type, payload}` wire
/// shape, so a value round-trip is lossless.
fn to_envelope(message: &RelayMessage) -> Option<Envelope> {
    serde_json::to_value(message)
        .ok()
        .and_then(|value| serde_json::from_value(value).ok())
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use parley_shared::bus::message::{MeetingEventBroadcast, PrepareMeetingCommand, WebrtcSignal};
    use parley_shared::bus::{MessageBus, RedisPubSubBus};
    use parley_shared::coordination::{MeetingCoordinator, ResourceRegistry};
    use parley_shared::store::{MemoryStore, StateStore};
    use parley_shared::types::{ClientId, MeetingId, SignalKind};

    use super::*;
    use crate::config::AppConfig;
    use crate::session::SessionRegistry;

    fn state_with(store: Arc<MemoryStore>) -> AppState {
        let shared: Arc<dyn StateStore> = store;
        let bus = Arc::new(RedisPubSubBus::new(shared.clone()));
        AppState {
            config: AppConfig {
                port: 8080,
                external_ws_url: "ws://localhost:8080".into(),
                redis_url: String::new(),
                amqp_url: String::new(),
            },
            store: shared.clone(),
            amqp: None,
            bus: bus.clone(),
            coordinator: MeetingCoordinator::new(shared.clone(), bus),
            registry: ResourceRegistry::new(shared),
            sessions: SessionRegistry::new(),
        }
    }

    #[tokio::test]
    async fn router_commands_reach_a_locally_connected_sfu() {
        let store = Arc::new(MemoryStore::new());
        let state = state_with(store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.sessions.insert_sfu(RouterId::new("sfu-1"), tx);

        handle_relay(
            &state,
            topics::ROUTER_COMMANDS,
            "sfu-1",
            RelayMessage::WebrtcSignal(WebrtcSignal {
                kind: SignalKind::Offer,
                sdp: Some("v=0...".into()),
                candidate: None,
                sender_id: ClientId::new("client-a"),
                meeting_id: MeetingId::new("M1"),
            }),
        )
        .await;

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.kind, MessageKind::WebrtcSignal);
        assert_eq!(envelope.payload["type"], "offer");
        assert_eq!(envelope.payload["senderId"], "client-a");
    }

    #[tokio::test]
    async fn commands_for_remote_routers_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let state = state_with(store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.sessions.insert_sfu(RouterId::new("sfu-1"), tx);

        handle_relay(
            &state,
            topics::ROUTER_COMMANDS,
            "sfu-other",
            RelayMessage::PrepareMeeting(PrepareMeetingCommand {
                meeting_id: MeetingId::new("M1"),
            }),
        )
        .await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn meeting_events_fan_out_to_local_participants() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_add("meeting:M1:participants", "client-a")
            .await
            .unwrap();
        store
            .set_add("meeting:M1:participants", "client-b")
            .await
            .unwrap();
        let state = state_with(store);

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        state.sessions.insert_client(ClientId::new("client-a"), tx_a);
        // client-b is on another instance.

        handle_relay(
            &state,
            topics::MEETING_EVENTS,
            "M1",
            RelayMessage::MeetingEvent(MeetingEventBroadcast {
                meeting_id: MeetingId::new("M1"),
                event_type: "activeSpeaker".into(),
                event_data: serde_json::json!({"clientId": "client-b"}),
            }),
        )
        .await;

        let envelope = rx_a.try_recv().unwrap();
        assert_eq!(envelope.kind, MessageKind::MeetingEvent);
        assert_eq!(envelope.payload["type"], "activeSpeaker");
        assert_eq!(envelope.payload["payload"]["clientId"], "client-b");
    }

    #[tokio::test]
    async fn fallback_published_payloads_parse_back_into_relay_messages() {
        // A degraded publisher and this consumer must agree on the channel
        // name and payload shape.
        let store = Arc::new(MemoryStore::new());
        let shared: Arc<dyn StateStore> = store.clone();
        let bus = RedisPubSubBus::new(shared);
        bus.publish(
            topics::ROUTER_COMMANDS,
            "sfu-1",
            &RelayMessage::PrepareMeeting(PrepareMeetingCommand {
                meeting_id: MeetingId::new("M1"),
            }),
        )
        .await
        .unwrap();

        let published = store.published();
        assert_eq!(published.len(), 1);
        let (channel, payload) = &published[0];
        assert_eq!(channel, "fallback:router_commands:sfu-1");
        let parsed: RelayMessage = serde_json::from_str(payload).unwrap();
        assert!(matches!(parsed, RelayMessage::PrepareMeeting(_)));
    }
}
