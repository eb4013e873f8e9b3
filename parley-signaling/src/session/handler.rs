use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use parley_shared::bus::message::{topics, MeetingEventBroadcast, WebrtcSignal};
use parley_shared::bus::RelayMessage;
use parley_shared::coordination::{CoordinationError, ResourceKind};
use parley_shared::store::keys;
use parley_shared::types::{
    ChatPayload, ClientId, Envelope, JoinMeetingPayload, LeaveMeetingPayload, MeetingEventData,
    MeetingEventKind, MeetingEventPayload, MeetingId, MeetingJoinedPayload, MessageKind, PeerRole,
    PresenceStatus, RegisterPayload, RouterId, SfuMeetingEventPayload, SfuSignalPayload,
    SignalKind, SignalPayload,
};

use super::{Peer, Session};
use crate::AppState;

// ---------------------------------------------------------------------------
// Socket lifecycle
// ---------------------------------------------------------------------------

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut inbox) = mpsc::unbounded_channel::<Envelope>();

    // Writer task: the session and broadcast paths only ever queue
    // envelopes, so a slow socket cannot block a dispatch.
    let writer = tokio::spawn(async move {
        while let Some(envelope) = inbox.recv().await {
            let Ok(text) = serde_json::to_string(&envelope) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(outbound);
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => handle_text(&state, &mut session, &text).await,
            Ok(Message::Close(_)) | Err(_) => break,
            // Pings are answered by the protocol layer; binary is not part
            // of the protocol.
            Ok(_) => {}
        }
    }

    cleanup(&state, &mut session).await;
    writer.abort();
}

pub(crate) async fn handle_text(state: &AppState, session: &mut Session, text: &str) {
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => dispatch(state, session, envelope).await,
        Err(err) => {
            tracing::warn!(error = %err, "unparseable websocket message");
            session.send(Envelope::error("Invalid message format."));
        }
    }
}

/// Disconnect teardown. A client still in a meeting leaves it (with the
/// same notifications as an explicit `leaveMeeting`); an SFU is withdrawn
/// from the resource registry so the selector stops placing meetings on it.
pub(crate) async fn cleanup(state: &AppState, session: &mut Session) {
    match session.peer.clone() {
        Some(Peer::Client(client_id)) => {
            if let Some(meeting_id) = session.meeting.take() {
                leave_meeting(state, session, &client_id, &meeting_id).await;
            } else if let Err(err) = state
                .store
                .hash_set(
                    &keys::presence(&client_id),
                    &[
                        ("status", PresenceStatus::Offline.as_str().to_owned()),
                        ("current_meeting_id", String::new()),
                    ],
                )
                .await
            {
                tracing::warn!(client_id = %client_id, error = %err, "failed to clear presence");
            }
            state.sessions.remove_client(&client_id, &session.outbound());
            tracing::info!(client_id = %client_id, "client disconnected");
        }
        Some(Peer::Sfu(router_id)) => {
            state.sessions.remove_sfu(&router_id, &session.outbound());
            if let Err(err) = state
                .registry
                .deregister(ResourceKind::Router, router_id.as_str())
                .await
            {
                tracing::warn!(router_id = %router_id, error = %err, "failed to deregister SFU");
            }
            tracing::info!(router_id = %router_id, "SFU disconnected");
        }
        None => {}
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub(crate) async fn dispatch(state: &AppState, session: &mut Session, envelope: Envelope) {
    match envelope.kind {
        MessageKind::Register => on_register(state, session, &envelope).await,
        _ if session.peer.is_none() => {
            session.send(Envelope::error(
                "Not registered. Send a register message first.",
            ));
        }
        _ if envelope.sender_id.is_none() => {
            tracing::warn!(kind = ?envelope.kind, "discarding message without senderId");
        }
        MessageKind::JoinMeeting => on_join_meeting(state, session, &envelope).await,
        MessageKind::LeaveMeeting => on_leave_meeting(state, session, &envelope).await,
        kind if kind.is_webrtc_signal() => on_webrtc_signal(state, session, &envelope).await,
        MessageKind::Chat => on_chat(state, session, &envelope).await,
        MessageKind::SfuSignalToClient => on_sfu_signal(state, session, &envelope).await,
        MessageKind::SfuMeetingEvent => on_sfu_meeting_event(state, session, &envelope).await,
        other => {
            tracing::debug!(kind = ?other, "ignoring unhandled message type");
        }
    }
}

async fn on_register(state: &AppState, session: &mut Session, envelope: &Envelope) {
    if session.peer.is_some() {
        tracing::warn!("connection attempted to register twice");
        return;
    }

    let payload: RegisterPayload = match envelope.parse_payload() {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(error = %err, "bad register payload");
            session.send(Envelope::error("Invalid message format."));
            return;
        }
    };

    match payload.role {
        PeerRole::Client => {
            let client_id = ClientId::new(payload.id);
            state
                .sessions
                .insert_client(client_id.clone(), session.outbound());
            session.peer = Some(Peer::Client(client_id.clone()));
            tracing::info!(client_id = %client_id, "client registered");
        }
        PeerRole::Sfu => {
            let router_id = RouterId::new(payload.id);
            state
                .sessions
                .insert_sfu(router_id.clone(), session.outbound());
            session.peer = Some(Peer::Sfu(router_id.clone()));
            // Registry membership makes the router selectable; a store
            // hiccup here self-heals on the next heartbeat.
            if let Err(err) = state
                .registry
                .register(ResourceKind::Router, router_id.as_str())
                .await
            {
                tracing::warn!(router_id = %router_id, error = %err, "failed to register SFU");
            }
            tracing::info!(router_id = %router_id, "SFU registered");
        }
    }
}

async fn on_join_meeting(state: &AppState, session: &mut Session, envelope: &Envelope) {
    let Some(client_id) = session.client_id().cloned() else {
        tracing::warn!("ignoring joinMeeting from a non-client connection");
        return;
    };
    let payload: JoinMeetingPayload = match envelope.parse_payload() {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(error = %err, "bad joinMeeting payload");
            session.send(Envelope::error("Invalid message format."));
            return;
        }
    };
    let meeting_id = payload.meeting_id;

    match state.coordinator.client_joined(&meeting_id, &client_id).await {
        Ok(_binding) => {
            session.meeting = Some(meeting_id.clone());
            session.send(Envelope::new(
                MessageKind::MeetingJoined,
                &MeetingJoinedPayload {
                    meeting_id: meeting_id.clone(),
                    success: true,
                },
            ));
            broadcast_local_event(
                state,
                &meeting_id,
                MeetingEventKind::ClientJoined,
                &client_id,
                Some(&client_id),
            )
            .await;
            tracing::info!(client_id = %client_id, meeting_id = %meeting_id, "client joined meeting");
        }
        Err(CoordinationError::RouterNotAssigned(id)) => {
            session.send(Envelope::error(format!(
                "Meeting {id} has no SFU assigned yet. Please try rejoining."
            )));
        }
        Err(err) => {
            tracing::error!(meeting_id = %meeting_id, error = %err, "joinMeeting failed");
            session.send(Envelope::error(
                "Failed to join meeting. Please try again later.",
            ));
        }
    }
}

async fn on_leave_meeting(state: &AppState, session: &mut Session, envelope: &Envelope) {
    let Some(client_id) = session.client_id().cloned() else {
        return;
    };
    let meeting_id = match envelope.parse_payload::<LeaveMeetingPayload>() {
        Ok(payload) => payload.meeting_id,
        Err(_) => match session.meeting.clone() {
            Some(id) => id,
            None => return,
        },
    };
    leave_meeting(state, session, &client_id, &meeting_id).await;
    session.meeting = None;
}

/// Shared by explicit `leaveMeeting` and disconnect teardown.
async fn leave_meeting(
    state: &AppState,
    _session: &mut Session,
    client_id: &ClientId,
    meeting_id: &MeetingId,
) {
    match state.coordinator.leave(meeting_id, client_id).await {
        Ok(torn_down) => {
            if !torn_down {
                broadcast_local_event(
                    state,
                    meeting_id,
                    MeetingEventKind::ClientLeft,
                    client_id,
                    Some(client_id),
                )
                .await;
            }
            tracing::info!(client_id = %client_id, meeting_id = %meeting_id, "client left meeting");
        }
        Err(err) => {
            tracing::warn!(
                client_id = %client_id,
                meeting_id = %meeting_id,
                error = %err,
                "failed to process departure"
            );
        }
    }
}

async fn on_webrtc_signal(state: &AppState, session: &mut Session, envelope: &Envelope) {
    let Some(client_id) = session.client_id().cloned() else {
        tracing::warn!("ignoring negotiation signal from a non-client connection");
        return;
    };
    let Some(meeting_id) = envelope.meeting_id.clone().or_else(|| session.meeting.clone()) else {
        session.send(Envelope::error("Not in a meeting."));
        return;
    };

    let binding = match state.coordinator.binding(&meeting_id).await {
        Ok(Some(binding)) => binding,
        Ok(None) => {
            // Reachable only when a client signals before its meeting got
            // bound; surfaced loudly instead of silently dropped.
            session.send(Envelope::error(format!(
                "Meeting {meeting_id} has no SFU assigned yet. Please try rejoining."
            )));
            return;
        }
        Err(err) => {
            tracing::error!(meeting_id = %meeting_id, error = %err, "binding lookup failed");
            session.send(Envelope::error(
                "Signal relay is unavailable. Please try again later.",
            ));
            return;
        }
    };

    let payload: SignalPayload = envelope.parse_payload().unwrap_or(SignalPayload {
        sdp: None,
        candidate: None,
    });
    // Guarded by is_webrtc_signal in dispatch.
    let Ok(kind) = SignalKind::try_from(envelope.kind) else {
        return;
    };

    let message = RelayMessage::WebrtcSignal(WebrtcSignal {
        kind,
        sdp: payload.sdp,
        candidate: payload.candidate,
        sender_id: client_id,
        meeting_id: meeting_id.clone(),
    });
    if let Err(err) = state
        .bus
        .publish(topics::ROUTER_COMMANDS, binding.router_id.as_str(), &message)
        .await
    {
        tracing::error!(
            meeting_id = %meeting_id,
            router_id = %binding.router_id,
            error = %err,
            "failed to relay negotiation signal"
        );
        session.send(Envelope::error(
            "Signal relay is unavailable. Please try again later.",
        ));
    }
}

async fn on_chat(state: &AppState, session: &mut Session, envelope: &Envelope) {
    let Some(client_id) = session.client_id().cloned() else {
        return;
    };
    let Some(meeting_id) = envelope.meeting_id.clone().or_else(|| session.meeting.clone()) else {
        session.send(Envelope::error("Not in a meeting."));
        return;
    };
    if let Err(err) = envelope.parse_payload::<ChatPayload>() {
        tracing::warn!(client_id = %client_id, error = %err, "bad chat payload");
        session.send(Envelope::error("Invalid message format."));
        return;
    }

    match state.coordinator.is_participant(&meeting_id, &client_id).await {
        Ok(true) => {}
        Ok(false) => {
            session.send(Envelope::error("Not a participant of this meeting."));
            return;
        }
        Err(err) => {
            tracing::warn!(meeting_id = %meeting_id, error = %err, "membership check failed");
            return;
        }
    }

    // Relayed verbatim to the other local participants; message contents
    // are opaque to the relay.
    let mut outgoing = envelope.clone();
    outgoing.meeting_id = Some(meeting_id.clone());
    send_to_local_participants(state, &meeting_id, outgoing, Some(&client_id)).await;
}

async fn on_sfu_signal(state: &AppState, session: &mut Session, envelope: &Envelope) {
    let Some(Peer::Sfu(router_id)) = session.peer.clone() else {
        tracing::warn!("ignoring sfuSignalToClient from a non-SFU connection");
        return;
    };
    let payload: SfuSignalPayload = match envelope.parse_payload() {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(router_id = %router_id, error = %err, "bad sfuSignalToClient payload");
            session.send(Envelope::error("Invalid message format."));
            return;
        }
    };

    let target = payload.target_client_id.clone();
    if state
        .sessions
        .send_to_client(&target, payload.clone().into_client_envelope())
    {
        return;
    }

    // The target holds its session on another instance; hand the signal to
    // whichever instance owns it.
    let meeting_key = payload.meeting_id.clone();
    if let Err(err) = state
        .bus
        .publish(
            topics::MEETING_EVENTS,
            meeting_key.as_str(),
            &RelayMessage::SfuSignalToClient(payload),
        )
        .await
    {
        tracing::warn!(
            router_id = %router_id,
            target_client_id = %target,
            error = %err,
            "failed to forward SFU signal"
        );
    }
}

async fn on_sfu_meeting_event(state: &AppState, session: &mut Session, envelope: &Envelope) {
    let Some(Peer::Sfu(router_id)) = session.peer.clone() else {
        return;
    };
    let payload: SfuMeetingEventPayload = match envelope.parse_payload() {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(router_id = %router_id, error = %err, "bad sfuMeetingEvent payload");
            session.send(Envelope::error("Invalid message format."));
            return;
        }
    };

    // Fanned out through the bus so every instance (this one included)
    // delivers to its local participants.
    let meeting_id = payload.meeting_id.clone();
    let message = RelayMessage::MeetingEvent(MeetingEventBroadcast {
        meeting_id: payload.meeting_id,
        event_type: payload.event_type,
        event_data: payload.event_data,
    });
    if let Err(err) = state
        .bus
        .publish(topics::MEETING_EVENTS, meeting_id.as_str(), &message)
        .await
    {
        tracing::warn!(meeting_id = %meeting_id, error = %err, "failed to publish meeting event");
    }
}

// ---------------------------------------------------------------------------
// Local broadcast
// ---------------------------------------------------------------------------

/// Tell the locally connected participants of a meeting that `subject`
/// joined or left. Participants on other instances learn through their own
/// copy of the event.
pub(crate) async fn broadcast_local_event(
    state: &AppState,
    meeting_id: &MeetingId,
    kind: MeetingEventKind,
    subject: &ClientId,
    exclude: Option<&ClientId>,
) {
    let envelope = Envelope::new(
        MessageKind::MeetingEvent,
        &MeetingEventPayload {
            kind,
            payload: MeetingEventData {
                client_id: subject.clone(),
                meeting_id: meeting_id.clone(),
            },
        },
    );
    send_to_local_participants(state, meeting_id, envelope, exclude).await;
}

pub(crate) async fn send_to_local_participants(
    state: &AppState,
    meeting_id: &MeetingId,
    envelope: Envelope,
    exclude: Option<&ClientId>,
) {
    let participants = match state.coordinator.participants(meeting_id).await {
        Ok(participants) => participants,
        Err(err) => {
            tracing::warn!(meeting_id = %meeting_id, error = %err, "participant lookup failed");
            return;
        }
    };
    for participant in participants {
        if exclude == Some(&participant) {
            continue;
        }
        state
            .sessions
            .send_to_client(&participant, envelope.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use parley_shared::bus::{BusError, MessageBus};
    use parley_shared::coordination::{
        MeetingCoordinator, ResourceRegistry, ResourceSelector, SignalingSelector,
    };
    use parley_shared::store::MemoryStore;

    use super::*;
    use crate::config::AppConfig;
    use crate::session::SessionRegistry;

    #[derive(Default)]
    struct RecordingBus {
        messages: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingBus {
        fn published(&self) -> Vec<(String, String, String)> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageBus for RecordingBus {
        async fn publish(
            &self,
            topic: &str,
            key: &str,
            message: &RelayMessage,
        ) -> Result<(), BusError> {
            self.messages.lock().unwrap().push((
                topic.to_owned(),
                key.to_owned(),
                serde_json::to_string(message)?,
            ));
            Ok(())
        }
    }

    struct Fixture {
        state: AppState,
        store: Arc<MemoryStore>,
        bus: Arc<RecordingBus>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingBus::default());
        let state = AppState {
            config: AppConfig {
                port: 8080,
                external_ws_url: "ws://localhost:8080".into(),
                redis_url: String::new(),
                amqp_url: String::new(),
            },
            store: store.clone(),
            amqp: None,
            bus: bus.clone(),
            coordinator: MeetingCoordinator::new(store.clone(), bus.clone()),
            registry: ResourceRegistry::new(store.clone()),
            sessions: SessionRegistry::new(),
        };
        Fixture { state, store, bus }
    }

    /// A connected session plus the receiving end of its socket.
    fn connect() -> (Session, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Vec<Envelope> {
        let mut received = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            received.push(envelope);
        }
        received
    }

    fn envelope(kind: MessageKind, payload: serde_json::Value, sender: Option<&str>) -> Envelope {
        Envelope {
            kind,
            payload,
            sender_id: sender.map(str::to_owned),
            meeting_id: None,
        }
    }

    async fn register_client(fx: &Fixture, session: &mut Session, id: &str) {
        dispatch(
            &fx.state,
            session,
            envelope(
                MessageKind::Register,
                serde_json::json!({"id": id, "role": "client"}),
                Some(id),
            ),
        )
        .await;
    }

    async fn register_sfu(fx: &Fixture, session: &mut Session, id: &str) {
        dispatch(
            &fx.state,
            session,
            envelope(
                MessageKind::Register,
                serde_json::json!({"id": id, "role": "sfu"}),
                Some(id),
            ),
        )
        .await;
    }

    /// Bind a meeting the way the orchestrator would before any client
    /// opens a socket.
    async fn bind_meeting(fx: &Fixture, meeting: &str, first_client: &str) {
        let router_selector = ResourceSelector::new(fx.store.clone());
        let signaling_selector =
            SignalingSelector::new(fx.store.clone(), vec!["ws://localhost:8080".into()]);
        fx.state
            .coordinator
            .join_or_create(
                &router_selector,
                &signaling_selector,
                Some(MeetingId::new(meeting)),
                &ClientId::new(first_client),
            )
            .await
            .unwrap();
    }

    fn error_messages(envelopes: &[Envelope]) -> Vec<String> {
        envelopes
            .iter()
            .filter(|e| e.kind == MessageKind::Error)
            .map(|e| e.payload["message"].as_str().unwrap_or("").to_owned())
            .collect()
    }

    #[tokio::test]
    async fn malformed_json_yields_a_protocol_error() {
        let fx = fixture();
        let (mut session, mut rx) = connect();

        handle_text(&fx.state, &mut session, "{not json").await;

        let received = drain(&mut rx);
        assert_eq!(error_messages(&received), vec!["Invalid message format."]);
    }

    #[tokio::test]
    async fn join_before_register_is_rejected_without_state_changes() {
        let fx = fixture();
        let (mut session, mut rx) = connect();

        dispatch(
            &fx.state,
            &mut session,
            envelope(
                MessageKind::JoinMeeting,
                serde_json::json!({"meetingId": "M1"}),
                Some("client-a"),
            ),
        )
        .await;

        let received = drain(&mut rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, MessageKind::Error);
        assert!(!fx.store.contains_key("meeting:M1:participants"));
        assert!(fx.bus.published().is_empty());
    }

    #[tokio::test]
    async fn messages_without_sender_id_are_silently_dropped() {
        let fx = fixture();
        let (mut session, mut rx) = connect();
        register_client(&fx, &mut session, "client-a").await;

        dispatch(
            &fx.state,
            &mut session,
            envelope(
                MessageKind::JoinMeeting,
                serde_json::json!({"meetingId": "M1"}),
                None,
            ),
        )
        .await;

        assert!(drain(&mut rx).is_empty());
        assert!(!fx.store.contains_key("meeting:M1:participants"));
    }

    #[tokio::test]
    async fn join_without_a_bound_router_is_a_retryable_error() {
        let fx = fixture();
        let (mut session, mut rx) = connect();
        register_client(&fx, &mut session, "client-a").await;

        dispatch(
            &fx.state,
            &mut session,
            envelope(
                MessageKind::JoinMeeting,
                serde_json::json!({"meetingId": "M1"}),
                Some("client-a"),
            ),
        )
        .await;

        let received = drain(&mut rx);
        let errors = error_messages(&received);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("no SFU assigned yet"));
        assert!(session.meeting.is_none());
    }

    #[tokio::test]
    async fn meeting_flow_joins_signals_and_leaves() {
        let fx = fixture();
        fx.state
            .registry
            .register(ResourceKind::Router, "sfu-1")
            .await
            .unwrap();
        bind_meeting(&fx, "M1", "client-a").await;

        let (mut alice, mut alice_rx) = connect();
        register_client(&fx, &mut alice, "client-a").await;
        let (mut bob, mut bob_rx) = connect();
        register_client(&fx, &mut bob, "client-b").await;

        // Alice joins; her own join event is not echoed back to her.
        dispatch(
            &fx.state,
            &mut alice,
            envelope(
                MessageKind::JoinMeeting,
                serde_json::json!({"meetingId": "M1"}),
                Some("client-a"),
            ),
        )
        .await;
        let received = drain(&mut alice_rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, MessageKind::MeetingJoined);
        assert_eq!(received[0].payload["success"], true);

        // Bob joins; Alice hears about it.
        dispatch(
            &fx.state,
            &mut bob,
            envelope(
                MessageKind::JoinMeeting,
                serde_json::json!({"meetingId": "M1"}),
                Some("client-b"),
            ),
        )
        .await;
        let alice_saw = drain(&mut alice_rx);
        assert_eq!(alice_saw.len(), 1);
        assert_eq!(alice_saw[0].kind, MessageKind::MeetingEvent);
        assert_eq!(alice_saw[0].payload["type"], "clientJoined");
        assert_eq!(alice_saw[0].payload["payload"]["clientId"], "client-b");

        // Alice's offer goes to the meeting's bound router.
        let mut offer = envelope(
            MessageKind::Offer,
            serde_json::json!({"sdp": "v=0..."}),
            Some("client-a"),
        );
        offer.meeting_id = Some(MeetingId::new("M1"));
        dispatch(&fx.state, &mut alice, offer).await;
        let published = fx.bus.published();
        let signal = published
            .iter()
            .find(|(_, _, payload)| payload.contains("webrtcSignal"))
            .expect("offer relayed to router");
        assert_eq!(signal.0, topics::ROUTER_COMMANDS);
        assert_eq!(signal.1, "sfu-1");
        assert!(signal.2.contains("\"senderId\":\"client-a\""));

        // Alice leaves; Bob hears about it.
        dispatch(
            &fx.state,
            &mut alice,
            envelope(
                MessageKind::LeaveMeeting,
                serde_json::json!({"meetingId": "M1"}),
                Some("client-a"),
            ),
        )
        .await;
        // Bob's backlog: his own meetingJoined ack, then Alice's departure
        // (his own join event was not echoed back to him).
        let bob_saw = drain(&mut bob_rx);
        assert_eq!(bob_saw[0].kind, MessageKind::MeetingJoined);
        let left: Vec<_> = bob_saw
            .iter()
            .filter(|e| e.kind == MessageKind::MeetingEvent)
            .collect();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].payload["type"], "clientLeft");
        assert_eq!(left[0].payload["payload"]["clientId"], "client-a");

        // Bob leaves last; the meeting is torn down.
        dispatch(
            &fx.state,
            &mut bob,
            envelope(
                MessageKind::LeaveMeeting,
                serde_json::json!({"meetingId": "M1"}),
                Some("client-b"),
            ),
        )
        .await;
        assert!(!fx.store.contains_key("meeting:M1:participants"));
        assert!(!fx.store.contains_key("meeting:M1:metadata"));
    }

    #[tokio::test]
    async fn chat_requires_membership() {
        let fx = fixture();
        let (mut session, mut rx) = connect();
        register_client(&fx, &mut session, "client-a").await;

        let mut chat = envelope(
            MessageKind::Chat,
            serde_json::json!({
                "id": "m1",
                "senderId": "client-a",
                "senderName": "Alice",
                "message": "hello",
                "timestamp": "2026-08-30T12:00:00Z"
            }),
            Some("client-a"),
        );
        chat.meeting_id = Some(MeetingId::new("M1"));
        dispatch(&fx.state, &mut session, chat).await;

        let errors = error_messages(&drain(&mut rx));
        assert_eq!(errors, vec!["Not a participant of this meeting."]);
    }

    #[tokio::test]
    async fn chat_with_missing_fields_is_a_protocol_error() {
        let fx = fixture();
        let (mut session, mut rx) = connect();
        register_client(&fx, &mut session, "client-a").await;

        let mut chat = envelope(
            MessageKind::Chat,
            serde_json::json!({"message": "hello"}),
            Some("client-a"),
        );
        chat.meeting_id = Some(MeetingId::new("M1"));
        dispatch(&fx.state, &mut session, chat).await;

        let errors = error_messages(&drain(&mut rx));
        assert_eq!(errors, vec!["Invalid message format."]);
    }

    #[tokio::test]
    async fn chat_reaches_the_other_local_participants() {
        let fx = fixture();
        fx.state
            .registry
            .register(ResourceKind::Router, "sfu-1")
            .await
            .unwrap();
        bind_meeting(&fx, "M1", "client-a").await;

        let (mut alice, mut alice_rx) = connect();
        register_client(&fx, &mut alice, "client-a").await;
        let (mut bob, mut bob_rx) = connect();
        register_client(&fx, &mut bob, "client-b").await;
        for (session, id) in [(&mut alice, "client-a"), (&mut bob, "client-b")] {
            dispatch(
                &fx.state,
                session,
                envelope(
                    MessageKind::JoinMeeting,
                    serde_json::json!({"meetingId": "M1"}),
                    Some(id),
                ),
            )
            .await;
        }
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let mut chat = envelope(
            MessageKind::Chat,
            serde_json::json!({
                "id": "m1",
                "senderId": "client-a",
                "senderName": "Alice",
                "message": "hello",
                "timestamp": "2026-08-30T12:00:00Z"
            }),
            Some("client-a"),
        );
        chat.meeting_id = Some(MeetingId::new("M1"));
        dispatch(&fx.state, &mut alice, chat).await;

        // Delivered to Bob, not echoed back to Alice.
        assert!(drain(&mut alice_rx).is_empty());
        let bob_saw = drain(&mut bob_rx);
        assert_eq!(bob_saw.len(), 1);
        assert_eq!(bob_saw[0].kind, MessageKind::Chat);
        assert_eq!(bob_saw[0].payload["message"], "hello");
        assert_eq!(bob_saw[0].sender_id.as_deref(), Some("client-a"));
    }

    #[tokio::test]
    async fn reconnect_survives_the_old_sessions_teardown() {
        let fx = fixture();
        let (mut first, _first_rx) = connect();
        register_client(&fx, &mut first, "client-a").await;
        let (mut second, mut second_rx) = connect();
        register_client(&fx, &mut second, "client-a").await;

        // The first socket closes after the reconnect already registered.
        cleanup(&fx.state, &mut first).await;

        assert_eq!(fx.state.sessions.client_count(), 1);
        assert!(fx
            .state
            .sessions
            .send_to_client(&ClientId::new("client-a"), Envelope::error("ping")));
        assert!(second_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn sfu_signal_is_delivered_to_a_local_client() {
        let fx = fixture();
        let (mut sfu, _sfu_rx) = connect();
        register_sfu(&fx, &mut sfu, "sfu-1").await;
        let (mut client, mut client_rx) = connect();
        register_client(&fx, &mut client, "client-a").await;

        dispatch(
            &fx.state,
            &mut sfu,
            envelope(
                MessageKind::SfuSignalToClient,
                serde_json::json!({
                    "targetClientId": "client-a",
                    "signalType": "answer",
                    "sdp": "v=0...",
                    "meetingId": "M1"
                }),
                Some("sfu-1"),
            ),
        )
        .await;

        let received = drain(&mut client_rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, MessageKind::Answer);
        assert_eq!(received[0].payload["senderId"], "sfu");
        assert_eq!(received[0].payload["sdp"], "v=0...");
        // Delivered locally, not over the bus.
        assert!(fx.bus.published().is_empty());
    }

    #[tokio::test]
    async fn sfu_signal_for_a_remote_client_goes_over_the_bus() {
        let fx = fixture();
        let (mut sfu, _sfu_rx) = connect();
        register_sfu(&fx, &mut sfu, "sfu-1").await;

        dispatch(
            &fx.state,
            &mut sfu,
            envelope(
                MessageKind::SfuSignalToClient,
                serde_json::json!({
                    "targetClientId": "client-far-away",
                    "signalType": "offer",
                    "sdp": "v=0...",
                    "meetingId": "M1"
                }),
                Some("sfu-1"),
            ),
        )
        .await;

        let published = fx.bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, topics::MEETING_EVENTS);
        assert_eq!(published[0].1, "M1");
        assert!(published[0].2.contains("sfuSignalToClient"));
    }

    #[tokio::test]
    async fn sfu_disconnect_withdraws_it_from_selection() {
        let fx = fixture();
        let (mut sfu, _rx) = connect();
        register_sfu(&fx, &mut sfu, "sfu-1").await;
        assert_eq!(
            fx.state
                .registry
                .available(ResourceKind::Router)
                .await
                .unwrap(),
            vec!["sfu-1".to_owned()]
        );

        cleanup(&fx.state, &mut sfu).await;

        assert!(fx
            .state
            .registry
            .available(ResourceKind::Router)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(fx.state.sessions.sfu_count(), 0);
    }

    #[tokio::test]
    async fn client_disconnect_mid_meeting_leaves_it() {
        let fx = fixture();
        fx.state
            .registry
            .register(ResourceKind::Router, "sfu-1")
            .await
            .unwrap();
        bind_meeting(&fx, "M1", "client-a").await;

        let (mut alice, _alice_rx) = connect();
        register_client(&fx, &mut alice, "client-a").await;
        let (mut bob, mut bob_rx) = connect();
        register_client(&fx, &mut bob, "client-b").await;
        for (session, id) in [(&mut alice, "client-a"), (&mut bob, "client-b")] {
            dispatch(
                &fx.state,
                session,
                envelope(
                    MessageKind::JoinMeeting,
                    serde_json::json!({"meetingId": "M1"}),
                    Some(id),
                ),
            )
            .await;
        }
        drain(&mut bob_rx);

        // Socket drop, no leaveMeeting.
        cleanup(&fx.state, &mut alice).await;

        let bob_saw = drain(&mut bob_rx);
        assert_eq!(bob_saw.len(), 1);
        assert_eq!(bob_saw[0].payload["type"], "clientLeft");
        assert_eq!(fx.state.sessions.client_count(), 1);
    }
}
