use serde::{Deserialize, Serialize};

use crate::types::envelope::{SfuSignalPayload, SignalKind};
use crate::types::ids::{ClientId, MeetingId};

/// Bus topics. `router_commands` is keyed by router id, `meeting_events`
/// by meeting id, so per-resource ordering holds on the primary bus.
pub mod topics {
    pub const ROUTER_COMMANDS: &str = "router_commands";
    pub const MEETING_EVENTS: &str = "meeting_events";
}

/// The `{type, payload}` envelope carried over the relay bus, in both
/// directions. The same shape travels over the fallback pub/sub channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum RelayMessage {
    /// Orchestrator -> router: allocate state for a meeting ahead of the
    /// first client session.
    PrepareMeeting(PrepareMeetingCommand),
    /// Signaling -> router: a participant entered the meeting.
    ClientJoined(ClientEvent),
    /// Signaling -> router: a participant left (or disconnected).
    ClientLeft(ClientEvent),
    /// Signaling -> router: a client's SDP/ICE negotiation signal. Routed
    /// by ids only; the relay never inspects the contents.
    WebrtcSignal(WebrtcSignal),
    /// Router -> signaling: a negotiation signal addressed to one client.
    SfuSignalToClient(SfuSignalPayload),
    /// Router -> signaling: meeting-wide event for every participant.
    MeetingEvent(MeetingEventBroadcast),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareMeetingCommand {
    pub meeting_id: MeetingId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEvent {
    pub client_id: ClientId,
    pub meeting_id: MeetingId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebrtcSignal {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<serde_json::Value>,
    pub sender_id: ClientId,
    pub meeting_id: MeetingId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingEventBroadcast {
    pub meeting_id: MeetingId,
    pub event_type: String,
    #[serde(default)]
    pub event_data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_messages_use_the_type_payload_envelope() {
        let msg = RelayMessage::PrepareMeeting(PrepareMeetingCommand {
            meeting_id: MeetingId::new("M1"),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "prepareMeeting");
        assert_eq!(json["payload"]["meetingId"], "M1");
    }

    #[test]
    fn webrtc_signal_round_trips() {
        let raw = r#"{
            "type": "webrtcSignal",
            "payload": {
                "type": "offer",
                "sdp": "v=0...",
                "senderId": "client-a",
                "meetingId": "M1"
            }
        }"#;
        let msg: RelayMessage = serde_json::from_str(raw).unwrap();
        match msg {
            RelayMessage::WebrtcSignal(signal) => {
                assert_eq!(signal.kind, SignalKind::Offer);
                assert_eq!(signal.sender_id, ClientId::new("client-a"));
                assert!(signal.candidate.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
