use serde::{Deserialize, Serialize};

use crate::types::ids::{ClientId, MeetingId, PeerRole};

/// WebSocket message envelope, both directions:
/// `{ type, payload, senderId?, meetingId? }`.
///
/// `payload` stays an opaque JSON value at this level; handlers parse it
/// into the typed payload structs below once they know the message kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<MeetingId>,
}

impl Envelope {
    pub fn new<T: Serialize>(kind: MessageKind, payload: &T) -> Self {
        Self {
            kind,
            // Payload structs are plain data; serialization cannot fail.
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            sender_id: None,
            meeting_id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            MessageKind::Error,
            &ErrorMessage {
                message: message.into(),
            },
        )
    }

    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Register,
    JoinMeeting,
    LeaveMeeting,
    Offer,
    Answer,
    Candidate,
    Chat,
    MeetingJoined,
    MeetingEvent,
    SfuSignalToClient,
    SfuMeetingEvent,
    Error,
    // Router-bound kinds, forwarded to a locally connected SFU when its
    // relay traffic arrives over the bus.
    PrepareMeeting,
    ClientJoined,
    ClientLeft,
    WebrtcSignal,
    /// Anything we do not recognize; logged server-side, never fatal.
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    pub fn is_webrtc_signal(&self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::Candidate)
    }
}

/// The three WebRTC negotiation signal kinds relayed between a client and
/// its router. The relay never inspects SDP/ICE contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl From<SignalKind> for MessageKind {
    fn from(kind: SignalKind) -> Self {
        match kind {
            SignalKind::Offer => MessageKind::Offer,
            SignalKind::Answer => MessageKind::Answer,
            SignalKind::Candidate => MessageKind::Candidate,
        }
    }
}

impl TryFrom<MessageKind> for SignalKind {
    type Error = ();

    fn try_from(kind: MessageKind) -> Result<Self, ()> {
        match kind {
            MessageKind::Offer => Ok(Self::Offer),
            MessageKind::Answer => Ok(Self::Answer),
            MessageKind::Candidate => Ok(Self::Candidate),
            _ => Err(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub id: String,
    pub role: PeerRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMeetingPayload {
    pub meeting_id: MeetingId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveMeetingPayload {
    pub meeting_id: MeetingId,
}

/// `offer`/`answer` carry `sdp`; `candidate` carries the ICE fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<serde_json::Value>,
}

/// A negotiation signal forwarded from the router back down to one client.
/// `sdp` and `candidate` are always emitted, null when absent upstream,
/// because browser-side handlers read both fields unconditionally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedSignalPayload {
    pub sdp: Option<String>,
    pub candidate: Option<serde_json::Value>,
    pub sender_id: String,
    pub meeting_id: MeetingId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub id: String,
    pub sender_id: ClientId,
    pub sender_name: String,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingJoinedPayload {
    pub meeting_id: MeetingId,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MeetingEventKind {
    ClientJoined,
    ClientLeft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingEventPayload {
    #[serde(rename = "type")]
    pub kind: MeetingEventKind,
    pub payload: MeetingEventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingEventData {
    pub client_id: ClientId,
    pub meeting_id: MeetingId,
}

/// Sent by an SFU to address one of its negotiation signals to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfuSignalPayload {
    pub target_client_id: ClientId,
    pub signal_type: SignalKind,
    #[serde(default)]
    pub sdp: Option<String>,
    #[serde(default)]
    pub candidate: Option<serde_json::Value>,
    pub meeting_id: MeetingId,
}

impl SfuSignalPayload {
    /// Remap into the client-facing signal envelope, tagging the router as
    /// the sender.
    pub fn into_client_envelope(self) -> Envelope {
        Envelope::new(
            self.signal_type.into(),
            &ForwardedSignalPayload {
                sdp: self.sdp,
                candidate: self.candidate,
                sender_id: "sfu".to_owned(),
                meeting_id: self.meeting_id,
            },
        )
    }
}

/// Meeting-wide event originated by an SFU (e.g. active speaker changes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfuMeetingEventPayload {
    pub meeting_id: MeetingId,
    pub event_type: String,
    #[serde(default)]
    pub event_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_camel_case_fields() {
        let raw = r#"{"type":"joinMeeting","payload":{"meetingId":"M1"},"senderId":"client-a"}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.kind, MessageKind::JoinMeeting);
        assert_eq!(env.sender_id.as_deref(), Some("client-a"));

        let payload: JoinMeetingPayload = env.parse_payload().unwrap();
        assert_eq!(payload.meeting_id, MeetingId::new("M1"));
    }

    #[test]
    fn unknown_message_types_do_not_fail_parsing() {
        let raw = r#"{"type":"activeSpeakerPing","payload":{},"senderId":"x"}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.kind, MessageKind::Unknown);
    }

    #[test]
    fn register_payload_parses_roles() {
        let env: Envelope = serde_json::from_str(
            r#"{"type":"register","payload":{"id":"sfu-1","role":"sfu"}}"#,
        )
        .unwrap();
        let reg: RegisterPayload = env.parse_payload().unwrap();
        assert_eq!(reg.role, PeerRole::Sfu);
        assert_eq!(reg.id, "sfu-1");
    }

    #[test]
    fn forwarded_signal_keeps_absent_fields_as_null() {
        let sfu_signal = SfuSignalPayload {
            target_client_id: ClientId::new("client-a"),
            signal_type: SignalKind::Answer,
            sdp: Some("v=0".into()),
            candidate: None,
            meeting_id: MeetingId::new("M1"),
        };

        let env = sfu_signal.into_client_envelope();
        assert_eq!(env.kind, MessageKind::Answer);

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["payload"]["sdp"], "v=0");
        // Candidate is present and explicitly null, not omitted.
        assert!(json["payload"]
            .as_object()
            .unwrap()
            .contains_key("candidate"));
        assert!(json["payload"]["candidate"].is_null());
        assert_eq!(json["payload"]["senderId"], "sfu");
    }

    #[test]
    fn meeting_event_wire_shape_matches_protocol() {
        let env = Envelope::new(
            MessageKind::MeetingEvent,
            &MeetingEventPayload {
                kind: MeetingEventKind::ClientJoined,
                payload: MeetingEventData {
                    client_id: ClientId::new("client-b"),
                    meeting_id: MeetingId::new("M1"),
                },
            },
        );

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "meetingEvent");
        assert_eq!(json["payload"]["type"], "clientJoined");
        assert_eq!(json["payload"]["payload"]["clientId"], "client-b");
    }
}
