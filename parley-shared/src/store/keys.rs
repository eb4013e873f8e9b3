//! The logical key schema shared by every process that touches the store.

use crate::types::ids::{ClientId, MeetingId};

pub const AVAILABLE_ROUTERS: &str = "available_routers";
pub const AVAILABLE_SIGNALING_SERVERS: &str = "available_signaling_servers";

pub fn router_metrics(id: &str) -> String {
    format!("router:{id}:metrics")
}

pub fn signaling_metrics(id: &str) -> String {
    format!("signaling:{id}:metrics")
}

pub fn meeting_metadata(id: &MeetingId) -> String {
    format!("meeting:{id}:metadata")
}

pub fn meeting_participants(id: &MeetingId) -> String {
    format!("meeting:{id}:participants")
}

/// Derived per-meeting cache written by the SFU; deleted on teardown.
pub fn meeting_active_speaker(id: &MeetingId) -> String {
    format!("meeting:{id}:active_speaker")
}

pub fn presence(id: &ClientId) -> String {
    format!("user:{id}:presence")
}

/// Channel carrying a bus payload when the primary bus is down.
pub fn fallback_channel(topic: &str, key: &str) -> String {
    format!("fallback:{topic}:{key}")
}

/// Pattern matching every fallback channel for a topic, for PSUBSCRIBE.
pub fn fallback_channel_pattern(topic: &str) -> String {
    format!("fallback:{topic}:*")
}
