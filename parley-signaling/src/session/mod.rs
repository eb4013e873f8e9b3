use dashmap::DashMap;
use tokio::sync::mpsc;

use parley_shared::types::{ClientId, Envelope, MeetingId, RouterId};

pub mod handler;

pub type Outbound = mpsc::UnboundedSender<Envelope>;

// ---------------------------------------------------------------------------
// Per-connection state
// ---------------------------------------------------------------------------

/// Who a registered connection is. Set exactly once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    Client(ClientId),
    Sfu(RouterId),
}

/// Mutable state owned by one WebSocket task. Connections progress from
/// unregistered to registered, and clients additionally into a meeting;
/// teardown runs when the socket closes, whatever state it was in.
pub struct Session {
    outbound: Outbound,
    pub peer: Option<Peer>,
    pub meeting: Option<MeetingId>,
}

impl Session {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            outbound,
            peer: None,
            meeting: None,
        }
    }

    /// Queue an envelope for the writer task. A closed channel means the
    /// socket is going away and the message can be dropped.
    pub fn send(&self, envelope: Envelope) {
        let _ = self.outbound.send(envelope);
    }

    /// A second handle on this connection's outbox, for the registry.
    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    pub fn client_id(&self) -> Option<&ClientId> {
        match &self.peer {
            Some(Peer::Client(id)) => Some(id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Instance-local connection registry
// ---------------------------------------------------------------------------

/// All live WebSocket connections on this instance, keyed by registered
/// identity. Holds senders only; the socket tasks own the sockets.
#[derive(Default)]
pub struct SessionRegistry {
    clients: DashMap<ClientId, Outbound>,
    sfus: DashMap<RouterId, Outbound>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_client(&self, id: ClientId, outbound: Outbound) {
        if self.clients.insert(id.clone(), outbound).is_some() {
            tracing::warn!(client_id = %id, "replaced an existing client session");
        }
    }

    pub fn insert_sfu(&self, id: RouterId, outbound: Outbound) {
        if self.sfus.insert(id.clone(), outbound).is_some() {
            tracing::warn!(router_id = %id, "replaced an existing SFU session");
        }
    }

    /// Remove only when `outbound` still identifies the stored session. A
    /// replaced connection tears down later than its successor registers,
    /// and must not evict it.
    pub fn remove_client(&self, id: &ClientId, outbound: &Outbound) {
        self.clients.remove_if(id, |_, tx| tx.same_channel(outbound));
    }

    pub fn remove_sfu(&self, id: &RouterId, outbound: &Outbound) {
        self.sfus.remove_if(id, |_, tx| tx.same_channel(outbound));
    }

    /// Deliver to a locally connected client. `false` means the client is
    /// not on this instance (or already gone).
    pub fn send_to_client(&self, id: &ClientId, envelope: Envelope) -> bool {
        match self.clients.get(id) {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }

    pub fn send_to_sfu(&self, id: &RouterId, envelope: Envelope) -> bool {
        match self.sfus.get(id) {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn sfu_count(&self) -> usize {
        self.sfus.len()
    }
}
