use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::selector::{ResourceSelector, SignalingSelector};
use super::CoordinationError;
use crate::bus::message::{topics, ClientEvent, PrepareMeetingCommand};
use crate::bus::{MessageBus, RelayMessage};
use crate::store::{keys, StateStore};
use crate::types::api::PresenceStatus;
use crate::types::ids::{ClientId, MeetingId, RouterId};

/// The persisted `(router, signaling)` assignment for a meeting. Written
/// exactly once per meeting lifetime, as one compound value, and removed
/// on teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingBinding {
    pub router_id: RouterId,
    pub signaling_url: String,
}

/// Owns the lifecycle of a meeting's resource binding: create-or-reuse,
/// participant add/remove, and teardown when the last participant leaves.
#[derive(Clone)]
pub struct MeetingCoordinator {
    store: Arc<dyn StateStore>,
    bus: Arc<dyn MessageBus>,
}

impl MeetingCoordinator {
    pub fn new(store: Arc<dyn StateStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self { store, bus }
    }

    /// Bind `client_id` into a meeting, allocating a meeting code if none
    /// was given and a resource pair if the meeting has none yet.
    ///
    /// Binding is compare-and-set on the metadata key: concurrent first
    /// joiners both run selection, but only the CAS winner persists its
    /// pick and publishes `prepareMeeting`; the loser adopts the winner's
    /// binding.
    pub async fn join_or_create(
        &self,
        router_selector: &ResourceSelector,
        signaling_selector: &SignalingSelector,
        meeting_id: Option<MeetingId>,
        client_id: &ClientId,
    ) -> Result<(MeetingId, MeetingBinding), CoordinationError> {
        let meeting_id = meeting_id.unwrap_or_else(MeetingId::generate);

        self.store
            .set_add(&keys::meeting_participants(&meeting_id), client_id.as_str())
            .await?;

        if let Some(binding) = self.binding(&meeting_id).await? {
            tracing::info!(
                meeting_id = %meeting_id,
                router_id = %binding.router_id,
                signaling_url = %binding.signaling_url,
                "meeting already assigned"
            );
            return Ok((meeting_id, binding));
        }

        let router_id = RouterId::new(router_selector.select_router().await?);
        let signaling_url = signaling_selector.select().await?;
        let binding = MeetingBinding {
            router_id,
            signaling_url,
        };

        let serialized = serde_json::to_string(&binding)?;
        let won = self
            .store
            .set_nx(&keys::meeting_metadata(&meeting_id), &serialized)
            .await?;

        let binding = if won {
            tracing::info!(
                meeting_id = %meeting_id,
                router_id = %binding.router_id,
                signaling_url = %binding.signaling_url,
                "meeting bound to new resource pair"
            );
            self.bus
                .publish(
                    topics::ROUTER_COMMANDS,
                    binding.router_id.as_str(),
                    &RelayMessage::PrepareMeeting(PrepareMeetingCommand {
                        meeting_id: meeting_id.clone(),
                    }),
                )
                .await?;
            binding
        } else {
            // Lost the race; the winner's compound write is now visible.
            match self.binding(&meeting_id).await? {
                Some(winner) => {
                    tracing::info!(meeting_id = %meeting_id, "adopted concurrent joiner's binding");
                    winner
                }
                None => binding,
            }
        };

        Ok((meeting_id, binding))
    }

    pub async fn binding(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Option<MeetingBinding>, CoordinationError> {
        let raw = self
            .store
            .get(&keys::meeting_metadata(meeting_id))
            .await?;
        Ok(raw.and_then(|value| match serde_json::from_str(&value) {
            Ok(binding) => Some(binding),
            Err(err) => {
                tracing::warn!(meeting_id = %meeting_id, error = %err, "unreadable meeting binding");
                None
            }
        }))
    }

    /// Record presence and tell the bound router a participant arrived.
    /// Fails with `RouterNotAssigned` when the binding does not exist yet,
    /// which callers surface as a retryable error.
    pub async fn client_joined(
        &self,
        meeting_id: &MeetingId,
        client_id: &ClientId,
    ) -> Result<MeetingBinding, CoordinationError> {
        self.store
            .set_add(&keys::meeting_participants(meeting_id), client_id.as_str())
            .await?;
        self.store
            .hash_set(
                &keys::presence(client_id),
                &[
                    ("status", PresenceStatus::InCall.as_str().to_owned()),
                    ("current_meeting_id", meeting_id.to_string()),
                ],
            )
            .await?;

        let binding = self
            .binding(meeting_id)
            .await?
            .ok_or_else(|| CoordinationError::RouterNotAssigned(meeting_id.clone()))?;

        self.bus
            .publish(
                topics::ROUTER_COMMANDS,
                binding.router_id.as_str(),
                &RelayMessage::ClientJoined(ClientEvent {
                    client_id: client_id.clone(),
                    meeting_id: meeting_id.clone(),
                }),
            )
            .await?;

        Ok(binding)
    }

    /// Remove a participant. Returns `true` when this was the last one and
    /// the meeting was fully torn down.
    pub async fn leave(
        &self,
        meeting_id: &MeetingId,
        client_id: &ClientId,
    ) -> Result<bool, CoordinationError> {
        self.store
            .set_remove(&keys::meeting_participants(meeting_id), client_id.as_str())
            .await?;
        self.store
            .hash_set(
                &keys::presence(client_id),
                &[
                    ("status", PresenceStatus::Offline.as_str().to_owned()),
                    ("current_meeting_id", String::new()),
                ],
            )
            .await?;

        if let Some(binding) = self.binding(meeting_id).await? {
            // Best-effort: a dead bus must not keep a client from leaving.
            if let Err(err) = self
                .bus
                .publish(
                    topics::ROUTER_COMMANDS,
                    binding.router_id.as_str(),
                    &RelayMessage::ClientLeft(ClientEvent {
                        client_id: client_id.clone(),
                        meeting_id: meeting_id.clone(),
                    }),
                )
                .await
            {
                tracing::warn!(
                    meeting_id = %meeting_id,
                    client_id = %client_id,
                    error = %err,
                    "failed to notify router of departure"
                );
            }
        }

        let remaining = self
            .store
            .set_len(&keys::meeting_participants(meeting_id))
            .await?;
        if remaining > 0 {
            return Ok(false);
        }

        // Full teardown: the meeting id can be rebound fresh later.
        self.store
            .delete(&keys::meeting_participants(meeting_id))
            .await?;
        self.store
            .delete(&keys::meeting_metadata(meeting_id))
            .await?;
        self.store
            .delete(&keys::meeting_active_speaker(meeting_id))
            .await?;
        tracing::info!(meeting_id = %meeting_id, "meeting torn down");
        Ok(true)
    }

    pub async fn participants(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<ClientId>, CoordinationError> {
        let members = self
            .store
            .set_members(&keys::meeting_participants(meeting_id))
            .await?;
        Ok(members.into_iter().map(ClientId::new).collect())
    }

    pub async fn is_participant(
        &self,
        meeting_id: &MeetingId,
        client_id: &ClientId,
    ) -> Result<bool, CoordinationError> {
        Ok(self
            .participants(meeting_id)
            .await?
            .iter()
            .any(|id| id == client_id))
    }
}
