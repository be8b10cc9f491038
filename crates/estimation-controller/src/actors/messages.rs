//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Response patterns use `tokio::sync::oneshot` for
//! request-reply semantics. View payloads are the one type that crosses the
//! engine boundary: connection adapters hand them to the embedding
//! transport, which renders them for clients.

use crate::aggregate::AggregateResult;
use crate::errors::EcError;
use crate::scale::Scale;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::connection::ConnectionActorHandle;
use super::session::SessionActorHandle;

/// Messages sent to `SessionRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Create a new session with a scale from the catalog.
    CreateSession {
        session_name: String,
        scale_name: String,
        /// Response channel for the created session or error.
        respond_to: oneshot::Sender<Result<CreatedSession, EcError>>,
    },

    /// Get a handle to an existing session actor.
    GetSession {
        session_id: String,
        /// Response channel for the session actor handle or error.
        respond_to: oneshot::Sender<Result<SessionActorHandle, EcError>>,
    },

    /// A session actor finished (last participant left or idle timeout).
    ///
    /// Sent exactly once by the terminating session actor itself; there is
    /// no other removal path in normal operation.
    SessionTerminated { session_id: String },

    /// Get current status of the registry (for health checks).
    GetStatus {
        /// Response channel for registry status.
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Initiate graceful shutdown (SIGTERM received).
    Shutdown {
        /// Deadline for shutdown.
        deadline: Duration,
        /// Response channel for confirmation.
        respond_to: oneshot::Sender<Result<(), EcError>>,
    },
}

/// Messages sent to `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// A participant event from a connection adapter or the embedding
    /// transport. Only these reset the session's idle deadline.
    Event(SessionEvent),

    /// Get current session state (for supervision and tests).
    GetState {
        /// Response channel for the session snapshot.
        respond_to: oneshot::Sender<SessionState>,
    },
}

/// Participant events, processed strictly in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    /// A participant joined. Carries the transport-facing sink the session
    /// wraps in a new connection adapter.
    Joined {
        participant: String,
        outbound: mpsc::Sender<View>,
    },

    /// A participant left (explicit leave or transport close).
    Left { participant: String },

    /// A participant submitted a vote. The payload is the raw client
    /// string; parsing happens inside the session actor.
    Voted {
        participant: String,
        raw_vote: String,
    },

    /// A participant asked for a fresh round.
    Reset { participant: String },
}

impl SessionEvent {
    /// Returns the event kind for logs and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Joined { .. } => "joined",
            SessionEvent::Left { .. } => "left",
            SessionEvent::Voted { .. } => "voted",
            SessionEvent::Reset { .. } => "reset",
        }
    }

    /// Returns the acting participant's name.
    #[must_use]
    pub fn participant(&self) -> &str {
        match self {
            SessionEvent::Joined { participant, .. }
            | SessionEvent::Left { participant }
            | SessionEvent::Voted { participant, .. }
            | SessionEvent::Reset { participant } => participant,
        }
    }
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Deliver a view to the connected client.
    Deliver { view: View },

    /// Close the connection gracefully (transport-initiated).
    Close { reason: String },
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// A freshly created session, returned by CreateSession.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    /// Generated 16-symbol alphanumeric session identifier.
    pub session_id: String,
    /// Handle for submitting events to the new session.
    pub handle: SessionActorHandle,
}

/// Status of the `SessionRegistryActor`.
#[derive(Debug, Clone)]
pub struct RegistryStatus {
    /// Total registered sessions.
    pub session_count: usize,
    /// Total participants across all sessions.
    pub participant_count: usize,
    /// Whether the registry is draining.
    pub is_draining: bool,
    /// Current mailbox depth.
    pub mailbox_depth: usize,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Accepting and processing events.
    Active,
    /// Torn down; the transition is one-way.
    Terminated,
}

/// Current state of a session (for supervision and tests).
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Session ID.
    pub session_id: String,
    /// Human-readable session name.
    pub session_name: String,
    /// The session's estimation scale.
    pub scale: Scale,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Current participants, votes included.
    pub participants: Vec<ParticipantView>,
    /// Session creation timestamp.
    pub created_at: i64,
    /// Current mailbox depth.
    pub mailbox_depth: usize,
}

/// Internal pairing of a delivery target and its personalized view.
///
/// Each event handler produces one list of these; a single dispatch loop
/// then performs the fan-out.
#[derive(Debug)]
pub struct Delivery {
    /// The recipient's connection adapter.
    pub connection: ConnectionActorHandle,
    /// The view personalized for that recipient.
    pub view: View,
}

// ----------------------------------------------------------------------------
// Views (the engine's outbound payloads)
// ----------------------------------------------------------------------------

/// A view delivered to one participant, tagged with its name on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "view", rename_all = "camelCase")]
pub enum View {
    /// Roster refresh, optionally carrying round statistics.
    Participants(ParticipantsView),
    /// Full session content (after a reset).
    SessionContent(SessionContentView),
    /// Idle-timeout notice, the session's final delivery.
    Timeout(TimeoutView),
}

impl View {
    /// Returns the view name used on the wire and in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            View::Participants(_) => "participants",
            View::SessionContent(_) => "sessionContent",
            View::Timeout(_) => "timeout",
        }
    }
}

/// One participant as seen by a view recipient.
///
/// `vote` is populated for the recipient's own entry and, for others, only
/// once the round is complete; until then other participants expose just
/// the `voted` flag.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    /// Display name.
    pub name: String,
    /// Whether this participant has a vote in the current round.
    pub voted: bool,
    /// The vote value, where the recipient is allowed to see it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote: Option<u32>,
}

/// Roster view, personalized per recipient.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantsView {
    /// The recipient's own entry.
    pub me: ParticipantView,
    /// Every other participant, votes concealed unless the round is done.
    pub others: Vec<ParticipantView>,
    /// Round statistics, present only when every participant has voted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateResult>,
}

/// Full session view sent after a reset.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContentView {
    /// Session ID.
    pub session_id: String,
    /// Human-readable session name.
    pub session_name: String,
    /// The session's estimation scale.
    pub scale: Scale,
    /// The recipient's own entry.
    pub me: ParticipantView,
    /// Every other participant.
    pub others: Vec<ParticipantView>,
}

/// Idle-timeout notice.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutView {
    /// Human-readable session name.
    pub session_name: String,
}
