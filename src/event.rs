//! Events emitted by a [`GameSession`](crate::session::GameSession).
//!
//! The receiver returned from [`GameSession::start`](crate::session::GameSession::start)
//! yields these in the order the session task produced them. Rendering is up
//! to the consumer: everything a UI shows can be derived from these events or
//! from a [`SessionView`](crate::core::SessionView) query.

use crate::identity::SessionIdentity;
use crate::powers::{Notice, NoticeId};
use crate::protocol::{FrameKind, GameState, Participant, PowerKind, SessionId};

/// High-level session events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The pub/sub channel is up.
    Connected,

    /// The pub/sub channel went down. A held game stays viewable but is stale
    /// until the next join.
    Disconnected { reason: Option<String> },

    /// The authoritative state was replaced.
    StateUpdated {
        kind: FrameKind,
        state: Box<GameState>,
    },

    /// The server confirmed which roster entry is ours.
    IdentityConfirmed { participant: Participant },

    /// A history snapshot was appended.
    SnapshotRecorded { sequence_number: usize },

    /// The history was cleared (new game, restart, or leave).
    HistoryReset,

    /// The displayed state switched between live and a snapshot.
    ViewChanged { viewing: Option<usize> },

    /// A target-requiring power is armed; the next cell click is its target.
    TargetPrompt { power: PowerKind },

    /// A pending targeted action was dropped.
    TargetingCancelled,

    /// A new capability was granted to the local participant.
    NoticeRaised(Notice),

    /// A notice expired or was dismissed.
    NoticeCleared { id: NoticeId },

    /// The session re-issued a join on the user's behalf.
    RejoinAttempted { identity: SessionIdentity },

    /// The lobby created a session.
    SessionCreated { session_id: SessionId },

    /// The session was left and the stored identity forgotten.
    Left,

    /// Short human-readable text: server messages and local rejections.
    Status { message: String },
}
