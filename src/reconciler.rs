//! Turns raw topic pushes into authoritative state.
//!
//! Every push that carries a game state carries the **whole** state, so
//! applying a frame is a plain replace and the last applied frame wins. A
//! frame that fails to decode, or whose state breaks the board invariant, is
//! dropped on its own; the previous state stays in place.

use tracing::{debug, warn};

use crate::identity::SessionIdentity;
use crate::protocol::{FrameKind, GameState, InboundFrame, Participant};

/// What one inbound frame changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub kind: FrameKind,
    /// The replacement authoritative state, if the frame carried one.
    pub game_state: Option<GameState>,
    /// Set when this frame confirmed which roster entry is ours.
    pub confirmed: Option<Participant>,
    /// Server text to surface as a transient status message.
    pub status_text: Option<String>,
}

/// Applies inbound frames in arrival order.
#[derive(Debug, Default)]
pub struct Reconciler {
    applied: u64,
    dropped: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames applied so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Frames dropped as malformed so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Decode and apply one raw frame body.
    ///
    /// Returns `None` when the frame is dropped. The cached participant in
    /// `identity` is updated in place; the caller persists it when
    /// [`Reconciliation::confirmed`] is set.
    pub fn apply_raw(
        &mut self,
        body: &str,
        identity: &mut SessionIdentity,
    ) -> Option<Reconciliation> {
        match serde_json::from_str::<InboundFrame>(body) {
            Ok(frame) => self.apply(frame, identity),
            Err(e) => {
                self.dropped += 1;
                warn!("dropping undecodable frame: {e} — raw: {body}");
                None
            }
        }
    }

    /// Apply one decoded frame.
    pub fn apply(
        &mut self,
        frame: InboundFrame,
        identity: &mut SessionIdentity,
    ) -> Option<Reconciliation> {
        if let Some(state) = &frame.game_state {
            if !state.is_well_formed() {
                self.dropped += 1;
                warn!(
                    cells = state.board.len(),
                    "dropping frame whose board is not 3x3"
                );
                return None;
            }
        }
        self.applied += 1;

        let InboundFrame {
            kind,
            game_state,
            participant_id,
            text,
        } = frame;

        let mut confirmed = None;
        if let Some(state) = &game_state {
            if kind == FrameKind::PlayerJoined {
                if let Some(joined_id) = participant_id.as_deref() {
                    confirmed = resolve_joined(state, joined_id, identity);
                }
            }
            match &confirmed {
                Some(participant) => {
                    debug!(participant = %participant.id, symbol = %participant.symbol, "identity confirmed");
                    identity.participant = Some(participant.clone());
                }
                None => refresh_cached(state, identity),
            }
        }

        Some(Reconciliation {
            kind,
            game_state,
            confirmed,
            status_text: text,
        })
    }
}

/// Decide whether the participant announced by a join push is us.
///
/// The announced entry must carry our display name. If we already hold a
/// participant record whose id is still in the roster under our name, that
/// record wins and a same-name newcomer is someone else.
fn resolve_joined(
    state: &GameState,
    joined_id: &str,
    identity: &SessionIdentity,
) -> Option<Participant> {
    let entry = state.participant(joined_id)?;
    if entry.display_name != identity.display_name {
        return None;
    }
    if let Some(stored_id) = identity.participant_id() {
        let stored_still_ours = stored_id != joined_id
            && state
                .participant(stored_id)
                .is_some_and(|p| p.display_name == identity.display_name);
        if stored_still_ours {
            debug!(%stored_id, %joined_id, "keeping stored participant over same-name join");
            return None;
        }
    }
    Some(entry.clone())
}

/// Re-derive the cached participant record from the new roster.
fn refresh_cached(state: &GameState, identity: &mut SessionIdentity) {
    let Some(cached) = identity.participant.as_mut() else {
        return;
    };
    if let Some(current) = state.participant(&cached.id) {
        if current != cached {
            *cached = current.clone();
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::{Cell, GameStatus, BOARD_SIZE};

    fn participant(id: &str, name: &str, symbol: &str) -> Participant {
        Participant {
            id: id.into(),
            display_name: name.into(),
            symbol: symbol.into(),
            score: 0,
            is_active: false,
            capabilities: vec![],
        }
    }

    fn state(participants: Vec<Participant>, log: usize) -> GameState {
        GameState {
            session_id: "G1".into(),
            board: (0..BOARD_SIZE as u8)
                .map(|position| Cell {
                    position,
                    ..Cell::default()
                })
                .collect(),
            participants,
            active_index: 0,
            status: GameStatus::InProgress,
            winner: None,
            move_log: (0..log).map(|i| format!("move {i}")).collect(),
            turn_count: 0,
            special_cells_enabled: true,
        }
    }

    fn joined(state: GameState, id: &str) -> InboundFrame {
        InboundFrame {
            kind: FrameKind::PlayerJoined,
            game_state: Some(state),
            participant_id: Some(id.into()),
            text: Some(format!("{id} joined")),
        }
    }

    #[test]
    fn join_push_confirms_matching_name() {
        let mut reconciler = Reconciler::new();
        let mut identity = SessionIdentity::new("G1", "Ana");

        let out = reconciler
            .apply(
                joined(state(vec![participant("p1", "Ana", "X")], 1), "p1"),
                &mut identity,
            )
            .unwrap();

        assert_eq!(out.confirmed.as_ref().map(|p| p.id.as_str()), Some("p1"));
        assert_eq!(identity.participant_id().map(String::as_str), Some("p1"));
        assert_eq!(out.status_text.as_deref(), Some("p1 joined"));
    }

    #[test]
    fn join_of_someone_else_is_not_us() {
        let mut reconciler = Reconciler::new();
        let mut identity = SessionIdentity::new("G1", "Ana");

        let roster = vec![participant("p1", "Bruno", "X")];
        let out = reconciler
            .apply(joined(state(roster, 1), "p1"), &mut identity)
            .unwrap();

        assert!(out.confirmed.is_none());
        assert!(identity.participant.is_none());
        assert!(out.game_state.is_some());
    }

    #[test]
    fn stored_id_wins_over_same_name_newcomer() {
        let mut reconciler = Reconciler::new();
        let mut identity = SessionIdentity::new("G1", "Ana");
        identity.participant = Some(participant("p1", "Ana", "X"));

        let roster = vec![participant("p1", "Ana", "X"), participant("p2", "Ana", "O")];
        let out = reconciler
            .apply(joined(state(roster, 2), "p2"), &mut identity)
            .unwrap();

        assert!(out.confirmed.is_none());
        assert_eq!(identity.participant_id().map(String::as_str), Some("p1"));
    }

    #[test]
    fn vanished_stored_id_falls_back_to_name_match() {
        let mut reconciler = Reconciler::new();
        let mut identity = SessionIdentity::new("G1", "Ana");
        identity.participant = Some(participant("old", "Ana", "X"));

        let roster = vec![participant("p9", "Ana", "X")];
        let out = reconciler
            .apply(joined(state(roster, 1), "p9"), &mut identity)
            .unwrap();

        assert_eq!(out.confirmed.map(|p| p.id), Some("p9".to_string()));
        assert_eq!(identity.participant_id().map(String::as_str), Some("p9"));
    }

    #[test]
    fn roster_updates_refresh_cached_record() {
        let mut reconciler = Reconciler::new();
        let mut identity = SessionIdentity::new("G1", "Ana");
        identity.participant = Some(participant("p1", "Ana", "X"));

        let mut me = participant("p1", "Ana", "X");
        me.score = 3;
        me.capabilities = vec!["BLOCK_CELL".into()];
        let frame = InboundFrame {
            kind: FrameKind::MoveMade,
            game_state: Some(state(vec![me.clone()], 4)),
            participant_id: Some("p1".into()),
            text: None,
        };
        let out = reconciler.apply(frame, &mut identity).unwrap();

        assert!(out.confirmed.is_none());
        assert_eq!(identity.participant, Some(me));
    }

    #[test]
    fn text_only_frame_keeps_state_untouched() {
        let mut reconciler = Reconciler::new();
        let mut identity = SessionIdentity::new("G1", "Ana");

        let out = reconciler
            .apply_raw(
                r#"{"type":"ERROR","game":null,"message":"Juego no encontrado","playerId":null}"#,
                &mut identity,
            )
            .unwrap();

        assert_eq!(out.kind, FrameKind::Error);
        assert!(out.game_state.is_none());
        assert_eq!(out.status_text.as_deref(), Some("Juego no encontrado"));
    }

    #[test]
    fn malformed_frames_are_dropped_and_counted() {
        let mut reconciler = Reconciler::new();
        let mut identity = SessionIdentity::new("G1", "Ana");

        assert!(reconciler.apply_raw("{not json", &mut identity).is_none());

        let mut bad = state(vec![], 0);
        bad.board.pop();
        let frame = InboundFrame {
            kind: FrameKind::GameUpdate,
            game_state: Some(bad),
            participant_id: None,
            text: Some("ignored".into()),
        };
        assert!(reconciler.apply(frame, &mut identity).is_none());

        assert_eq!(reconciler.dropped(), 2);
        assert_eq!(reconciler.applied(), 0);
    }
}
