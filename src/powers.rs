//! Power-acquisition watcher.
//!
//! Capabilities are append-only during a game, so a longer list than last time
//! means the newest entry was just granted. The watcher turns that into a
//! one-shot [`Notice`]; the session driver shows it for
//! [`DEFAULT_NOTICE_DURATION`] and then expires it.

use std::time::Duration;

use tracing::debug;

use crate::protocol::{GameState, ParticipantId, PowerKind};

/// How long a notice stays up unless dismissed earlier.
pub const DEFAULT_NOTICE_DURATION: Duration = Duration::from_secs(4);

/// Identifier of a notice, unique within one session.
pub type NoticeId = u64;

/// A newly granted capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: NoticeId,
    /// Wire name of the granted capability.
    pub capability: String,
    /// Ready-to-display text.
    pub message: String,
}

impl Notice {
    /// The capability as a known power, if it is one.
    pub fn power_kind(&self) -> Option<PowerKind> {
        self.capability.parse().ok()
    }
}

/// Human-readable name for a capability wire name.
pub fn capability_label(capability: &str) -> String {
    match capability.parse::<PowerKind>() {
        Ok(kind) => kind.display_name().to_string(),
        Err(_) => capability.replace('_', " "),
    }
}

#[derive(Debug, Default)]
pub struct PowerWatcher {
    tracked: Option<ParticipantId>,
    seen: usize,
    next_id: NoticeId,
}

impl PowerWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of capabilities observed last time for the tracked participant.
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Compare the local participant's capabilities in `state` with the last
    /// observation.
    pub fn observe(&mut self, state: &GameState, local: Option<&str>) -> Option<Notice> {
        if self.tracked.as_deref() != local {
            self.tracked = local.map(str::to_string);
            self.seen = 0;
        }
        let participant = state.participant(local?)?;

        let current = participant.capabilities.len();
        let previous = std::mem::replace(&mut self.seen, current);
        if current <= previous {
            return None;
        }

        let capability = participant.capabilities.last()?.clone();
        self.next_id += 1;
        debug!(%capability, previous, current, "new capability granted");
        Some(Notice {
            id: self.next_id,
            message: format!("New power: {}!", capability_label(&capability)),
            capability,
        })
    }

    /// Forget the tracked participant.
    pub fn reset(&mut self) {
        self.tracked = None;
        self.seen = 0;
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
    use crate::protocol::{Cell, GameStatus, Participant, BOARD_SIZE};

    fn state(caps: &[&str]) -> GameState {
        GameState {
            session_id: "G1".into(),
            board: vec![Cell::default(); BOARD_SIZE],
            participants: vec![Participant {
                id: "p1".into(),
                display_name: "Ana".into(),
                symbol: "X".into(),
                score: 0,
                is_active: true,
                capabilities: caps.iter().map(|c| c.to_string()).collect(),
            }],
            active_index: 0,
            status: GameStatus::InProgress,
            winner: None,
            move_log: vec![],
            turn_count: 0,
            special_cells_enabled: true,
        }
    }

    #[test]
    fn grant_emits_exactly_one_notice() {
        let mut watcher = PowerWatcher::new();
        assert!(watcher.observe(&state(&[]), Some("p1")).is_none());

        let notice = watcher.observe(&state(&["EXTRA_TURN"]), Some("p1")).unwrap();
        assert_eq!(notice.capability, "EXTRA_TURN");
        assert_eq!(notice.power_kind(), Some(PowerKind::ExtraTurn));
        assert_eq!(notice.message, "New power: Extra Turn!");

        assert!(watcher.observe(&state(&["EXTRA_TURN"]), Some("p1")).is_none());
    }

    #[test]
    fn notice_names_the_newest_capability() {
        let mut watcher = PowerWatcher::new();
        watcher.observe(&state(&["EXTRA_TURN"]), Some("p1"));
        let notice = watcher
            .observe(&state(&["EXTRA_TURN", "BLOCK_CELL"]), Some("p1"))
            .unwrap();
        assert_eq!(notice.capability, "BLOCK_CELL");
    }

    #[test]
    fn spending_a_power_resyncs_silently() {
        let mut watcher = PowerWatcher::new();
        watcher.observe(&state(&["EXTRA_TURN", "BLOCK_CELL"]), Some("p1"));
        assert!(watcher.observe(&state(&["BLOCK_CELL"]), Some("p1")).is_none());
        assert_eq!(watcher.seen(), 1);

        let notice = watcher
            .observe(&state(&["BLOCK_CELL", "SWAP_PIECES"]), Some("p1"))
            .unwrap();
        assert_eq!(notice.capability, "SWAP_PIECES");
    }

    #[test]
    fn missing_participant_keeps_count() {
        let mut watcher = PowerWatcher::new();
        watcher.observe(&state(&["EXTRA_TURN"]), Some("p1"));
        let mut gone = state(&[]);
        gone.participants.clear();
        assert!(watcher.observe(&gone, Some("p1")).is_none());
        assert_eq!(watcher.seen(), 1);
    }

    #[test]
    fn identity_change_restarts_from_zero() {
        let mut watcher = PowerWatcher::new();
        watcher.observe(&state(&["EXTRA_TURN"]), Some("p1"));

        let mut other = state(&["EXTRA_TURN"]);
        other.participants[0].id = "p2".into();
        let notice = watcher.observe(&other, Some("p2")).unwrap();
        assert_eq!(notice.capability, "EXTRA_TURN");
    }

    #[test]
    fn notice_ids_increase() {
        let mut watcher = PowerWatcher::new();
        let a = watcher.observe(&state(&["EXTRA_TURN"]), Some("p1")).unwrap();
        let b = watcher
            .observe(&state(&["EXTRA_TURN", "TRIPLE_PLAY"]), Some("p1"))
            .unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn unknown_capabilities_get_a_readable_label() {
        assert_eq!(capability_label("DOUBLE_DOWN"), "DOUBLE DOWN");
        assert_eq!(capability_label("REVEAL_TRAP"), "Reveal Trap");
    }
}
