//! Snapshot history for time-travel viewing.
//!
//! One snapshot is captured each time the move log grows. Snapshots are deep
//! copies held behind [`Arc`], so viewers share them without ever aliasing the
//! live state. A shrinking move log or a different session id starts a new
//! logical stream and clears the history.

use std::sync::Arc;

use tracing::debug;

use crate::protocol::{Cell, GameState, GameStatus, Participant, SessionId};

/// An immutable copy of the authoritative state at one point of the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Zero-based position of this snapshot in the history.
    pub sequence_number: usize,
    pub board: Vec<Cell>,
    pub participants: Vec<Participant>,
    pub active_index: usize,
    pub status: GameStatus,
    pub winner: Option<String>,
    /// Length of the move log when the snapshot was taken.
    pub move_count: usize,
    /// Newest move log entry at capture time.
    pub last_entry: Option<String>,
}

impl Snapshot {
    fn capture(state: &GameState, sequence_number: usize) -> Self {
        Self {
            sequence_number,
            board: state.board.clone(),
            participants: state.participants.clone(),
            active_index: state.active_index,
            status: state.status,
            winner: state.winner.clone(),
            move_count: state.move_log.len(),
            last_entry: state.move_log.last().cloned(),
        }
    }
}

/// What [`HistoryRecorder::observe`] did with a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// The move log did not grow.
    Unchanged,
    /// A snapshot with this sequence number was appended.
    Appended(usize),
    /// The stream restarted; the history was cleared first.
    Reset { appended: Option<usize> },
}

/// Ordered, append-only log of [`Snapshot`]s for one game instance.
#[derive(Debug, Default)]
pub struct HistoryRecorder {
    snapshots: Vec<Arc<Snapshot>>,
    session_id: Option<SessionId>,
    last_move_count: usize,
}

impl HistoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the latest authoritative state.
    pub fn observe(&mut self, state: &GameState) -> Recorded {
        let moves = state.move_log.len();
        let new_session = self
            .session_id
            .as_deref()
            .is_some_and(|id| id != state.session_id);
        let restarted = new_session || moves < self.last_move_count;

        if restarted {
            debug!(
                session = %state.session_id,
                previous = self.snapshots.len(),
                "move log restarted, clearing history"
            );
            self.clear();
        }
        self.session_id = Some(state.session_id.clone());

        let appended = if moves > self.last_move_count {
            let sequence_number = self.snapshots.len();
            self.snapshots
                .push(Arc::new(Snapshot::capture(state, sequence_number)));
            self.last_move_count = moves;
            Some(sequence_number)
        } else {
            None
        };

        match (restarted, appended) {
            (true, appended) => Recorded::Reset { appended },
            (false, Some(n)) => Recorded::Appended(n),
            (false, None) => Recorded::Unchanged,
        }
    }

    /// Look up a snapshot by sequence number.
    pub fn select(&self, sequence_number: usize) -> Option<&Arc<Snapshot>> {
        self.snapshots.get(sequence_number)
    }

    pub fn latest(&self) -> Option<&Arc<Snapshot>> {
        self.snapshots.last()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Snapshot>> {
        self.snapshots.iter()
    }

    /// Forget every snapshot, e.g. after a restart or when leaving.
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.session_id = None;
        self.last_move_count = 0;
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
    use crate::protocol::BOARD_SIZE;

    fn state_with_log(session: &str, moves: usize) -> GameState {
        GameState {
            session_id: session.into(),
            board: vec![Cell::default(); BOARD_SIZE],
            participants: vec![],
            active_index: 0,
            status: GameStatus::InProgress,
            winner: None,
            move_log: (0..moves).map(|i| format!("move {i}")).collect(),
            turn_count: 0,
            special_cells_enabled: true,
        }
    }

    #[test]
    fn same_state_twice_records_once() {
        let mut history = HistoryRecorder::new();
        let state = state_with_log("G1", 1);
        assert_eq!(history.observe(&state), Recorded::Appended(0));
        assert_eq!(history.observe(&state), Recorded::Unchanged);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn sequence_tracks_move_log() {
        let mut history = HistoryRecorder::new();
        for moves in 1..=5 {
            history.observe(&state_with_log("G1", moves));
            let latest = history.latest().unwrap();
            assert_eq!(latest.sequence_number, moves - 1);
            assert_eq!(latest.move_count, moves);
            assert_eq!(latest.last_entry.as_deref(), Some(format!("move {}", moves - 1).as_str()));
        }
        let numbers: Vec<_> = history.iter().map(|s| s.sequence_number).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn empty_log_records_nothing() {
        let mut history = HistoryRecorder::new();
        assert_eq!(history.observe(&state_with_log("G1", 0)), Recorded::Unchanged);
        assert!(history.is_empty());
    }

    #[test]
    fn status_only_change_is_not_recorded() {
        let mut history = HistoryRecorder::new();
        let mut state = state_with_log("G1", 2);
        history.observe(&state);
        state.status = GameStatus::Finished;
        assert_eq!(history.observe(&state), Recorded::Unchanged);
        assert_eq!(history.select(0).unwrap().status, GameStatus::InProgress);
    }

    #[test]
    fn snapshots_do_not_alias_live_state() {
        let mut history = HistoryRecorder::new();
        let mut state = state_with_log("G1", 1);
        history.observe(&state);

        state.board[4].value = Some("X".into());
        state.move_log.push("X at 4".into());
        history.observe(&state);

        assert_eq!(history.select(0).unwrap().board[4].value, None);
        assert_eq!(history.select(1).unwrap().board[4].value.as_deref(), Some("X"));
    }

    #[test]
    fn shrinking_log_starts_a_new_stream() {
        let mut history = HistoryRecorder::new();
        history.observe(&state_with_log("G1", 3));
        history.observe(&state_with_log("G1", 4));

        assert_eq!(
            history.observe(&state_with_log("G1", 0)),
            Recorded::Reset { appended: None }
        );
        assert!(history.is_empty());

        assert_eq!(history.observe(&state_with_log("G1", 1)), Recorded::Appended(0));
    }

    #[test]
    fn different_session_starts_a_new_stream() {
        let mut history = HistoryRecorder::new();
        history.observe(&state_with_log("G1", 3));
        assert_eq!(
            history.observe(&state_with_log("G2", 5)),
            Recorded::Reset { appended: Some(0) }
        );
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().unwrap().move_count, 5);
    }

    #[test]
    fn select_out_of_range_is_none() {
        let mut history = HistoryRecorder::new();
        history.observe(&state_with_log("G1", 1));
        assert!(history.select(0).is_some());
        assert!(history.select(1).is_none());
    }
}
