//! Two-phase targeted actions.
//!
//! Some powers need a board cell as target. Selecting such a power arms the
//! coordinator; the next cell click completes the power instead of being a
//! move. Powers without a target fire immediately with [`NO_TARGET`].
//!
//! The coordinator decides *what* to send; the session core does the sending.
//! Turn ownership is checked here for plain moves only. It saves a round trip
//! and is not a security boundary: the server re-validates everything.

use crate::error::{Result, SessionError};
use crate::protocol::{GameState, PowerKind, BOARD_SIZE, NO_TARGET};

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetingState {
    #[default]
    Idle,
    /// A target-requiring power was selected; the next click is its target.
    AwaitingTarget(PowerKind),
}

/// What a user gesture resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Ask the user to choose a target cell for this power.
    PromptTarget(PowerKind),
    /// Publish a use-power request.
    UsePower { kind: PowerKind, target: i32 },
    /// Publish a move request.
    Move { position: u8 },
}

#[derive(Debug, Default)]
pub struct TargetingCoordinator {
    state: TargetingState,
}

impl TargetingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TargetingState {
        self.state
    }

    /// The power waiting for a target, if any.
    pub fn pending(&self) -> Option<PowerKind> {
        match self.state {
            TargetingState::Idle => None,
            TargetingState::AwaitingTarget(kind) => Some(kind),
        }
    }

    /// Select a power. Re-selecting while armed replaces the pending power.
    pub fn select_power(&mut self, kind: PowerKind) -> Intent {
        if kind.requires_target() {
            self.state = TargetingState::AwaitingTarget(kind);
            Intent::PromptTarget(kind)
        } else {
            self.state = TargetingState::Idle;
            Intent::UsePower {
                kind,
                target: NO_TARGET,
            }
        }
    }

    /// Resolve a click on `position` against the live `game`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidPosition`] if `position` is off the board
    /// - [`SessionError::NotYourTurn`] for a move while someone else holds the turn
    /// - [`SessionError::CellUnavailable`] for a move onto an occupied or blocked cell
    ///
    /// A rejected click leaves the state unchanged.
    pub fn on_cell_click(
        &mut self,
        position: u8,
        game: &GameState,
        local_participant_id: &str,
    ) -> Result<Intent> {
        if usize::from(position) >= BOARD_SIZE {
            return Err(SessionError::InvalidPosition(i32::from(position)));
        }

        if let TargetingState::AwaitingTarget(kind) = self.state {
            self.state = TargetingState::Idle;
            return Ok(Intent::UsePower {
                kind,
                target: i32::from(position),
            });
        }

        let my_turn = game
            .active_participant()
            .is_some_and(|p| p.id == local_participant_id);
        if !my_turn {
            return Err(SessionError::NotYourTurn);
        }
        if !game.cell(position).is_some_and(|cell| cell.is_playable()) {
            return Err(SessionError::CellUnavailable(position));
        }
        Ok(Intent::Move { position })
    }

    /// Drop a pending targeted action. Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        let was_armed = self.pending().is_some();
        self.state = TargetingState::Idle;
        was_armed
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
    use crate::protocol::{Cell, GameStatus, Participant};

    fn game(active_index: usize) -> GameState {
        let player = |id: &str, symbol: &str| Participant {
            id: id.into(),
            display_name: id.to_uppercase(),
            symbol: symbol.into(),
            score: 0,
            is_active: false,
            capabilities: vec![],
        };
        GameState {
            session_id: "G1".into(),
            board: (0..BOARD_SIZE as u8)
                .map(|position| Cell {
                    position,
                    ..Cell::default()
                })
                .collect(),
            participants: vec![player("p1", "X"), player("p2", "O")],
            active_index,
            status: GameStatus::InProgress,
            winner: None,
            move_log: vec![],
            turn_count: 0,
            special_cells_enabled: true,
        }
    }

    #[test]
    fn targeted_power_waits_for_click() {
        let mut coordinator = TargetingCoordinator::new();
        assert_eq!(
            coordinator.select_power(PowerKind::BlockCell),
            Intent::PromptTarget(PowerKind::BlockCell)
        );
        assert_eq!(coordinator.pending(), Some(PowerKind::BlockCell));

        // Targets do not depend on turn ownership.
        let intent = coordinator.on_cell_click(5, &game(1), "p1").unwrap();
        assert_eq!(
            intent,
            Intent::UsePower {
                kind: PowerKind::BlockCell,
                target: 5
            }
        );
        assert_eq!(coordinator.state(), TargetingState::Idle);
    }

    #[test]
    fn untargeted_power_fires_immediately() {
        let mut coordinator = TargetingCoordinator::new();
        assert_eq!(
            coordinator.select_power(PowerKind::ExtraTurn),
            Intent::UsePower {
                kind: PowerKind::ExtraTurn,
                target: NO_TARGET
            }
        );
        assert_eq!(coordinator.state(), TargetingState::Idle);
    }

    #[test]
    fn reselect_replaces_pending_power() {
        let mut coordinator = TargetingCoordinator::new();
        coordinator.select_power(PowerKind::BlockCell);
        coordinator.select_power(PowerKind::RevealTrap);
        assert_eq!(coordinator.pending(), Some(PowerKind::RevealTrap));

        coordinator.select_power(PowerKind::SwapPieces);
        assert_eq!(coordinator.pending(), None);
    }

    #[test]
    fn cancel_returns_to_idle() {
        let mut coordinator = TargetingCoordinator::new();
        assert!(!coordinator.cancel());
        coordinator.select_power(PowerKind::RemoveOpponent);
        assert!(coordinator.cancel());
        assert_eq!(coordinator.state(), TargetingState::Idle);
    }

    #[test]
    fn idle_click_is_a_move_on_my_turn() {
        let mut coordinator = TargetingCoordinator::new();
        assert_eq!(
            coordinator.on_cell_click(4, &game(0), "p1").unwrap(),
            Intent::Move { position: 4 }
        );
    }

    #[test]
    fn idle_click_off_turn_is_rejected() {
        let mut coordinator = TargetingCoordinator::new();
        let err = coordinator.on_cell_click(4, &game(1), "p1").unwrap_err();
        assert!(matches!(err, SessionError::NotYourTurn));
    }

    #[test]
    fn move_needs_game_in_progress() {
        let mut coordinator = TargetingCoordinator::new();
        let mut waiting = game(0);
        waiting.status = GameStatus::Waiting;
        assert!(matches!(
            coordinator.on_cell_click(4, &waiting, "p1"),
            Err(SessionError::NotYourTurn)
        ));
    }

    #[test]
    fn occupied_cell_is_rejected_for_moves() {
        let mut coordinator = TargetingCoordinator::new();
        let mut state = game(0);
        state.board[2].value = Some("O".into());
        state.board[3].is_blocked = true;
        assert!(matches!(
            coordinator.on_cell_click(2, &state, "p1"),
            Err(SessionError::CellUnavailable(2))
        ));
        assert!(matches!(
            coordinator.on_cell_click(3, &state, "p1"),
            Err(SessionError::CellUnavailable(3))
        ));
    }

    #[test]
    fn off_board_click_keeps_pending_power() {
        let mut coordinator = TargetingCoordinator::new();
        coordinator.select_power(PowerKind::BlockCell);
        assert!(matches!(
            coordinator.on_cell_click(9, &game(0), "p1"),
            Err(SessionError::InvalidPosition(9))
        ));
        assert_eq!(coordinator.pending(), Some(PowerKind::BlockCell));
    }
}
