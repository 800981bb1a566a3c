//! Wire-compatible protocol types for the game server.
//!
//! Field names follow the server's JSON (camelCase, e.g. `gameId`,
//! `currentPlayerIndex`, `gameLog`). Rust-side names describe the session
//! model instead (`session_id`, `active_index`, `move_log`).
//!
//! The server serializes boolean `isX` properties as `x`, so both spellings
//! are accepted on input.
//!
//! [`GameState`] is always a **total** snapshot of the game. The server never
//! sends deltas, and client code must never merge a new state into an old one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of cells on the board.
pub const BOARD_SIZE: usize = 9;

/// Target position sent with powers that need no target.
pub const NO_TARGET: i32 = -1;

/// Identifier of a game session (the server calls it `gameId`).
pub type SessionId = String;

/// Identifier of a participant (the server calls it `playerId`).
pub type ParticipantId = String;

// ── Destinations ────────────────────────────────────────────────────

/// Where join requests are published.
pub const JOIN_DESTINATION: &str = "/app/game/join";

/// Where move requests are published.
pub const MOVE_DESTINATION: &str = "/app/game/move";

/// Where power requests are published.
pub const POWER_DESTINATION: &str = "/app/game/power";

/// Topic carrying every push for one session.
pub fn session_topic(session_id: &str) -> String {
    format!("/topic/game/{session_id}")
}

// ── Enums ───────────────────────────────────────────────────────────

/// Lifecycle of a game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    /// Waiting for enough participants.
    #[default]
    Waiting,
    /// Turns are being played. The server spells this `ACTIVE`.
    #[serde(alias = "ACTIVE")]
    InProgress,
    Paused,
    Finished,
}

/// Special cell kinds. Only meaningful for display once the cell is revealed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CellType {
    #[default]
    Normal,
    /// Playing here costs a turn.
    Trap,
    /// Playing here grants a random power.
    Power,
    /// The piece placed here vanishes after two turns.
    Fake,
    /// Worth double if the winning line uses it.
    DoublePoints,
    /// Reverses turn order for a while.
    Reverse,
}

/// Kind of inbound frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameKind {
    GameUpdate,
    PlayerJoined,
    PlayerLeft,
    MoveMade,
    GameOver,
    Error,
    /// Any kind this client does not know about. Still applied.
    #[serde(other)]
    Unknown,
}

/// Powers a participant can hold.
///
/// On the wire capabilities stay plain strings, so kinds this client does not
/// know are still carried and displayed by name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerKind {
    ExtraTurn,
    RemoveOpponent,
    SwapPieces,
    RevealTrap,
    BlockCell,
    TriplePlay,
}

impl PowerKind {
    /// Every known power.
    pub const ALL: [PowerKind; 6] = [
        Self::ExtraTurn,
        Self::RemoveOpponent,
        Self::SwapPieces,
        Self::RevealTrap,
        Self::BlockCell,
        Self::TriplePlay,
    ];

    /// Wire name, e.g. `"BLOCK_CELL"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtraTurn => "EXTRA_TURN",
            Self::RemoveOpponent => "REMOVE_OPPONENT",
            Self::SwapPieces => "SWAP_PIECES",
            Self::RevealTrap => "REVEAL_TRAP",
            Self::BlockCell => "BLOCK_CELL",
            Self::TriplePlay => "TRIPLE_PLAY",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ExtraTurn => "Extra Turn",
            Self::RemoveOpponent => "Remove Opponent",
            Self::SwapPieces => "Swap Pieces",
            Self::RevealTrap => "Reveal Trap",
            Self::BlockCell => "Block Cell",
            Self::TriplePlay => "Triple Play",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ExtraTurn => "Play twice in a row",
            Self::RemoveOpponent => "Remove one opponent piece",
            Self::SwapPieces => "Swap two pieces",
            Self::RevealTrap => "Reveal every trap",
            Self::BlockCell => "Block a cell for two turns",
            Self::TriplePlay => "Place three pieces at once",
        }
    }

    /// Whether using this power needs a target cell.
    pub fn requires_target(&self) -> bool {
        matches!(
            self,
            Self::RemoveOpponent | Self::BlockCell | Self::RevealTrap
        )
    }
}

impl fmt::Display for PowerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known [`PowerKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPowerKind(pub String);

impl fmt::Display for UnknownPowerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown power kind {:?}", self.0)
    }
}

impl std::error::Error for UnknownPowerKind {}

impl FromStr for PowerKind {
    type Err = UnknownPowerKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownPowerKind(s.to_string()))
    }
}

// ── Structs ─────────────────────────────────────────────────────────

/// One board cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub position: u8,
    /// Symbol of the occupying participant. Once set, the cell is taken.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, rename = "isBlocked", alias = "blocked")]
    pub is_blocked: bool,
    #[serde(default, rename = "isRevealed", alias = "revealed")]
    pub is_revealed: bool,
    #[serde(default, rename = "type")]
    pub cell_type: CellType,
    #[serde(default)]
    pub blocked_turns: u32,
}

impl Cell {
    pub fn is_occupied(&self) -> bool {
        self.value.as_deref().is_some_and(|v| !v.is_empty())
    }

    /// A cell can receive a move when it is neither occupied nor blocked.
    pub fn is_playable(&self) -> bool {
        !self.is_occupied() && !self.is_blocked
    }

    /// The cell type, once it has been revealed.
    pub fn visible_type(&self) -> Option<CellType> {
        self.is_revealed.then_some(self.cell_type)
    }
}

/// A participant in the roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    #[serde(rename = "username")]
    pub display_name: String,
    pub symbol: String,
    #[serde(default)]
    pub score: i32,
    #[serde(default, rename = "isActive", alias = "active")]
    pub is_active: bool,
    /// Granted powers, oldest first.
    #[serde(default, rename = "powers")]
    pub capabilities: Vec<String>,
}

/// The complete authoritative game state pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    #[serde(rename = "gameId")]
    pub session_id: SessionId,
    pub board: Vec<Cell>,
    #[serde(default, rename = "players")]
    pub participants: Vec<Participant>,
    #[serde(default, rename = "currentPlayerIndex")]
    pub active_index: usize,
    #[serde(default)]
    pub status: GameStatus,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default, rename = "gameLog")]
    pub move_log: Vec<String>,
    #[serde(default)]
    pub turn_count: u32,
    #[serde(default = "default_special_cells")]
    pub special_cells_enabled: bool,
}

fn default_special_cells() -> bool {
    true
}

impl GameState {
    /// Whether the board has exactly [`BOARD_SIZE`] cells.
    pub fn is_well_formed(&self) -> bool {
        self.board.len() == BOARD_SIZE
    }

    /// The participant holding the turn. `None` unless the game is in
    /// progress and `active_index` is in range.
    pub fn active_participant(&self) -> Option<&Participant> {
        if self.status != GameStatus::InProgress {
            return None;
        }
        self.participants.get(self.active_index)
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn cell(&self, position: u8) -> Option<&Cell> {
        self.board.get(usize::from(position))
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// A frame pushed on the session topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Full replacement state, when the push carries one.
    #[serde(default, rename = "game")]
    pub game_state: Option<GameState>,
    #[serde(default, rename = "playerId")]
    pub participant_id: Option<ParticipantId>,
    /// Human-readable text from the server.
    #[serde(default, rename = "message")]
    pub text: Option<String>,
}

/// Payload for [`JOIN_DESTINATION`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRequest {
    #[serde(rename = "gameId")]
    pub session_id: SessionId,
    #[serde(rename = "username")]
    pub display_name: String,
}

/// Payload for [`MOVE_DESTINATION`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveRequest {
    #[serde(rename = "gameId")]
    pub session_id: SessionId,
    #[serde(rename = "playerId")]
    pub participant_id: ParticipantId,
    pub position: u8,
}

/// Payload for [`POWER_DESTINATION`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PowerRequest {
    #[serde(rename = "gameId")]
    pub session_id: SessionId,
    #[serde(rename = "playerId")]
    pub participant_id: ParticipantId,
    #[serde(rename = "powerType")]
    pub power_kind: PowerKind,
    /// Board position, or [`NO_TARGET`].
    #[serde(rename = "targetPosition")]
    pub target_position: i32,
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

    #[test]
    fn power_kind_parses_wire_names() {
        for kind in PowerKind::ALL {
            assert_eq!(kind.as_str().parse::<PowerKind>(), Ok(kind));
        }
        assert!("FLY".parse::<PowerKind>().is_err());
    }

    #[test]
    fn target_requiring_set_is_fixed() {
        let targeted: Vec<_> = PowerKind::ALL
            .into_iter()
            .filter(PowerKind::requires_target)
            .collect();
        assert_eq!(
            targeted,
            vec![
                PowerKind::RemoveOpponent,
                PowerKind::RevealTrap,
                PowerKind::BlockCell
            ]
        );
    }

    #[test]
    fn cell_accepts_both_boolean_spellings() {
        let a: Cell =
            serde_json::from_str(r#"{"position":3,"value":null,"blocked":true,"revealed":true,"type":"TRAP"}"#)
                .unwrap();
        let b: Cell = serde_json::from_str(
            r#"{"position":3,"isBlocked":true,"isRevealed":true,"type":"TRAP"}"#,
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.visible_type(), Some(CellType::Trap));
        assert!(!a.is_playable());
    }

    #[test]
    fn hidden_cell_type_is_not_visible() {
        let cell: Cell = serde_json::from_str(r#"{"position":0,"type":"POWER"}"#).unwrap();
        assert_eq!(cell.visible_type(), None);
        assert!(cell.is_playable());
    }

    #[test]
    fn empty_value_does_not_occupy() {
        let cell = Cell {
            value: Some(String::new()),
            ..Cell::default()
        };
        assert!(!cell.is_occupied());
    }

    #[test]
    fn active_status_maps_to_in_progress() {
        let status: GameStatus = serde_json::from_str(r#""ACTIVE""#).unwrap();
        assert_eq!(status, GameStatus::InProgress);
        assert_eq!(serde_json::to_string(&status).unwrap(), r#""IN_PROGRESS""#);
    }

    #[test]
    fn unknown_frame_kind_still_decodes() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"CHAT","message":"hola"}"#).unwrap();
        assert_eq!(frame.kind, FrameKind::Unknown);
        assert_eq!(frame.text.as_deref(), Some("hola"));
    }

    #[test]
    fn power_request_uses_server_field_names() {
        let req = PowerRequest {
            session_id: "G1".into(),
            participant_id: "p1".into(),
            power_kind: PowerKind::ExtraTurn,
            target_position: NO_TARGET,
        };
        let json: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "gameId": "G1",
                "playerId": "p1",
                "powerType": "EXTRA_TURN",
                "targetPosition": -1
            })
        );
    }

    #[test]
    fn active_participant_requires_in_progress() {
        let mut state = GameState {
            session_id: "G1".into(),
            board: vec![Cell::default(); BOARD_SIZE],
            participants: vec![Participant {
                id: "p1".into(),
                display_name: "Ana".into(),
                symbol: "X".into(),
                score: 0,
                is_active: true,
                capabilities: vec![],
            }],
            active_index: 0,
            status: GameStatus::Waiting,
            winner: None,
            move_log: vec![],
            turn_count: 0,
            special_cells_enabled: true,
        };
        assert!(state.active_participant().is_none());
        state.status = GameStatus::InProgress;
        assert_eq!(state.active_participant().map(|p| p.id.as_str()), Some("p1"));
        state.active_index = 5;
        assert!(state.active_participant().is_none());
    }
}
