#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-format tests for the session client.
//!
//! Verifies that protocol types decode the JSON the game server actually
//! sends (Jackson naming, extra fields, `ACTIVE` status) and that outgoing
//! requests and STOMP frames are encoded the way the server expects.

use ttt_session_client::protocol::{
    session_topic, CellType, FrameKind, GameState, GameStatus, InboundFrame, JoinRequest,
    MoveRequest, PowerKind, PowerRequest, BOARD_SIZE, NO_TARGET,
};
use ttt_session_client::stomp::{decode_frames, Command, Frame};

// ════════════════════════════════════════════════════════════════════
// Fixtures
// ════════════════════════════════════════════════════════════════════

/// A `MOVE_MADE` push as serialized by the server, timestamps included.
const MOVE_MADE_FIXTURE: &str = r#"{
  "type": "MOVE_MADE",
  "game": {
    "gameId": "a1b2c3d4",
    "players": [
      { "id": "p-1", "username": "Ana", "symbol": "X", "score": 10,
        "powers": ["EXTRA_TURN", "BLOCK_CELL"], "active": false },
      { "id": "p-2", "username": "Bruno", "symbol": "O", "score": 0,
        "powers": [], "active": true }
    ],
    "board": [
      { "position": 0, "value": "X", "type": "NORMAL", "revealed": false, "blocked": false, "blockedTurns": 0 },
      { "position": 1, "value": null, "type": "TRAP", "revealed": true, "blocked": false, "blockedTurns": 0 },
      { "position": 2, "value": null, "type": "POWER", "revealed": false, "blocked": true, "blockedTurns": 2 },
      { "position": 3, "value": null, "type": "NORMAL", "revealed": false, "blocked": false, "blockedTurns": 0 },
      { "position": 4, "value": null, "type": "FAKE", "revealed": false, "blocked": false, "blockedTurns": 0 },
      { "position": 5, "value": null, "type": "NORMAL", "revealed": false, "blocked": false, "blockedTurns": 0 },
      { "position": 6, "value": null, "type": "DOUBLE_POINTS", "revealed": false, "blocked": false, "blockedTurns": 0 },
      { "position": 7, "value": null, "type": "REVERSE", "revealed": false, "blocked": false, "blockedTurns": 0 },
      { "position": 8, "value": null, "type": "NORMAL", "revealed": false, "blocked": false, "blockedTurns": 0 }
    ],
    "currentPlayerIndex": 1,
    "status": "ACTIVE",
    "winner": null,
    "createdAt": "2025-10-01T12:00:00",
    "updatedAt": "2025-10-01T12:00:05",
    "turnCount": 1,
    "specialCellsEnabled": true,
    "gameLog": ["Ana colocó X en la posición 0"]
  },
  "message": "Ana jugó en la posición 0",
  "playerId": "p-1"
}"#;

fn decode_fixture() -> InboundFrame {
    serde_json::from_str(MOVE_MADE_FIXTURE).expect("fixture decodes")
}

// ════════════════════════════════════════════════════════════════════
// Inbound frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn server_frame_decodes() {
    let frame = decode_fixture();
    assert_eq!(frame.kind, FrameKind::MoveMade);
    assert_eq!(frame.participant_id.as_deref(), Some("p-1"));
    assert_eq!(frame.text.as_deref(), Some("Ana jugó en la posición 0"));

    let game = frame.game_state.expect("game");
    assert!(game.is_well_formed());
    assert_eq!(game.session_id, "a1b2c3d4");
    assert_eq!(game.status, GameStatus::InProgress);
    assert_eq!(game.move_log.len(), 1);
    assert_eq!(game.turn_count, 1);
    assert_eq!(game.active_participant().map(|p| p.id.as_str()), Some("p-2"));
}

#[test]
fn participants_keep_capabilities_in_order() {
    let game = decode_fixture().game_state.unwrap();
    let ana = game.participant("p-1").unwrap();
    assert_eq!(ana.display_name, "Ana");
    assert_eq!(ana.score, 10);
    assert_eq!(ana.capabilities, vec!["EXTRA_TURN", "BLOCK_CELL"]);
    assert!(!ana.is_active);
    assert!(game.participant("p-2").unwrap().is_active);
}

#[test]
fn cells_decode_jackson_boolean_names() {
    let game = decode_fixture().game_state.unwrap();

    let taken = game.cell(0).unwrap();
    assert!(taken.is_occupied());
    assert!(!taken.is_playable());

    let trap = game.cell(1).unwrap();
    assert_eq!(trap.visible_type(), Some(CellType::Trap));
    assert!(trap.is_playable());

    let blocked = game.cell(2).unwrap();
    assert!(blocked.is_blocked);
    assert_eq!(blocked.blocked_turns, 2);
    assert_eq!(blocked.visible_type(), None);
    assert!(!blocked.is_playable());

    assert!(game.cell(BOARD_SIZE as u8).is_none());
}

#[test]
fn every_frame_kind_decodes() {
    for (wire, kind) in [
        ("GAME_UPDATE", FrameKind::GameUpdate),
        ("PLAYER_JOINED", FrameKind::PlayerJoined),
        ("PLAYER_LEFT", FrameKind::PlayerLeft),
        ("MOVE_MADE", FrameKind::MoveMade),
        ("GAME_OVER", FrameKind::GameOver),
        ("ERROR", FrameKind::Error),
        ("SOMETHING_NEW", FrameKind::Unknown),
    ] {
        let frame: InboundFrame =
            serde_json::from_str(&format!(r#"{{"type":"{wire}"}}"#)).unwrap();
        assert_eq!(frame.kind, kind, "{wire}");
        assert!(frame.game_state.is_none());
    }
}

#[test]
fn error_frame_carries_only_text() {
    let frame: InboundFrame =
        serde_json::from_str(r#"{"type":"ERROR","game":null,"message":"No es tu turno","playerId":null}"#)
            .unwrap();
    assert_eq!(frame.kind, FrameKind::Error);
    assert!(frame.game_state.is_none());
    assert!(frame.participant_id.is_none());
    assert_eq!(frame.text.as_deref(), Some("No es tu turno"));
}

#[test]
fn minimal_game_uses_defaults() {
    let board: Vec<String> = (0..9).map(|i| format!(r#"{{"position":{i}}}"#)).collect();
    let json = format!(r#"{{"gameId":"G1","board":[{}]}}"#, board.join(","));
    let game: GameState = serde_json::from_str(&json).unwrap();

    assert_eq!(game.status, GameStatus::Waiting);
    assert!(game.participants.is_empty());
    assert!(game.move_log.is_empty());
    assert!(game.special_cells_enabled);
    assert!(game.active_participant().is_none());
}

#[test]
fn game_without_board_is_rejected() {
    assert!(serde_json::from_str::<GameState>(r#"{"gameId":"G1"}"#).is_err());
}

#[test]
fn finished_game_has_no_active_participant() {
    let mut game = decode_fixture().game_state.unwrap();
    game.status = GameStatus::Finished;
    game.winner = Some("p-1".into());
    assert!(game.active_participant().is_none());
}

// ════════════════════════════════════════════════════════════════════
// Outgoing requests
// ════════════════════════════════════════════════════════════════════

#[test]
fn join_request_encodes_server_names() {
    let req = JoinRequest {
        session_id: "G1".into(),
        display_name: "Ana".into(),
    };
    assert_eq!(
        serde_json::to_value(&req).unwrap(),
        serde_json::json!({ "gameId": "G1", "username": "Ana" })
    );
}

#[test]
fn move_request_encodes_server_names() {
    let req = MoveRequest {
        session_id: "G1".into(),
        participant_id: "p1".into(),
        position: 4,
    };
    assert_eq!(
        serde_json::to_value(&req).unwrap(),
        serde_json::json!({ "gameId": "G1", "playerId": "p1", "position": 4 })
    );
}

#[test]
fn power_request_encodes_each_kind() {
    for kind in PowerKind::ALL {
        let req = PowerRequest {
            session_id: "G1".into(),
            participant_id: "p1".into(),
            power_kind: kind,
            target_position: if kind.requires_target() { 5 } else { NO_TARGET },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["powerType"], kind.as_str());
        assert_eq!(json["targetPosition"], req.target_position);
    }
}

#[test]
fn topic_names_follow_session_id() {
    assert_eq!(session_topic("a1b2c3d4"), "/topic/game/a1b2c3d4");
}

// ════════════════════════════════════════════════════════════════════
// STOMP framing
// ════════════════════════════════════════════════════════════════════

#[test]
fn outgoing_send_frame_is_null_terminated() {
    let body = serde_json::json!({ "gameId": "G1", "username": "Ana" }).to_string();
    let raw = Frame::send("/app/game/join", body.clone()).encode();

    assert!(raw.starts_with("SEND\n"));
    assert!(raw.ends_with('\0'));
    assert!(raw.contains("destination:/app/game/join\n"));

    let decoded = decode_frames(&raw).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].command, Command::Send);
    assert_eq!(decoded[0].body, body);
}

#[test]
fn server_message_frame_with_fixture_body() {
    let raw = format!(
        "MESSAGE\ndestination:/topic/game/a1b2c3d4\ncontent-type:application/json\nsubscription:sub-1\nmessage-id:abc-1\n\n{MOVE_MADE_FIXTURE}\0"
    );
    let frames = decode_frames(&raw).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header("subscription"), Some("sub-1"));

    let frame: InboundFrame = serde_json::from_str(&frames[0].body).unwrap();
    assert_eq!(frame.kind, FrameKind::MoveMade);
}

#[test]
fn heartbeats_between_frames_are_skipped() {
    let raw = "\n\nCONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0\n";
    let frames = decode_frames(raw).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, Command::Connected);
    assert_eq!(frames[0].header("version"), Some("1.2"));
}

#[test]
fn connect_frame_negotiates_stomp_12() {
    let frame = Frame::connect("localhost");
    assert_eq!(frame.command, Command::Connect);
    assert_eq!(frame.header("host"), Some("localhost"));
    assert!(frame.header("accept-version").unwrap().contains("1.2"));
}
