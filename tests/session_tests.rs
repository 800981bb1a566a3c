#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end session tests.
//!
//! Drives a real `GameSession` over a real `PubSubChannel`, with the scripted
//! STOMP server from `tests/common` on the other end. Time is paused so the
//! reconnect, rejoin and notice timers run instantly.

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use ttt_session_client::identity::{KEY_DISPLAY_NAME, KEY_PARTICIPANT, KEY_SESSION_ID};
use ttt_session_client::stomp::Command;
use ttt_session_client::{
    FileStore, GameSession, IdentityStore, MemoryStore, PowerKind, ReconnectState, SessionConfig,
    SessionError, SessionEvent, TargetingState,
};

use common::{
    ana_joined_json, frame_json, game_json, player_json, stomp_server, MockConnector, MockServer,
};

const TOPIC: &str = "/topic/game/G1";

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn start(
    servers: usize,
    store: impl IdentityStore,
) -> (GameSession, mpsc::Receiver<SessionEvent>, Vec<MockServer>) {
    let (transports, servers): (Vec<_>, Vec<_>) = (0..servers).map(|_| stomp_server()).unzip();
    let (session, events) = GameSession::start(
        MockConnector::new(transports),
        store,
        SessionConfig::default(),
    );
    (session, events, servers)
}

/// Let the session and channel tasks drain their queues.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Consume events up to and including the first one matching `pred`.
async fn wait_for(
    events: &mut mpsc::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let ev = events.recv().await.expect("event stream ended");
        if pred(&ev) {
            return ev;
        }
    }
}

async fn wait_connected(events: &mut mpsc::Receiver<SessionEvent>) {
    wait_for(events, |e| *e == SessionEvent::Connected).await;
}

/// Join G1 as Ana and let the server confirm her as `p1`.
async fn join_as_ana(
    session: &GameSession,
    events: &mut mpsc::Receiver<SessionEvent>,
    server: &MockServer,
    current: usize,
) {
    session.join("G1", "Ana").await.expect("join");
    settle().await;
    server.push_on(TOPIC, &ana_joined_json(current));
    wait_for(events, |e| matches!(e, SessionEvent::IdentityConfirmed { .. })).await;
}

fn unique_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("ttt-session-{}-{name}.json", std::process::id()))
}

// ════════════════════════════════════════════════════════════════════
// Join and play
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn join_then_move() {
    let (mut session, mut events, servers) = start(1, MemoryStore::new());
    let server = &servers[0];
    wait_connected(&mut events).await;

    session.join("G1", "Ana").await.unwrap();
    settle().await;
    assert!(server.subscription_for(TOPIC).is_some());
    assert_eq!(
        server.published("/app/game/join"),
        vec![json!({ "gameId": "G1", "username": "Ana" })]
    );

    server.push_on(TOPIC, &ana_joined_json(0));
    let ev = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::IdentityConfirmed { .. })
    })
    .await;
    if let SessionEvent::IdentityConfirmed { participant } = ev {
        assert_eq!(participant.id, "p1");
        assert_eq!(participant.symbol, "X");
    } else {
        panic!("expected IdentityConfirmed, got {ev:?}");
    }

    session.click_cell(4).await.unwrap();
    settle().await;
    assert_eq!(
        server.published("/app/game/move"),
        vec![json!({ "gameId": "G1", "playerId": "p1", "position": 4 })]
    );

    let view = session.view().await.unwrap();
    assert!(view.live);
    assert!(view.is_my_turn());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn off_turn_click_publishes_nothing() {
    let (mut session, mut events, servers) = start(1, MemoryStore::new());
    let server = &servers[0];
    wait_connected(&mut events).await;
    join_as_ana(&session, &mut events, server, 1).await;

    let err = session.click_cell(4).await.unwrap_err();
    assert!(matches!(err, SessionError::NotYourTurn));
    assert!(err.is_local_rejection());
    let ev = wait_for(&mut events, |e| matches!(e, SessionEvent::Status { .. })).await;
    assert_eq!(
        ev,
        SessionEvent::Status {
            message: "not your turn".into()
        }
    );

    settle().await;
    assert!(server.published("/app/game/move").is_empty());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn targeted_power_then_cancel() {
    let (mut session, mut events, servers) = start(1, MemoryStore::new());
    let server = &servers[0];
    wait_connected(&mut events).await;
    join_as_ana(&session, &mut events, server, 1).await;

    session.select_power(PowerKind::BlockCell).await.unwrap();
    wait_for(&mut events, |e| {
        *e == SessionEvent::TargetPrompt {
            power: PowerKind::BlockCell,
        }
    })
    .await;
    assert_eq!(
        session.view().await.unwrap().targeting,
        TargetingState::AwaitingTarget(PowerKind::BlockCell)
    );

    session.click_cell(5).await.unwrap();
    settle().await;
    assert_eq!(
        server.published("/app/game/power"),
        vec![json!({
            "gameId": "G1",
            "playerId": "p1",
            "powerType": "BLOCK_CELL",
            "targetPosition": 5
        })]
    );

    session.select_power(PowerKind::RemoveOpponent).await.unwrap();
    assert!(session.cancel_targeting().await.unwrap());
    settle().await;
    assert_eq!(server.published("/app/game/power").len(), 1);
    assert_eq!(session.view().await.unwrap().targeting, TargetingState::Idle);

    session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Inbound frames
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn malformed_frames_keep_last_good_state() {
    let (mut session, mut events, servers) = start(1, MemoryStore::new());
    let server = &servers[0];
    wait_connected(&mut events).await;
    join_as_ana(&session, &mut events, server, 0).await;

    server.push_on(TOPIC, &json!("not a frame"));
    let mut short = game_json(vec![player_json("p1", "Ana", "X", &[])], 0, 3);
    short["board"] = json!([]);
    server.push_on(TOPIC, &frame_json("MOVE_MADE", Some(short), None, None));
    server.push_on(
        TOPIC,
        &frame_json("ERROR", None, None, Some("Celda ocupada")),
    );

    let ev = wait_for(&mut events, |e| matches!(e, SessionEvent::Status { .. })).await;
    assert_eq!(
        ev,
        SessionEvent::Status {
            message: "Celda ocupada".into()
        }
    );

    let view = session.view().await.unwrap();
    assert_eq!(view.game.unwrap().move_log.len(), 0);
    assert_eq!(view.history_len, 0);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn history_and_snapshot_viewing() {
    let (mut session, mut events, servers) = start(1, MemoryStore::new());
    let server = &servers[0];
    wait_connected(&mut events).await;
    join_as_ana(&session, &mut events, server, 0).await;

    let roster = || vec![player_json("p1", "Ana", "X", &[])];
    for moves in 1..=3 {
        server.push_on(
            TOPIC,
            &frame_json("MOVE_MADE", Some(game_json(roster(), 0, moves)), None, None),
        );
    }
    // The same state again records nothing.
    server.push_on(
        TOPIC,
        &frame_json("GAME_UPDATE", Some(game_json(roster(), 0, 3)), None, None),
    );
    wait_for(&mut events, |e| {
        *e == SessionEvent::SnapshotRecorded { sequence_number: 2 }
    })
    .await;
    settle().await;

    let history = session.history().await.unwrap();
    let numbers: Vec<_> = history.iter().map(|s| s.sequence_number).collect();
    assert_eq!(numbers, vec![0, 1, 2]);
    assert_eq!(history[1].move_count, 2);

    session.select_snapshot(Some(1)).await.unwrap();
    let view = session.view().await.unwrap();
    assert_eq!(view.viewing.as_ref().unwrap().sequence_number, 1);
    assert!(matches!(
        session.click_cell(0).await,
        Err(SessionError::ViewingHistory)
    ));
    assert!(matches!(
        session.select_snapshot(Some(3)).await,
        Err(SessionError::SnapshotNotFound(3))
    ));

    session.select_snapshot(None).await.unwrap();
    session.click_cell(0).await.unwrap();

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn capability_notice_expires() {
    let (mut session, mut events, servers) = start(1, MemoryStore::new());
    let server = &servers[0];
    wait_connected(&mut events).await;
    join_as_ana(&session, &mut events, server, 0).await;

    let with = |powers: &[&str], moves| {
        frame_json(
            "MOVE_MADE",
            Some(game_json(vec![player_json("p1", "Ana", "X", powers)], 0, moves)),
            None,
            None,
        )
    };
    server.push_on(TOPIC, &with(&["EXTRA_TURN"], 1));

    let ev = wait_for(&mut events, |e| matches!(e, SessionEvent::NoticeRaised(_))).await;
    let SessionEvent::NoticeRaised(notice) = ev else {
        panic!("expected NoticeRaised, got {ev:?}");
    };
    assert_eq!(notice.capability, "EXTRA_TURN");
    assert_eq!(notice.power_kind(), Some(PowerKind::ExtraTurn));

    let raised_at = tokio::time::Instant::now();
    wait_for(&mut events, |e| {
        *e == SessionEvent::NoticeCleared { id: notice.id }
    })
    .await;
    assert!(raised_at.elapsed() >= Duration::from_secs(3));

    // Same capability list again: no second notice.
    server.push_on(TOPIC, &with(&["EXTRA_TURN"], 2));
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::SnapshotRecorded { .. })
    })
    .await;
    settle().await;
    assert!(session.view().await.unwrap().notice.is_none());

    session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Reconnection
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn stored_identity_rejoins_after_restart() {
    let mut store = MemoryStore::new();
    store.set(KEY_SESSION_ID, "G1").unwrap();
    store.set(KEY_DISPLAY_NAME, "Ana").unwrap();
    store
        .set(
            KEY_PARTICIPANT,
            &json!({ "id": "p1", "username": "Ana", "symbol": "X" }).to_string(),
        )
        .unwrap();

    let (mut session, mut events, servers) = start(1, store);
    let server = &servers[0];
    wait_connected(&mut events).await;

    let ev = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::RejoinAttempted { .. })
    })
    .await;
    if let SessionEvent::RejoinAttempted { identity } = ev {
        assert_eq!(identity.participant_id().map(String::as_str), Some("p1"));
    }
    settle().await;
    assert_eq!(server.published("/app/game/join").len(), 1);

    // The stored seat acts before any join confirmation arrives.
    server.push_on(
        TOPIC,
        &frame_json(
            "GAME_UPDATE",
            Some(game_json(vec![player_json("p1", "Ana", "X", &[])], 0, 0)),
            None,
            None,
        ),
    );
    wait_for(&mut events, |e| matches!(e, SessionEvent::StateUpdated { .. })).await;
    session.click_cell(8).await.unwrap();
    settle().await;
    assert_eq!(server.published("/app/game/move")[0]["playerId"], "p1");
    assert_eq!(session.view().await.unwrap().reconnect, ReconnectState::Done);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn lost_link_reconnects_and_rejoins_once() {
    let (mut session, mut events, servers) = start(2, MemoryStore::new());
    wait_connected(&mut events).await;
    join_as_ana(&session, &mut events, &servers[0], 0).await;

    servers[0].fail("connection reset");
    let ev = wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    assert!(matches!(ev, SessionEvent::Disconnected { reason: Some(_) }));
    let view = session.view().await.unwrap();
    assert!(!view.live);
    assert!(view.game.is_some());
    assert!(matches!(
        session.click_cell(4).await,
        Err(SessionError::NotConnected)
    ));

    wait_connected(&mut events).await;
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::RejoinAttempted { .. })
    })
    .await;
    settle().await;

    assert!(servers[1].subscription_for(TOPIC).is_some());
    assert_eq!(servers[1].published("/app/game/join").len(), 1);
    assert!(servers[0].is_closed());

    // Nothing else happens on this connection.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(servers[1].published("/app/game/join").len(), 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn no_rejoin_without_identity() {
    let (mut session, mut events, servers) = start(1, MemoryStore::new());
    wait_connected(&mut events).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(servers[0].published("/app/game/join").is_empty());
    assert_eq!(
        session.view().await.unwrap().reconnect,
        ReconnectState::NotAttempted
    );

    session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Leave and shutdown
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn leave_unsubscribes_and_forgets_identity() {
    let path = unique_path("leave");
    let _ = std::fs::remove_file(&path);

    let (mut session, mut events, servers) = start(1, FileStore::open(&path).unwrap());
    let server = &servers[0];
    wait_connected(&mut events).await;
    join_as_ana(&session, &mut events, server, 0).await;

    let stored = FileStore::open(&path).unwrap();
    assert_eq!(stored.get(KEY_SESSION_ID).as_deref(), Some("G1"));
    assert!(stored.get(KEY_PARTICIPANT).unwrap().contains("\"p1\""));

    session.leave().await.unwrap();
    wait_for(&mut events, |e| *e == SessionEvent::Left).await;
    settle().await;

    assert!(server
        .sent_frames()
        .iter()
        .any(|f| f.command == Command::Unsubscribe));
    assert!(server.subscription_for(TOPIC).is_none());

    let stored = FileStore::open(&path).unwrap();
    assert!(stored.get(KEY_SESSION_ID).is_none());
    assert!(stored.get(KEY_DISPLAY_NAME).is_none());
    assert!(stored.get(KEY_PARTICIPANT).is_none());

    let view = session.view().await.unwrap();
    assert!(view.game.is_none());
    assert!(!view.identity.is_resumable());

    session.shutdown().await;
    let _ = std::fs::remove_file(&path);
}

#[tokio::test(start_paused = true)]
async fn shutdown_says_goodbye() {
    let (mut session, mut events, servers) = start(1, MemoryStore::new());
    wait_connected(&mut events).await;

    session.shutdown().await;
    assert!(servers[0]
        .sent_frames()
        .iter()
        .any(|f| f.command == Command::Disconnect));
    assert!(servers[0].is_closed());

    let ev = events.recv().await.expect("final event");
    assert_eq!(
        ev,
        SessionEvent::Disconnected {
            reason: Some("session shut down".into())
        }
    );
    assert!(events.recv().await.is_none());
    assert!(matches!(
        session.join("G1", "Ana").await,
        Err(SessionError::SessionClosed)
    ));
}
