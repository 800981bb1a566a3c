#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the session client integration tests.
//!
//! Provides a scripted STOMP server ([`MockServer`]) behind a channel-based
//! [`MockTransport`], a [`MockConnector`] that hands those transports out in
//! order, and helpers that build the game server's JSON.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use ttt_session_client::stomp::{self, Command, Frame};
use ttt_session_client::{Connector, SessionError, Transport};

type Incoming = Result<String, SessionError>;

// ── MockTransport ───────────────────────────────────────────────────

/// A transport fed by a [`MockServer`].
///
/// `recv()` yields whatever the server pushed, in order, and returns `None`
/// once the server handle is dropped.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: String) -> Result<(), SessionError> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Incoming> {
        self.incoming.recv().await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

// ── MockServer ──────────────────────────────────────────────────────

/// The test's end of one [`MockTransport`].
pub struct MockServer {
    script: mpsc::UnboundedSender<Incoming>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockServer {
    /// Push one raw frame to the client.
    pub fn push(&self, frame: Frame) {
        let _ = self.script.send(Ok(frame.encode()));
    }

    /// Push a JSON body on the subscription the client opened for `topic`.
    pub fn push_on(&self, topic: &str, body: &Value) {
        let subscription = self
            .subscription_for(topic)
            .unwrap_or_else(|| panic!("client never subscribed to {topic}"));
        self.push(
            Frame::new(Command::Message)
                .with_header("destination", topic)
                .with_header("subscription", subscription)
                .with_header("message-id", "m-1")
                .with_header("content-type", "application/json")
                .with_body(body.to_string()),
        );
    }

    /// Fail the link with a receive error.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .script
            .send(Err(SessionError::TransportReceive(reason.into())));
    }

    /// Every frame the client sent, decoded.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .flat_map(|raw| stomp::decode_frames(raw).unwrap())
            .collect()
    }

    /// JSON bodies the client sent to `destination`.
    pub fn published(&self, destination: &str) -> Vec<Value> {
        self.sent_frames()
            .into_iter()
            .filter(|f| f.command == Command::Send && f.header("destination") == Some(destination))
            .map(|f| serde_json::from_str(&f.body).unwrap())
            .collect()
    }

    /// The id of the latest live subscription to `topic`.
    pub fn subscription_for(&self, topic: &str) -> Option<String> {
        let mut live: Vec<(String, String)> = Vec::new();
        for frame in self.sent_frames() {
            match frame.command {
                Command::Subscribe => live.push((
                    frame.header("id").unwrap_or_default().to_string(),
                    frame.header("destination").unwrap_or_default().to_string(),
                )),
                Command::Unsubscribe => {
                    let id = frame.header("id").unwrap_or_default();
                    live.retain(|(live_id, _)| live_id != id);
                }
                _ => {}
            }
        }
        live.into_iter()
            .rev()
            .find(|(_, destination)| destination == topic)
            .map(|(id, _)| id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A transport whose server has already answered the STOMP handshake.
pub fn stomp_server() -> (MockTransport, MockServer) {
    let (script, incoming) = mpsc::unbounded_channel();
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let server = MockServer {
        script,
        sent: Arc::clone(&sent),
        closed: Arc::clone(&closed),
    };
    server.push(Frame::new(Command::Connected).with_header("version", "1.2"));
    (
        MockTransport {
            incoming,
            sent,
            closed,
        },
        server,
    )
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out the given transports in order, then never connects again.
pub struct MockConnector {
    transports: VecDeque<MockTransport>,
}

impl MockConnector {
    pub fn new(transports: Vec<MockTransport>) -> Self {
        Self {
            transports: transports.into(),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&mut self) -> Result<MockTransport, SessionError> {
        match self.transports.pop_front() {
            Some(transport) => Ok(transport),
            None => std::future::pending().await,
        }
    }
}

// ── JSON helper functions ───────────────────────────────────────────

/// A roster entry as the server sends it.
pub fn player_json(id: &str, name: &str, symbol: &str, powers: &[&str]) -> Value {
    json!({
        "id": id,
        "username": name,
        "symbol": symbol,
        "score": 0,
        "isActive": true,
        "powers": powers,
    })
}

/// An in-progress game `G1` on an empty board with `moves` log entries.
pub fn game_json(players: Vec<Value>, current: usize, moves: usize) -> Value {
    let board: Vec<Value> = (0..9)
        .map(|i| {
            json!({
                "position": i,
                "value": null,
                "isBlocked": false,
                "isRevealed": false,
                "type": "NORMAL",
                "blockedTurns": 0,
            })
        })
        .collect();
    let log: Vec<String> = (0..moves).map(|i| format!("move {i}")).collect();
    json!({
        "gameId": "G1",
        "board": board,
        "players": players,
        "currentPlayerIndex": current,
        "status": "ACTIVE",
        "winner": null,
        "gameLog": log,
        "turnCount": moves,
        "specialCellsEnabled": true,
    })
}

/// An inbound topic frame.
pub fn frame_json(kind: &str, game: Option<Value>, player_id: Option<&str>, message: Option<&str>) -> Value {
    let mut frame = json!({ "type": kind });
    if let Some(game) = game {
        frame["game"] = game;
    }
    if let Some(player_id) = player_id {
        frame["playerId"] = json!(player_id);
    }
    if let Some(message) = message {
        frame["message"] = json!(message);
    }
    frame
}

/// The join confirmation for Ana as `p1` (X) with Bruno as `p2` (O).
pub fn ana_joined_json(current: usize) -> Value {
    frame_json(
        "PLAYER_JOINED",
        Some(game_json(
            vec![
                player_json("p1", "Ana", "X", &[]),
                player_json("p2", "Bruno", "O", &[]),
            ],
            current,
            0,
        )),
        Some("p1"),
        None,
    )
}
