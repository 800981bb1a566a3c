//! # TTT Session Client
//!
//! Client-side session layer for multiplayer tic-tac-toe with powers, played
//! over a STOMP publish/subscribe channel.
//!
//! The server is the only authority on the game. This crate keeps a local view
//! of it consistent: it reconciles pushed states, records a replayable history,
//! runs the two-step "select a power, then a target" interaction, and rejoins
//! the stored session after a restart or a dropped connection.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any backend
//! - **Wire-compatible**: protocol types match the game server's JSON exactly
//! - **WebSocket built-in**: default `transport-websocket` feature provides `WebSocketConnector`
//! - **HTTP lobby**: default `lobby-http` feature provides `HttpLobby`
//! - **Event-driven**: receive typed [`SessionEvent`]s via a channel, query a [`SessionView`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ttt_session_client::{FileStore, GameSession, SessionConfig, SessionEvent, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new("ws://localhost:8080/ws/websocket");
//! let store = FileStore::open("session.json")?;
//! let (session, mut events) = GameSession::start(connector, store, SessionConfig::default());
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Status { message } = event {
//!         println!("{message}");
//!     }
//! }
//! ```

pub mod channel;
pub mod core;
pub mod error;
pub mod event;
pub mod history;
pub mod identity;
pub mod lobby;
pub mod powers;
pub mod protocol;
pub mod reconciler;
pub mod session;
pub mod stomp;
pub mod supervisor;
pub mod targeting;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use channel::{ChannelConfig, ChannelEvent, PubSubChannel, Publisher};
pub use core::{SessionCore, SessionView};
pub use error::SessionError;
pub use event::SessionEvent;
pub use history::Snapshot;
pub use identity::{FileStore, IdentityStore, MemoryStore, SessionIdentity};
pub use lobby::LobbyApi;
#[cfg(feature = "lobby-http")]
pub use lobby::HttpLobby;
pub use protocol::{GameState, GameStatus, Participant, PowerKind};
pub use session::{GameSession, SessionConfig};
pub use supervisor::ReconnectState;
pub use targeting::TargetingState;
pub use transport::{Connector, Transport};
#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
