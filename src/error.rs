//! Error types for the session client.
//!
//! Transport and decode failures stay inside the channel and reconciler; what
//! reaches callers is either a connectivity verdict or one of the local
//! rejection variants below, whose `Display` text is meant for end users.

use thiserror::Error;

/// Errors that can occur when using the session client.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The STOMP peer sent something we could not make sense of.
    #[error("stomp protocol error: {0}")]
    Stomp(String),

    /// The lobby service rejected or failed a request.
    #[error("lobby request failed: {0}")]
    Lobby(String),

    /// Attempted an operation that requires an active connection.
    #[error("not connected to the server, try again in a moment")]
    NotConnected,

    /// Join was attempted without a session id or display name.
    #[error("enter a session id and a display name")]
    MissingIdentity,

    /// An action needs a confirmed participant and an active game.
    #[error("no active game")]
    NoActiveGame,

    /// A move was attempted while another participant holds the turn.
    #[error("not your turn")]
    NotYourTurn,

    /// Board positions run from 0 to 8.
    #[error("position {0} is outside the board")]
    InvalidPosition(i32),

    /// The clicked cell is already occupied or blocked.
    #[error("cell {0} is not available")]
    CellUnavailable(u8),

    /// Board clicks are ignored while a historical snapshot is displayed.
    #[error("return to the live view to play")]
    ViewingHistory,

    /// No snapshot with the requested sequence number exists.
    #[error("no snapshot #{0}")]
    SnapshotNotFound(usize),

    /// The background session task has exited.
    #[error("session closed")]
    SessionClosed,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Returns `true` for rejections decided locally, before anything was
    /// published.
    pub fn is_local_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::MissingIdentity
                | Self::NoActiveGame
                | Self::NotYourTurn
                | Self::InvalidPosition(_)
                | Self::CellUnavailable(_)
                | Self::ViewingHistory
                | Self::SnapshotNotFound(_)
        )
    }
}

/// A specialized [`Result`] type for session client operations.
pub type Result<T> = std::result::Result<T, SessionError>;
