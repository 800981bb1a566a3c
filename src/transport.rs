//! Transport abstraction underneath the pub/sub channel.
//!
//! The [`Transport`] trait is a bidirectional text frame pipe. The STOMP layer
//! in [`crate::stomp`] rides on top of it, so every transport only has to move
//! whole text frames (WebSocket messages, length-prefixed TCP, an in-memory
//! queue in tests).
//!
//! Because the channel must survive connection loss, it is handed a
//! [`Connector`] rather than a single transport: every time the link drops,
//! the channel asks the connector for a fresh transport.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use ttt_session_client::error::SessionError;
//! use ttt_session_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, frame: String) -> Result<(), SessionError> {
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SessionError>> {
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SessionError> {
//!         todo!()
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     type Transport = MyTransport;
//!
//!     async fn connect(&mut self) -> Result<MyTransport, SessionError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SessionError;

/// A bidirectional text frame transport.
///
/// Each call to [`send`](Transport::send) transmits one complete frame and
/// each call to [`recv`](Transport::recv) returns one.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the channel loop
/// polls it inside `tokio::select!`. Channel-backed implementations are
/// naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, frame: String) -> Result<(), SessionError>;

    /// Receive the next text frame.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly by the peer
    async fn recv(&mut self) -> Option<Result<String, SessionError>>;

    /// Close the connection gracefully. Calling it twice must be harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens fresh [`Transport`]s to one remote endpoint.
#[async_trait]
pub trait Connector: Send + 'static {
    /// The transport produced by this connector.
    type Transport: Transport;

    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Any error is treated as "endpoint unreachable right now"; the channel
    /// logs it and retries later.
    async fn connect(&mut self) -> Result<Self::Transport, SessionError>;
}
