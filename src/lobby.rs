//! Request/response calls that live outside the pub/sub channel.
//!
//! Creating a session and restarting one are plain HTTP calls on the game
//! server. The session layer only needs the [`LobbyApi`] seam; [`HttpLobby`]
//! is the `reqwest`-backed implementation (feature `lobby-http`, on by
//! default).

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::SessionId;

/// Out-of-band session management.
#[async_trait]
pub trait LobbyApi: Send + Sync + 'static {
    /// Create a new session and return its id.
    ///
    /// # Errors
    ///
    /// [`SessionError::Lobby`](crate::error::SessionError::Lobby) if the
    /// server is unreachable or answers without a session id.
    async fn create_session(&self) -> Result<SessionId>;

    /// Reset `session_id` to a fresh game. On success the server pushes the
    /// new state with an empty move log on the session topic.
    ///
    /// # Errors
    ///
    /// [`SessionError::Lobby`](crate::error::SessionError::Lobby) on a non-2xx
    /// answer or an unknown session.
    async fn restart_session(&self, session_id: &str) -> Result<()>;
}

#[cfg(feature = "lobby-http")]
pub use http::{HttpLobby, DEFAULT_LOBBY_URL};

#[cfg(feature = "lobby-http")]
mod http {
    use async_trait::async_trait;
    use serde::Deserialize;
    use tracing::{debug, info};

    use super::LobbyApi;
    use crate::error::{Result, SessionError};
    use crate::protocol::SessionId;

    /// Base URL of a locally running game server.
    pub const DEFAULT_LOBBY_URL: &str = "http://localhost:8080";

    /// The one field of the server's game document we need.
    #[derive(Debug, Deserialize)]
    struct CreatedSession {
        #[serde(rename = "gameId")]
        session_id: SessionId,
    }

    /// [`LobbyApi`] over the server's REST endpoints.
    ///
    /// # Example
    ///
    /// ```
    /// use ttt_session_client::lobby::HttpLobby;
    ///
    /// let lobby = HttpLobby::new("http://localhost:8080/");
    /// assert_eq!(lobby.base_url(), "http://localhost:8080");
    /// ```
    #[derive(Debug, Clone)]
    pub struct HttpLobby {
        base_url: String,
        client: reqwest::Client,
    }

    impl HttpLobby {
        pub fn new(base_url: impl Into<String>) -> Self {
            Self::with_client(base_url, reqwest::Client::new())
        }

        /// Use a preconfigured client (timeouts, proxies, TLS roots).
        pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
            let base_url = base_url.into().trim_end_matches('/').to_string();
            Self { base_url, client }
        }

        pub fn base_url(&self) -> &str {
            &self.base_url
        }

        async fn post(&self, path: &str) -> Result<String> {
            let url = format!("{}{path}", self.base_url);
            debug!(%url, "lobby request");
            let response = self
                .client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .send()
                .await
                .map_err(|e| SessionError::Lobby(format!("POST {path} failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(SessionError::Lobby(format!("POST {path} returned {status}")));
            }
            response
                .text()
                .await
                .map_err(|e| SessionError::Lobby(format!("POST {path} body unreadable: {e}")))
        }
    }

    impl Default for HttpLobby {
        fn default() -> Self {
            Self::new(DEFAULT_LOBBY_URL)
        }
    }

    #[async_trait]
    impl LobbyApi for HttpLobby {
        async fn create_session(&self) -> Result<SessionId> {
            let body = self.post("/api/games").await?;
            let created: CreatedSession = serde_json::from_str(&body)
                .map_err(|e| SessionError::Lobby(format!("unexpected create answer: {e}")))?;
            info!(session = %created.session_id, "session created");
            Ok(created.session_id)
        }

        async fn restart_session(&self, session_id: &str) -> Result<()> {
            let body = self.post(&format!("/api/games/{session_id}/restart")).await?;
            // The server answers `null` for an unknown session.
            let trimmed = body.trim();
            if trimmed.is_empty() || trimmed == "null" {
                return Err(SessionError::Lobby(format!("no session {session_id}")));
            }
            info!(session = %session_id, "session restarted");
            Ok(())
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
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        /// Serve exactly one HTTP request with a canned answer and hand back
        /// the request line.
        async fn one_shot_server(
            status: &'static str,
            body: &'static str,
        ) -> (String, tokio::task::JoinHandle<String>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let handle = tokio::spawn(async move {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
                let request = String::from_utf8_lossy(&request).to_string();
                request.lines().next().unwrap_or_default().to_string()
            });
            (format!("http://{addr}"), handle)
        }

        #[tokio::test]
        async fn create_session_returns_game_id() {
            let (url, server) =
                one_shot_server("200 OK", r#"{"gameId":"G7","status":"WAITING"}"#).await;
            let lobby = HttpLobby::new(url);

            assert_eq!(lobby.create_session().await.unwrap(), "G7");
            assert_eq!(server.await.unwrap(), "POST /api/games HTTP/1.1");
        }

        #[tokio::test]
        async fn restart_posts_to_session_path() {
            let (url, server) = one_shot_server("200 OK", r#"{"gameId":"G7"}"#).await;
            let lobby = HttpLobby::new(format!("{url}/"));

            lobby.restart_session("G7").await.unwrap();
            assert_eq!(server.await.unwrap(), "POST /api/games/G7/restart HTTP/1.1");
        }

        #[tokio::test]
        async fn restart_of_unknown_session_fails() {
            let (url, _server) = one_shot_server("200 OK", "").await;
            let err = HttpLobby::new(url).restart_session("nope").await.unwrap_err();
            assert!(matches!(err, SessionError::Lobby(_)));
        }

        #[tokio::test]
        async fn server_error_is_a_lobby_error() {
            let (url, _server) = one_shot_server("500 Internal Server Error", "{}").await;
            let err = HttpLobby::new(url).create_session().await.unwrap_err();
            assert!(err.to_string().contains("500"));
        }

        #[tokio::test]
        async fn unreachable_server_is_a_lobby_error() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);

            let err = HttpLobby::new(format!("http://{addr}"))
                .create_session()
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::Lobby(_)));
        }
    }
}
