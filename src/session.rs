//! Async driver for a game session.
//!
//! [`GameSession`] owns a [`SessionCore`] on one background task. Handle calls
//! become commands on an unbounded queue and are applied one at a time, so the
//! core never needs a lock. The task also owns the two timers the core asks
//! for (rejoin delay and notice expiry) and forwards everything the core
//! produces to the bounded [`SessionEvent`] receiver.
//!
//! # Example
//!
//! ```rust,ignore
//! use ttt_session_client::{GameSession, MemoryStore, SessionConfig, SessionEvent};
//! use ttt_session_client::transports::WebSocketConnector;
//!
//! let connector = WebSocketConnector::new("ws://localhost:8080/ws/websocket");
//! let (session, mut events) =
//!     GameSession::start(connector, MemoryStore::new(), SessionConfig::default());
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::Connected => session.join("G1", "Ana").await?,
//!         SessionEvent::StateUpdated { state, .. } => println!("{:?}", state.board),
//!         SessionEvent::Status { message } => println!("{message}"),
//!         _ => {}
//!     }
//! }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;
use tracing::{debug, warn};

use crate::channel::{ChannelConfig, ChannelEvent, PubSubChannel, Publisher};
use crate::core::{SessionCore, SessionView, Timer};
use crate::error::{Result, SessionError};
use crate::event::SessionEvent;
use crate::history::Snapshot;
use crate::identity::IdentityStore;
use crate::lobby::LobbyApi;
use crate::powers::{NoticeId, DEFAULT_NOTICE_DURATION};
use crate::protocol::{PowerKind, SessionId};
use crate::supervisor::DEFAULT_REJOIN_DELAY;
use crate::transport::Connector;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`GameSession`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use ttt_session_client::session::SessionConfig;
///
/// let config = SessionConfig::default()
///     .with_rejoin_delay(Duration::from_millis(500))
///     .with_notice_duration(Duration::from_secs(6));
/// assert_eq!(config.event_channel_capacity, 256);
/// assert!(config.lobby.is_none());
/// ```
#[derive(Clone)]
pub struct SessionConfig {
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped with a warning.
    /// `Connected` and `Disconnected` are always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time the session task gets to close the channel on
    /// [`GameSession::shutdown`] before it is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Settle delay before the automatic rejoin after a connection.
    ///
    /// Defaults to **1 second**.
    pub rejoin_delay: Duration,
    /// How long a capability notice stays up.
    ///
    /// Defaults to **4 seconds**.
    pub notice_duration: Duration,
    /// Settings for the pub/sub channel built by [`GameSession::start`].
    pub channel: ChannelConfig,
    /// Out-of-band session management. Without one,
    /// [`GameSession::create_session`] and [`GameSession::restart`] fail.
    pub lobby: Option<Arc<dyn LobbyApi>>,
}

impl SessionConfig {
    pub fn new(channel: ChannelConfig) -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            rejoin_delay: DEFAULT_REJOIN_DELAY,
            notice_duration: DEFAULT_NOTICE_DURATION,
            channel,
            lobby: None,
        }
    }

    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_rejoin_delay(mut self, delay: Duration) -> Self {
        self.rejoin_delay = delay;
        self
    }

    #[must_use]
    pub fn with_notice_duration(mut self, duration: Duration) -> Self {
        self.notice_duration = duration;
        self
    }

    #[must_use]
    pub fn with_lobby(mut self, lobby: impl LobbyApi) -> Self {
        self.lobby = Some(Arc::new(lobby));
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("event_channel_capacity", &self.event_channel_capacity)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("rejoin_delay", &self.rejoin_delay)
            .field("notice_duration", &self.notice_duration)
            .field("channel", &self.channel)
            .field("has_lobby", &self.lobby.is_some())
            .finish()
    }
}

// ── Commands ────────────────────────────────────────────────────────

enum SessionCommand {
    Join {
        session_id: String,
        display_name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    ClickCell {
        position: i32,
        reply: oneshot::Sender<Result<()>>,
    },
    SelectPower {
        kind: PowerKind,
        reply: oneshot::Sender<Result<()>>,
    },
    CancelTargeting {
        reply: oneshot::Sender<bool>,
    },
    SelectSnapshot {
        sequence_number: Option<usize>,
        reply: oneshot::Sender<Result<()>>,
    },
    DismissNotice {
        reply: oneshot::Sender<bool>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    View {
        reply: oneshot::Sender<SessionView>,
    },
    History {
        reply: oneshot::Sender<Vec<Arc<Snapshot>>>,
    },
    RestartTarget {
        reply: oneshot::Sender<Result<SessionId>>,
    },
    Restarted {
        session_id: SessionId,
    },
    SessionCreated {
        session_id: SessionId,
    },
    LobbyFailed {
        message: String,
    },
}

// ── Session handle ──────────────────────────────────────────────────

/// Async handle to a running game session.
///
/// Created via [`GameSession::start`] (or [`GameSession::start_with`] for a
/// custom [`Publisher`]). Every method returns
/// [`SessionError::SessionClosed`] once the session task has exited.
pub struct GameSession {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    lobby: Option<Arc<dyn LobbyApi>>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl GameSession {
    /// Open a [`PubSubChannel`] through `connector` and start a session on it.
    ///
    /// The identity stored in `store` is loaded right away; if it is
    /// resumable, the session rejoins once the channel is up.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        connector: impl Connector,
        store: impl IdentityStore,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (channel, channel_events) = PubSubChannel::start(connector, config.channel.clone());
        Self::start_with(channel, channel_events, store, config)
    }

    /// Start a session on an existing publisher and its event stream.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start_with(
        publisher: impl Publisher,
        channel_events: mpsc::Receiver<ChannelEvent>,
        store: impl IdentityStore,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let core = SessionCore::new(publisher, store);
        let timing = Timing {
            rejoin_delay: config.rejoin_delay,
            notice_duration: config.notice_duration,
        };
        let task = tokio::spawn(session_loop(
            core,
            timing,
            cmd_rx,
            channel_events,
            event_tx,
            shutdown_rx,
        ));

        let session = Self {
            cmd_tx,
            lobby: config.lobby,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (session, event_rx)
    }

    // ── Public API methods ──────────────────────────────────────────

    /// Join `session_id` as `display_name`.
    ///
    /// # Errors
    ///
    /// [`SessionError::MissingIdentity`] or [`SessionError::NotConnected`];
    /// the same text is also emitted as a status event.
    pub async fn join(&self, session_id: &str, display_name: &str) -> Result<()> {
        self.request(|reply| SessionCommand::Join {
            session_id: session_id.to_string(),
            display_name: display_name.to_string(),
            reply,
        })
        .await?
    }

    /// A click on board cell `position` (0..=8).
    ///
    /// # Errors
    ///
    /// Any local rejection; see [`SessionError::is_local_rejection`].
    pub async fn click_cell(&self, position: i32) -> Result<()> {
        self.request(|reply| SessionCommand::ClickCell { position, reply })
            .await?
    }

    /// # Errors
    ///
    /// Any local rejection; see [`SessionError::is_local_rejection`].
    pub async fn select_power(&self, kind: PowerKind) -> Result<()> {
        self.request(|reply| SessionCommand::SelectPower { kind, reply })
            .await?
    }

    /// Drop a pending targeted power. Resolves to `true` if one was pending.
    ///
    /// # Errors
    ///
    /// [`SessionError::SessionClosed`] if the session task has exited.
    pub async fn cancel_targeting(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::CancelTargeting { reply })
            .await
    }

    /// Display snapshot `sequence_number`, or the live state for `None`.
    ///
    /// # Errors
    ///
    /// [`SessionError::SnapshotNotFound`] for an unknown sequence number.
    pub async fn select_snapshot(&self, sequence_number: Option<usize>) -> Result<()> {
        self.request(|reply| SessionCommand::SelectSnapshot {
            sequence_number,
            reply,
        })
        .await?
    }

    /// # Errors
    ///
    /// [`SessionError::SessionClosed`] if the session task has exited.
    pub async fn dismiss_notice(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::DismissNotice { reply })
            .await
    }

    /// Leave the session and forget the stored identity.
    ///
    /// # Errors
    ///
    /// [`SessionError::SessionClosed`] if the session task has exited.
    pub async fn leave(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Leave { reply }).await
    }

    /// Current session picture.
    ///
    /// # Errors
    ///
    /// [`SessionError::SessionClosed`] if the session task has exited.
    pub async fn view(&self) -> Result<SessionView> {
        self.request(|reply| SessionCommand::View { reply }).await
    }

    /// Every recorded snapshot, oldest first.
    ///
    /// # Errors
    ///
    /// [`SessionError::SessionClosed`] if the session task has exited.
    pub async fn history(&self) -> Result<Vec<Arc<Snapshot>>> {
        self.request(|reply| SessionCommand::History { reply })
            .await
    }

    /// Ask the lobby for a new session. The id is also announced as
    /// [`SessionEvent::SessionCreated`]; joining it is up to the caller.
    ///
    /// # Errors
    ///
    /// [`SessionError::Lobby`] when no lobby is configured or the call fails.
    pub async fn create_session(&self) -> Result<SessionId> {
        let lobby = self.lobby()?;
        match lobby.create_session().await {
            Ok(session_id) => {
                self.send(SessionCommand::SessionCreated {
                    session_id: session_id.clone(),
                })?;
                Ok(session_id)
            }
            Err(e) => Err(self.lobby_failed(e)),
        }
    }

    /// Restart the held game through the lobby. The history is cleared as
    /// soon as the lobby accepts; the fresh state arrives on the topic.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NoActiveGame`] when no game is held
    /// - [`SessionError::Lobby`] when no lobby is configured or the call fails
    pub async fn restart(&self) -> Result<()> {
        let lobby = self.lobby()?;
        let session_id = self
            .request(|reply| SessionCommand::RestartTarget { reply })
            .await??;
        match lobby.restart_session(&session_id).await {
            Ok(()) => self.send(SessionCommand::Restarted { session_id }),
            Err(e) => Err(self.lobby_failed(e)),
        }
    }

    /// Shut the session down: close the channel and stop the task.
    ///
    /// A final [`SessionEvent::Disconnected`] is emitted if the channel was
    /// up. After this the event receiver yields `None`.
    pub async fn shutdown(&mut self) {
        debug!("GameSession: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| SessionError::SessionClosed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    fn lobby(&self) -> Result<Arc<dyn LobbyApi>> {
        self.lobby
            .clone()
            .ok_or_else(|| SessionError::Lobby("no lobby configured".into()))
    }

    /// Report a lobby failure on the event stream and hand it back.
    fn lobby_failed(&self, error: SessionError) -> SessionError {
        warn!("lobby call failed: {error}");
        let message = error.to_string();
        if self.send(SessionCommand::LobbyFailed { message }).is_err() {
            debug!("session closed before the lobby failure was reported");
        }
        error
    }
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("has_lobby", &self.lobby.is_some())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        // Dropping the task drops the core and with it the channel handle,
        // which aborts the channel loop in turn.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Timing {
    rejoin_delay: Duration,
    notice_duration: Duration,
}

/// Drive the core until shut down.
async fn session_loop<P: Publisher, S: IdentityStore>(
    mut core: SessionCore<P, S>,
    timing: Timing,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    mut channel_events: mpsc::Receiver<ChannelEvent>,
    event_tx: mpsc::Sender<SessionEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("session loop started");

    let mut channel_open = true;
    let mut rejoin_timer: Option<Pin<Box<Sleep>>> = None;
    let mut notice_timer: Option<(NoticeId, Pin<Box<Sleep>>)> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("command channel closed, shutting down session loop");
                    break;
                };
                handle_command(&mut core, cmd);
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                break;
            }

            event = channel_events.recv(), if channel_open => {
                match event {
                    Some(event) => core.on_channel_event(event),
                    None => {
                        debug!("channel event stream ended");
                        channel_open = false;
                    }
                }
            }

            () = elapsed(rejoin_timer.as_mut()) => {
                rejoin_timer = None;
                core.on_rejoin_timer();
            }

            () = elapsed(notice_timer.as_mut().map(|(_, sleep)| sleep)) => {
                if let Some((id, _)) = notice_timer.take() {
                    core.expire_notice(id);
                }
            }
        }

        for timer in core.take_timers() {
            match timer {
                Timer::Rejoin => {
                    rejoin_timer = Some(Box::pin(tokio::time::sleep(timing.rejoin_delay)));
                }
                // A newer notice replaces the older one along with its timer.
                Timer::NoticeExpiry(id) => {
                    notice_timer = Some((id, Box::pin(tokio::time::sleep(timing.notice_duration))));
                }
                Timer::CancelNotice(id) => {
                    if notice_timer.as_ref().is_some_and(|(armed, _)| *armed == id) {
                        notice_timer = None;
                    }
                }
            }
        }
        flush(&mut core, &event_tx).await;
    }

    core.publisher_mut().close().await;
    core.on_channel_event(ChannelEvent::Disconnected {
        reason: Some("session shut down".into()),
    });
    flush(&mut core, &event_tx).await;

    debug!("session loop exited");
}

fn handle_command<P: Publisher, S: IdentityStore>(
    core: &mut SessionCore<P, S>,
    cmd: SessionCommand,
) {
    // A dropped reply receiver only means the caller stopped waiting.
    match cmd {
        SessionCommand::Join {
            session_id,
            display_name,
            reply,
        } => {
            let _ = reply.send(core.join(&session_id, &display_name));
        }
        SessionCommand::ClickCell { position, reply } => {
            let _ = reply.send(core.on_cell_click(position));
        }
        SessionCommand::SelectPower { kind, reply } => {
            let _ = reply.send(core.select_power(kind));
        }
        SessionCommand::CancelTargeting { reply } => {
            let _ = reply.send(core.cancel_targeting());
        }
        SessionCommand::SelectSnapshot {
            sequence_number,
            reply,
        } => {
            let _ = reply.send(core.select_snapshot(sequence_number));
        }
        SessionCommand::DismissNotice { reply } => {
            let _ = reply.send(core.dismiss_notice());
        }
        SessionCommand::Leave { reply } => {
            core.leave();
            let _ = reply.send(());
        }
        SessionCommand::View { reply } => {
            let _ = reply.send(core.view());
        }
        SessionCommand::History { reply } => {
            let _ = reply.send(core.history().iter().map(Arc::clone).collect());
        }
        SessionCommand::RestartTarget { reply } => {
            let _ = reply.send(core.restart_target());
        }
        SessionCommand::Restarted { session_id } => core.on_restarted(&session_id),
        SessionCommand::SessionCreated { session_id } => core.on_session_created(session_id),
        SessionCommand::LobbyFailed { message } => core.report(message),
    }
}

/// Resolve when the timer in `slot` fires; never resolve for an empty slot.
async fn elapsed(slot: Option<&mut Pin<Box<Sleep>>>) {
    match slot {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Forward what the core produced. Connectivity transitions use a blocking
/// send and are never dropped; everything else is dropped with a warning when
/// the consumer falls behind.
async fn flush<P: Publisher, S: IdentityStore>(
    core: &mut SessionCore<P, S>,
    event_tx: &mpsc::Sender<SessionEvent>,
) {
    for event in core.take_events() {
        match event {
            SessionEvent::Connected | SessionEvent::Disconnected { .. } => {
                if event_tx.send(event).await.is_err() {
                    debug!("event channel closed, receiver dropped");
                }
            }
            event => match event_tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    warn!(
                        "event channel full, dropping event: {:?}",
                        std::mem::discriminant(&dropped)
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("event channel closed, receiver dropped");
                }
            },
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use crate::channel::SubscriptionId;
    use crate::identity::{MemoryStore, KEY_DISPLAY_NAME, KEY_SESSION_ID};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Shared view of what the session asked the channel to do.
    #[derive(Debug, Default)]
    struct Wire {
        connected: AtomicBool,
        subscribed: StdMutex<Vec<String>>,
        published: StdMutex<Vec<(String, serde_json::Value)>>,
        closed: AtomicBool,
    }

    struct FakePublisher {
        wire: Arc<Wire>,
        next: u64,
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        fn is_connected(&self) -> bool {
            self.wire.connected.load(Ordering::Acquire)
        }

        fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId> {
            self.next += 1;
            self.wire.subscribed.lock().unwrap().push(topic.to_string());
            Ok(format!("sub-{}", self.next))
        }

        fn unsubscribe(&mut self, _id: &SubscriptionId) -> Result<()> {
            Ok(())
        }

        fn publish(&mut self, destination: &str, body: String) -> Result<()> {
            let json = serde_json::from_str(&body).unwrap();
            self.wire
                .published
                .lock()
                .unwrap()
                .push((destination.to_string(), json));
            Ok(())
        }

        async fn close(&mut self) {
            self.wire.closed.store(true, Ordering::Release);
            self.wire.connected.store(false, Ordering::Release);
        }
    }

    struct Harness {
        session: GameSession,
        events: mpsc::Receiver<SessionEvent>,
        channel: mpsc::Sender<ChannelEvent>,
        wire: Arc<Wire>,
    }

    impl Harness {
        fn start(store: MemoryStore, config: SessionConfig) -> Self {
            let wire = Arc::new(Wire::default());
            let publisher = FakePublisher {
                wire: Arc::clone(&wire),
                next: 0,
            };
            let (channel, channel_events) = mpsc::channel(16);
            let (session, events) = GameSession::start_with(publisher, channel_events, store, config);
            Self {
                session,
                events,
                channel,
                wire,
            }
        }

        async fn connect(&mut self) {
            self.wire.connected.store(true, Ordering::Release);
            self.channel.send(ChannelEvent::Connected).await.unwrap();
            assert_eq!(self.events.recv().await.unwrap(), SessionEvent::Connected);
        }

        async fn push(&self, body: serde_json::Value) {
            self.channel
                .send(ChannelEvent::Message {
                    subscription: "sub-1".into(),
                    destination: "/topic/game/G1".into(),
                    body: body.to_string(),
                })
                .await
                .unwrap();
        }

        async fn next_matching(&mut self, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
            loop {
                let event = self.events.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        }

        fn joins(&self) -> usize {
            self.wire
                .published
                .lock()
                .unwrap()
                .iter()
                .filter(|(d, _)| d == "/app/game/join")
                .count()
        }
    }

    fn game_json(capabilities: &[&str], moves: usize) -> serde_json::Value {
        let board: Vec<_> = (0..9)
            .map(|i| serde_json::json!({ "position": i, "value": null, "type": "NORMAL" }))
            .collect();
        serde_json::json!({
            "gameId": "G1",
            "board": board,
            "players": [
                { "id": "p1", "username": "Ana", "symbol": "X", "powers": capabilities }
            ],
            "currentPlayerIndex": 0,
            "status": "IN_PROGRESS",
            "gameLog": (0..moves).map(|i| format!("move {i}")).collect::<Vec<_>>(),
        })
    }

    fn stored_identity() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.set(KEY_SESSION_ID, "G1").unwrap();
        store.set(KEY_DISPLAY_NAME, "Ana").unwrap();
        store
    }

    #[tokio::test(start_paused = true)]
    async fn rejoins_stored_identity_after_delay() {
        let mut h = Harness::start(stored_identity(), SessionConfig::default());
        h.connect().await;
        assert_eq!(h.joins(), 0);

        let event = h
            .next_matching(|e| matches!(e, SessionEvent::RejoinAttempted { .. }))
            .await;
        let SessionEvent::RejoinAttempted { identity } = event else {
            panic!("expected RejoinAttempted, got {event:?}");
        };
        assert_eq!(identity.session_id, "G1");
        assert_eq!(h.joins(), 1);
        assert_eq!(
            h.wire.subscribed.lock().unwrap().as_slice(),
            ["/topic/game/G1".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_delay_cancels_rejoin() {
        let mut h = Harness::start(stored_identity(), SessionConfig::default());
        h.connect().await;

        h.wire.connected.store(false, Ordering::Release);
        h.channel
            .send(ChannelEvent::Disconnected { reason: None })
            .await
            .unwrap();
        assert!(matches!(
            h.events.recv().await.unwrap(),
            SessionEvent::Disconnected { .. }
        ));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.joins(), 0);
        assert_eq!(h.session.view().await.unwrap().reconnect, crate::supervisor::ReconnectState::NotAttempted);
    }

    #[tokio::test(start_paused = true)]
    async fn join_move_and_notice_expiry() {
        let mut h = Harness::start(MemoryStore::new(), SessionConfig::default());
        h.connect().await;

        h.session.join("G1", "Ana").await.unwrap();
        h.push(serde_json::json!({ "type": "PLAYER_JOINED", "game": game_json(&[], 0), "playerId": "p1" }))
            .await;
        h.next_matching(|e| matches!(e, SessionEvent::IdentityConfirmed { .. }))
            .await;

        h.session.click_cell(4).await.unwrap();
        assert_eq!(
            h.wire.published.lock().unwrap().last().unwrap().1,
            serde_json::json!({ "gameId": "G1", "playerId": "p1", "position": 4 })
        );

        h.push(serde_json::json!({ "type": "MOVE_MADE", "game": game_json(&["EXTRA_TURN"], 1) }))
            .await;
        let SessionEvent::NoticeRaised(notice) = h
            .next_matching(|e| matches!(e, SessionEvent::NoticeRaised(_)))
            .await
        else {
            panic!("expected a notice");
        };
        assert_eq!(notice.message, "New power: Extra Turn!");

        let start = tokio::time::Instant::now();
        let cleared = h
            .next_matching(|e| matches!(e, SessionEvent::NoticeCleared { .. }))
            .await;
        assert_eq!(cleared, SessionEvent::NoticeCleared { id: notice.id });
        assert!(start.elapsed() >= DEFAULT_NOTICE_DURATION - Duration::from_millis(1));
        assert!(h.session.view().await.unwrap().notice.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_returned_and_reported() {
        let mut h = Harness::start(MemoryStore::new(), SessionConfig::default());
        let err = h.session.join("G1", "Ana").await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
        assert_eq!(
            h.events.recv().await.unwrap(),
            SessionEvent::Status {
                message: err.to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lobby_calls_need_a_lobby() {
        let h = Harness::start(MemoryStore::new(), SessionConfig::default());
        assert!(matches!(
            h.session.create_session().await,
            Err(SessionError::Lobby(_))
        ));
        assert!(matches!(h.session.restart().await, Err(SessionError::Lobby(_))));
    }

    struct FixedLobby;

    #[async_trait]
    impl LobbyApi for FixedLobby {
        async fn create_session(&self) -> Result<SessionId> {
            Ok("G9".into())
        }

        async fn restart_session(&self, session_id: &str) -> Result<()> {
            if session_id == "G1" {
                Ok(())
            } else {
                Err(SessionError::Lobby(format!("no session {session_id}")))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn restart_follows_the_pushed_state() {
        let mut h = Harness::start(
            MemoryStore::new(),
            SessionConfig::default().with_lobby(FixedLobby),
        );
        h.connect().await;
        assert!(matches!(
            h.session.restart().await,
            Err(SessionError::NoActiveGame)
        ));

        h.session.join("G1", "Ana").await.unwrap();
        h.push(serde_json::json!({ "type": "MOVE_MADE", "game": game_json(&[], 2) }))
            .await;
        h.next_matching(|e| matches!(e, SessionEvent::SnapshotRecorded { .. }))
            .await;
        assert_eq!(h.session.history().await.unwrap().len(), 1);

        // The restarted game arrives before the lobby answers.
        h.push(serde_json::json!({ "type": "GAME_UPDATE", "game": game_json(&[], 0) }))
            .await;
        h.next_matching(|e| *e == SessionEvent::HistoryReset).await;
        assert!(h.session.history().await.unwrap().is_empty());

        h.session.restart().await.unwrap();
        h.next_matching(|e| matches!(e, SessionEvent::Status { message } if message == "Game restarted"))
            .await;
        assert!(h.session.history().await.unwrap().is_empty());

        assert_eq!(h.session.create_session().await.unwrap(), "G9");
        h.next_matching(|e| matches!(e, SessionEvent::SessionCreated { session_id } if session_id == "G9"))
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_channel_and_ends_stream() {
        let mut h = Harness::start(MemoryStore::new(), SessionConfig::default());
        h.connect().await;

        h.session.shutdown().await;
        assert!(h.wire.closed.load(Ordering::Acquire));
        assert_eq!(
            h.events.recv().await.unwrap(),
            SessionEvent::Disconnected {
                reason: Some("session shut down".into())
            }
        );
        assert!(h.events.recv().await.is_none());
        assert!(matches!(
            h.session.view().await,
            Err(SessionError::SessionClosed)
        ));

        // A second shutdown is harmless.
        h.session.shutdown().await;
    }

    #[tokio::test]
    async fn config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.rejoin_delay, Duration::from_secs(1));
        assert_eq!(config.notice_duration, Duration::from_secs(4));
        assert_eq!(
            SessionConfig::default()
                .with_event_channel_capacity(0)
                .event_channel_capacity,
            1
        );
    }
}
