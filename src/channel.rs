//! Reconnecting publish/subscribe channel over STOMP.
//!
//! [`PubSubChannel`] is a thin handle that talks to a background channel loop
//! over an unbounded MPSC queue. The loop owns the [`Connector`], performs the
//! STOMP handshake, multiplexes outgoing frames and incoming pushes with
//! `tokio::select!`, and reconnects after [`ChannelConfig::reconnect_delay`]
//! whenever the link drops. Connectivity changes and topic pushes come out of
//! the bounded [`ChannelEvent`] receiver returned by [`PubSubChannel::start`].
//!
//! Subscriptions belong to one connection: when the link drops they are
//! forgotten, and the owner re-subscribes after the next
//! [`ChannelEvent::Connected`].
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = WebSocketConnector::new("ws://localhost:8080/ws/websocket");
//! let (mut channel, mut events) = PubSubChannel::start(connector, ChannelConfig::default());
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ChannelEvent::Connected => {
//!             channel.subscribe("/topic/game/G1")?;
//!         }
//!         ChannelEvent::Message { body, .. } => println!("{body}"),
//!         ChannelEvent::Disconnected { .. } => {}
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SessionError};
use crate::stomp::{self, Command, Frame};
use crate::transport::{Connector, Transport};

/// Default delay between losing the link and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default bound on connect plus STOMP handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default value of the STOMP `host` header.
pub const DEFAULT_STOMP_HOST: &str = "localhost";

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle for one topic subscription, valid for the current connection.
pub type SubscriptionId = String;

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`PubSubChannel`].
///
/// # Example
///
/// ```
/// use ttt_session_client::channel::ChannelConfig;
/// use std::time::Duration;
///
/// let config = ChannelConfig::new("game.example.com")
///     .with_reconnect_delay(Duration::from_secs(2))
///     .with_event_channel_capacity(64);
/// assert_eq!(config.host, "game.example.com");
/// assert_eq!(config.reconnect_delay, Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Virtual host sent in the STOMP `CONNECT` frame.
    pub host: String,
    /// Wait between a lost or failed connection and the next attempt.
    ///
    /// Defaults to **5 seconds**.
    pub reconnect_delay: Duration,
    /// Upper bound for opening the transport and completing the handshake.
    /// `None` waits indefinitely.
    ///
    /// Defaults to **10 seconds**.
    pub connect_timeout: Option<Duration>,
    /// Capacity of the bounded event channel.
    ///
    /// Topic pushes that do not fit are dropped with a warning.
    /// Connectivity events are always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time the loop gets to say goodbye to the server on
    /// [`PubSubChannel::disconnect`] before it is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl ChannelConfig {
    /// Create a configuration for the given STOMP host with default values.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
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
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STOMP_HOST)
    }
}

// ── Events and commands ─────────────────────────────────────────────

/// Notifications produced by the channel loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The STOMP handshake completed.
    Connected,
    /// The link was lost or closed. Every subscription is gone.
    Disconnected { reason: Option<String> },
    /// A push on a live subscription.
    Message {
        subscription: SubscriptionId,
        destination: String,
        body: String,
    },
}

#[derive(Debug)]
enum ChannelCommand {
    Subscribe { id: SubscriptionId, topic: String },
    Unsubscribe { id: SubscriptionId },
    Publish { destination: String, body: String },
}

// ── Publisher seam ──────────────────────────────────────────────────

/// The outgoing half of a pub/sub channel, as seen by the session core.
///
/// All calls except [`close`](Publisher::close) are fire-and-forget: they
/// return once the request is queued.
#[async_trait]
pub trait Publisher: Send + 'static {
    fn is_connected(&self) -> bool;

    /// # Errors
    ///
    /// [`SessionError::NotConnected`] while the link is down.
    fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId>;

    /// # Errors
    ///
    /// [`SessionError::NotConnected`] while the link is down.
    fn unsubscribe(&mut self, id: &SubscriptionId) -> Result<()>;

    /// # Errors
    ///
    /// [`SessionError::NotConnected`] while the link is down.
    fn publish(&mut self, destination: &str, body: String) -> Result<()>;

    /// Tear the channel down for good. Calling it twice must be harmless.
    async fn close(&mut self);
}

// ── Channel handle ──────────────────────────────────────────────────

struct ChannelState {
    connected: AtomicBool,
}

/// Handle to a reconnecting STOMP channel.
///
/// Created via [`PubSubChannel::start`], which spawns the background loop.
pub struct PubSubChannel {
    cmd_tx: mpsc::UnboundedSender<ChannelCommand>,
    state: Arc<ChannelState>,
    next_subscription: AtomicU64,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl PubSubChannel {
    /// Spawn the channel loop and return a handle plus event receiver.
    ///
    /// The loop starts connecting immediately and keeps reconnecting until
    /// [`disconnect`](Self::disconnect) is called or the handle is dropped.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        connector: impl Connector,
        config: ChannelConfig,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        // tokio panics on a zero capacity.
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let state = Arc::new(ChannelState {
            connected: AtomicBool::new(false),
        });
        let shutdown_timeout = config.shutdown_timeout;

        let task = tokio::spawn(channel_loop(
            connector,
            config,
            cmd_rx,
            event_tx,
            Arc::clone(&state),
            shutdown_rx,
        ));

        let channel = Self {
            cmd_tx,
            state,
            next_subscription: AtomicU64::new(0),
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };
        (channel, event_rx)
    }

    /// Returns `true` while a STOMP session is established.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// Subscribe to `topic` on the current connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] while the link is down.
    pub fn subscribe(&self, topic: &str) -> Result<SubscriptionId> {
        let n = self.next_subscription.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("sub-{n}");
        self.send(ChannelCommand::Subscribe {
            id: id.clone(),
            topic: topic.to_string(),
        })?;
        Ok(id)
    }

    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] while the link is down.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> Result<()> {
        self.send(ChannelCommand::Unsubscribe { id: id.clone() })
    }

    /// Send a JSON body to `destination`. No confirmation, no retry.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] while the link is down.
    pub fn publish(&self, destination: &str, body: String) -> Result<()> {
        self.send(ChannelCommand::Publish {
            destination: destination.to_string(),
            body,
        })
    }

    /// Tear the channel down: say `DISCONNECT`, close the transport and stop
    /// reconnecting. Safe to call more than once.
    pub async fn disconnect(&mut self) {
        debug!("PubSubChannel: disconnect requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("channel loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("channel loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("channel loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
    }

    fn send(&self, cmd: ChannelCommand) -> Result<()> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.cmd_tx.send(cmd).map_err(|_| SessionError::NotConnected)
    }
}

#[async_trait]
impl Publisher for PubSubChannel {
    fn is_connected(&self) -> bool {
        PubSubChannel::is_connected(self)
    }

    fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId> {
        PubSubChannel::subscribe(self, topic)
    }

    fn unsubscribe(&mut self, id: &SubscriptionId) -> Result<()> {
        PubSubChannel::unsubscribe(self, id)
    }

    fn publish(&mut self, destination: &str, body: String) -> Result<()> {
        PubSubChannel::publish(self, destination, body)
    }

    async fn close(&mut self) {
        self.disconnect().await;
    }
}

impl std::fmt::Debug for PubSubChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubChannel")
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for PubSubChannel {
    fn drop(&mut self) {
        // No executor to drive a graceful DISCONNECT here; abort instead.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Channel loop ────────────────────────────────────────────────────

/// Why a connection ended.
enum Exit {
    /// The handle asked us to stop.
    Shutdown,
    /// The link broke; reconnect.
    Lost(Option<String>),
}

/// Connect, serve, and reconnect until shut down.
async fn channel_loop<C: Connector>(
    mut connector: C,
    config: ChannelConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<ChannelCommand>,
    event_tx: mpsc::Sender<ChannelEvent>,
    state: Arc<ChannelState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("channel loop started");

    loop {
        let attempt = tokio::select! {
            result = open_session(&mut connector, &config) => result,
            _ = &mut shutdown_rx => break,
        };

        match attempt {
            Ok(mut transport) => {
                info!("pub/sub session established");
                state.connected.store(true, Ordering::Release);
                emit_blocking(&event_tx, ChannelEvent::Connected).await;

                let mut subscriptions = HashMap::new();
                let exit = serve(
                    &mut transport,
                    &mut subscriptions,
                    &mut cmd_rx,
                    &event_tx,
                    &mut shutdown_rx,
                )
                .await;
                state.connected.store(false, Ordering::Release);

                match exit {
                    Exit::Shutdown => {
                        say_goodbye(&mut transport).await;
                        emit_blocking(
                            &event_tx,
                            ChannelEvent::Disconnected {
                                reason: Some("channel shut down".into()),
                            },
                        )
                        .await;
                        break;
                    }
                    Exit::Lost(reason) => {
                        warn!(?reason, "pub/sub connection lost");
                        let _ = transport.close().await;
                        emit_blocking(&event_tx, ChannelEvent::Disconnected { reason }).await;
                    }
                }
            }
            Err(e) => {
                warn!("connection attempt failed: {e}");
            }
        }

        if !wait_before_retry(config.reconnect_delay, &mut cmd_rx, &mut shutdown_rx).await {
            break;
        }
        debug!("reconnecting");
    }

    debug!("channel loop exited");
}

/// Open a transport and complete the STOMP handshake.
async fn open_session<C: Connector>(
    connector: &mut C,
    config: &ChannelConfig,
) -> Result<C::Transport> {
    let handshake = async {
        let mut transport = connector.connect().await?;
        transport.send(Frame::connect(&config.host).encode()).await?;
        await_connected(&mut transport).await?;
        Ok::<_, SessionError>(transport)
    };
    match config.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| SessionError::Timeout)?,
        None => handshake.await,
    }
}

async fn await_connected(transport: &mut impl Transport) -> Result<()> {
    loop {
        let text = match transport.recv().await {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(e),
            None => return Err(SessionError::TransportClosed),
        };
        for frame in stomp::decode_frames(&text)? {
            match frame.command {
                Command::Connected => {
                    debug!(version = ?frame.header("version"), "STOMP handshake complete");
                    return Ok(());
                }
                Command::Error => {
                    let message = frame.header("message").unwrap_or("handshake rejected");
                    return Err(SessionError::Stomp(message.to_string()));
                }
                other => debug!(command = %other, "ignoring frame before CONNECTED"),
            }
        }
    }
}

/// Multiplex one established connection until it ends.
async fn serve(
    transport: &mut impl Transport,
    subscriptions: &mut HashMap<SubscriptionId, String>,
    cmd_rx: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    event_tx: &mpsc::Sender<ChannelEvent>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> Exit {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("command channel closed, shutting down channel loop");
                    return Exit::Shutdown;
                };
                let frame = match cmd {
                    ChannelCommand::Subscribe { id, topic } => {
                        let frame = Frame::subscribe(&id, &topic);
                        subscriptions.insert(id, topic);
                        frame
                    }
                    ChannelCommand::Unsubscribe { id } => {
                        subscriptions.remove(&id);
                        Frame::unsubscribe(&id)
                    }
                    ChannelCommand::Publish { destination, body } => Frame::send(&destination, body),
                };
                debug!(command = %frame.command, destination = ?frame.header("destination"), "sending frame");
                if let Err(e) = transport.send(frame.encode()).await {
                    error!("transport send error: {e}");
                    return Exit::Lost(Some(format!("transport send error: {e}")));
                }
            }

            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                return Exit::Shutdown;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => dispatch_inbound(&text, subscriptions, event_tx),
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return Exit::Lost(Some(format!("transport receive error: {e}")));
                    }
                    None => {
                        debug!("transport closed by server");
                        return Exit::Lost(None);
                    }
                }
            }
        }
    }
}

/// Route the frames of one transport message.
fn dispatch_inbound(
    text: &str,
    subscriptions: &HashMap<SubscriptionId, String>,
    event_tx: &mpsc::Sender<ChannelEvent>,
) {
    let frames = match stomp::decode_frames(text) {
        Ok(frames) => frames,
        Err(e) => {
            warn!("failed to decode STOMP message: {e} — raw: {text}");
            return;
        }
    };

    for frame in frames {
        match frame.command {
            Command::Message => {
                let subscription = frame.header("subscription").unwrap_or_default();
                if !subscriptions.contains_key(subscription) {
                    debug!(%subscription, "dropping push for unknown subscription");
                    continue;
                }
                let event = ChannelEvent::Message {
                    subscription: subscription.to_string(),
                    destination: frame.header("destination").unwrap_or_default().to_string(),
                    body: frame.body,
                };
                emit_event(event_tx, event);
            }
            Command::Error => {
                warn!(
                    message = frame.header("message").unwrap_or_default(),
                    body = %frame.body,
                    "server reported a STOMP error"
                );
            }
            other => debug!(command = %other, "ignoring frame"),
        }
    }
}

/// Sit out the reconnect delay. Commands queued meanwhile are discarded.
/// Returns `false` if the loop must stop instead.
async fn wait_before_retry(
    delay: Duration,
    cmd_rx: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            _ = &mut *shutdown_rx => return false,
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => debug!(?cmd, "dropping command while disconnected"),
                None => return false,
            },
        }
    }
}

async fn say_goodbye(transport: &mut impl Transport) {
    if let Err(e) = transport.send(Frame::disconnect("bye").encode()).await {
        debug!("DISCONNECT not delivered: {e}");
    }
    if let Err(e) = transport.close().await {
        debug!("transport close failed: {e}");
    }
}

/// Emit a push. If the channel is full, log a warning and drop it so the loop
/// never blocks on a slow consumer.
fn emit_event(event_tx: &mpsc::Sender<ChannelEvent>, event: ChannelEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("event channel full, dropping pushed message");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Connectivity transitions must never be lost.
async fn emit_blocking(event_tx: &mpsc::Sender<ChannelEvent>, event: ChannelEvent) {
    if event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
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
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    type Script = mpsc::UnboundedSender<std::result::Result<String, SessionError>>;

    /// A transport fed by the test through an unbounded channel. Dropping the
    /// script sender closes the transport cleanly.
    struct MockTransport {
        incoming: mpsc::UnboundedReceiver<std::result::Result<String, SessionError>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, frame: String) -> std::result::Result<(), SessionError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SessionError>> {
            self.incoming.recv().await
        }

        async fn close(&mut self) -> std::result::Result<(), SessionError> {
            self.closed.store(true, Ordering::Release);
            Ok(())
        }
    }

    struct Server {
        script: Script,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl Server {
        fn push(&self, frame: Frame) {
            let _ = self.script.send(Ok(frame.encode()));
        }

        fn sent_frames(&self) -> Vec<Frame> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .flat_map(|raw| stomp::decode_frames(raw).unwrap())
                .collect()
        }
    }

    /// A server that answers the handshake straight away.
    fn accepting_server() -> (MockTransport, Server) {
        let (script, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let server = Server {
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

    /// Hands out scripted transports in order, then never connects again.
    struct MockConnector {
        transports: VecDeque<std::result::Result<MockTransport, SessionError>>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Transport = MockTransport;

        async fn connect(&mut self) -> std::result::Result<MockTransport, SessionError> {
            match self.transports.pop_front() {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }

    fn connector(
        transports: Vec<std::result::Result<MockTransport, SessionError>>,
    ) -> MockConnector {
        MockConnector {
            transports: transports.into(),
        }
    }

    fn push_for(subscription: &str, body: &str) -> Frame {
        Frame::new(Command::Message)
            .with_header("destination", "/topic/game/G1")
            .with_header("subscription", subscription)
            .with_header("message-id", "m-1")
            .with_body(body)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_then_connected() {
        let (transport, server) = accepting_server();
        let (mut channel, mut events) = PubSubChannel::start(
            connector(vec![Ok(transport)]),
            ChannelConfig::new("games.local"),
        );

        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Connected);
        assert!(channel.is_connected());

        let first = &server.sent_frames()[0];
        assert_eq!(first.command, Command::Connect);
        assert_eq!(first.header("host"), Some("games.local"));
        assert_eq!(first.header("heart-beat"), Some("0,0"));

        channel.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_delivers_pushes() {
        let (transport, server) = accepting_server();
        let (mut channel, mut events) =
            PubSubChannel::start(connector(vec![Ok(transport)]), ChannelConfig::default());
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Connected);

        let id = channel.subscribe("/topic/game/G1").unwrap();
        assert_eq!(id, "sub-1");
        settle().await;

        let subscribe = server
            .sent_frames()
            .into_iter()
            .find(|f| f.command == Command::Subscribe)
            .unwrap();
        assert_eq!(subscribe.header("destination"), Some("/topic/game/G1"));
        assert_eq!(subscribe.header("id"), Some("sub-1"));

        server.push(push_for("sub-1", r#"{"type":"GAME_UPDATE"}"#));
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Message {
                subscription: "sub-1".into(),
                destination: "/topic/game/G1".into(),
                body: r#"{"type":"GAME_UPDATE"}"#.into(),
            }
        );

        channel.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pushes_for_unknown_subscriptions_are_dropped() {
        let (transport, server) = accepting_server();
        let (mut channel, mut events) =
            PubSubChannel::start(connector(vec![Ok(transport)]), ChannelConfig::default());
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Connected);

        server.push(push_for("sub-9", "{}"));
        settle().await;
        assert!(events.try_recv().is_err());

        channel.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn publish_sends_json_frame() {
        let (transport, server) = accepting_server();
        let (mut channel, mut events) =
            PubSubChannel::start(connector(vec![Ok(transport)]), ChannelConfig::default());
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Connected);

        channel
            .publish("/app/game/move", r#"{"position":4}"#.into())
            .unwrap();
        settle().await;

        let send = server
            .sent_frames()
            .into_iter()
            .find(|f| f.command == Command::Send)
            .unwrap();
        assert_eq!(send.header("destination"), Some("/app/game/move"));
        assert_eq!(send.header("content-type"), Some("application/json"));
        assert_eq!(send.body, r#"{"position":4}"#);

        channel.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn requests_are_rejected_before_connecting() {
        let (channel, _events) =
            PubSubChannel::start(connector(vec![]), ChannelConfig::default());
        assert!(!channel.is_connected());
        assert!(matches!(
            channel.subscribe("/topic/game/G1"),
            Err(SessionError::NotConnected)
        ));
        assert!(matches!(
            channel.publish("/app/game/join", "{}".into()),
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_loss_and_forgets_subscriptions() {
        let (first, first_server) = accepting_server();
        let (second, second_server) = accepting_server();
        let (mut channel, mut events) = PubSubChannel::start(
            connector(vec![Ok(first), Ok(second)]),
            ChannelConfig::default().with_reconnect_delay(Duration::from_secs(5)),
        );
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Connected);
        channel.subscribe("/topic/game/G1").unwrap();
        settle().await;

        drop(first_server);
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Disconnected { reason: None }
        );
        assert!(!channel.is_connected());

        let before = tokio::time::Instant::now();
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Connected);
        assert!(before.elapsed() >= Duration::from_secs(4));

        // The old subscription died with the first connection.
        second_server.push(push_for("sub-1", "{}"));
        settle().await;
        assert!(events.try_recv().is_err());

        channel.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_are_retried() {
        let (transport, _server) = accepting_server();
        let (mut channel, mut events) = PubSubChannel::start(
            connector(vec![
                Err(SessionError::TransportClosed),
                Err(SessionError::TransportClosed),
                Ok(transport),
            ]),
            ChannelConfig::default(),
        );

        // Failed attempts never surface as events.
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Connected);
        channel.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_error_frame_is_a_failed_attempt() {
        let (script, incoming) = mpsc::unbounded_channel();
        let _ = script.send(Ok(Frame::new(Command::Error)
            .with_header("message", "bad host")
            .encode()));
        let rejecting = MockTransport {
            incoming,
            sent: Arc::new(StdMutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let (transport, _server) = accepting_server();

        let (mut channel, mut events) = PubSubChannel::start(
            connector(vec![Ok(rejecting), Ok(transport)]),
            ChannelConfig::default(),
        );
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Connected);
        channel.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_says_goodbye_and_is_idempotent() {
        let (transport, server) = accepting_server();
        let (mut channel, mut events) =
            PubSubChannel::start(connector(vec![Ok(transport)]), ChannelConfig::default());
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Connected);

        channel.disconnect().await;
        channel.disconnect().await;

        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Disconnected {
                reason: Some("channel shut down".into())
            }
        );
        assert!(events.recv().await.is_none());
        assert!(server.closed.load(Ordering::Acquire));
        assert!(server
            .sent_frames()
            .iter()
            .any(|f| f.command == Command::Disconnect));
        assert!(matches!(
            channel.publish("/app/game/join", "{}".into()),
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn full_event_channel_drops_pushes_but_not_connectivity() {
        let (transport, server) = accepting_server();
        let (mut channel, mut events) = PubSubChannel::start(
            connector(vec![Ok(transport)]),
            ChannelConfig::default().with_event_channel_capacity(1),
        );
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Connected);
        channel.subscribe("/topic/game/G1").unwrap();
        settle().await;

        for _ in 0..5 {
            server.push(push_for("sub-1", "{}"));
        }
        settle().await;
        drop(server);

        let mut messages = 0;
        loop {
            match events.recv().await.unwrap() {
                ChannelEvent::Message { .. } => messages += 1,
                ChannelEvent::Disconnected { .. } => break,
                ChannelEvent::Connected => panic!("unexpected reconnect"),
            }
        }
        assert!(messages < 5, "expected backpressure to drop pushes");

        channel.disconnect().await;
    }

    #[test]
    fn config_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.host, DEFAULT_STOMP_HOST);
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(
            ChannelConfig::default()
                .with_event_channel_capacity(0)
                .event_channel_capacity,
            1
        );
    }
}
