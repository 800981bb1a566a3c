//! The session state machine.
//!
//! [`SessionCore`] composes the reconciler, history recorder, targeting
//! coordinator, power watcher and reconnection supervisor on top of a
//! [`Publisher`] and an [`IdentityStore`]. It is synchronous and owns no
//! timers: it records the [`SessionEvent`]s it produced and the [`Timer`]s it
//! wants armed, and the caller drains both after every call. The async
//! [`GameSession`](crate::session::GameSession) driver is that caller in
//! production; tests drive the core directly.
//!
//! A game is *live* while it is held and its topic subscription belongs to
//! the current connection. After a disconnect the held game stays viewable
//! but stale, and the next connection rejoins.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, Publisher, SubscriptionId};
use crate::error::{Result, SessionError};
use crate::event::SessionEvent;
use crate::history::{HistoryRecorder, Recorded, Snapshot};
use crate::identity::{IdentityStore, SessionIdentity};
use crate::powers::{Notice, NoticeId, PowerWatcher};
use crate::protocol::{
    session_topic, Cell, FrameKind, GameState, GameStatus, JoinRequest, MoveRequest,
    ParticipantId, PowerKind, PowerRequest, SessionId, JOIN_DESTINATION, MOVE_DESTINATION,
    POWER_DESTINATION,
};
use crate::reconciler::Reconciler;
use crate::supervisor::{ReconnectState, ReconnectSupervisor};
use crate::targeting::{Intent, TargetingCoordinator, TargetingState};

/// A delay the core wants the driver to arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Call [`SessionCore::on_rejoin_timer`] after the rejoin delay.
    Rejoin,
    /// Call [`SessionCore::expire_notice`] after the notice duration.
    NoticeExpiry(NoticeId),
    /// Disarm the expiry of a notice that was dismissed early.
    CancelNotice(NoticeId),
}

/// Read-only picture of a session, for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub connected: bool,
    pub identity: SessionIdentity,
    /// Latest authoritative state, possibly stale (see [`live`](Self::live)).
    pub game: Option<GameState>,
    /// The held game is subscribed on the current connection.
    pub live: bool,
    /// The snapshot being displayed instead of the live state.
    pub viewing: Option<Arc<Snapshot>>,
    pub history_len: usize,
    pub targeting: TargetingState,
    pub notice: Option<Notice>,
    pub reconnect: ReconnectState,
}

impl SessionView {
    /// The board to draw: the viewed snapshot's, else the live one.
    pub fn displayed_board(&self) -> Option<&[Cell]> {
        match (&self.viewing, &self.game) {
            (Some(snapshot), _) => Some(&snapshot.board),
            (None, Some(game)) => Some(&game.board),
            (None, None) => None,
        }
    }

    /// The local participant holds the turn in the live state.
    pub fn is_my_turn(&self) -> bool {
        let Some(local) = self.identity.participant_id() else {
            return false;
        };
        self.game
            .as_ref()
            .and_then(GameState::active_participant)
            .is_some_and(|p| &p.id == local)
    }
}

pub struct SessionCore<P, S> {
    publisher: P,
    store: S,
    identity: SessionIdentity,
    connected: bool,
    game: Option<GameState>,
    /// Live subscription and the session it listens to.
    subscription: Option<(SubscriptionId, SessionId)>,
    reconciler: Reconciler,
    history: HistoryRecorder,
    viewing: Option<usize>,
    targeting: TargetingCoordinator,
    watcher: PowerWatcher,
    notice: Option<Notice>,
    supervisor: ReconnectSupervisor,
    events: Vec<SessionEvent>,
    timers: Vec<Timer>,
}

impl<P: Publisher, S: IdentityStore> SessionCore<P, S> {
    /// Build a core and load whatever identity `store` holds.
    pub fn new(publisher: P, store: S) -> Self {
        let identity = SessionIdentity::load(&store);
        if identity.is_resumable() {
            info!(
                session = %identity.session_id,
                name = %identity.display_name,
                "found stored session identity"
            );
        }
        Self {
            publisher,
            store,
            identity,
            connected: false,
            game: None,
            subscription: None,
            reconciler: Reconciler::new(),
            history: HistoryRecorder::new(),
            viewing: None,
            targeting: TargetingCoordinator::new(),
            watcher: PowerWatcher::new(),
            notice: None,
            supervisor: ReconnectSupervisor::new(),
            events: Vec::new(),
            timers: Vec::new(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn game(&self) -> Option<&GameState> {
        self.game.as_ref()
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn publisher_mut(&mut self) -> &mut P {
        &mut self.publisher
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Last connectivity transition seen on the channel.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn has_live_game(&self) -> bool {
        self.game.is_some() && self.subscription.is_some()
    }

    /// Events produced since the last call, oldest first.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Timers requested since the last call.
    pub fn take_timers(&mut self) -> Vec<Timer> {
        std::mem::take(&mut self.timers)
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            connected: self.connected,
            identity: self.identity.clone(),
            game: self.game.clone(),
            live: self.has_live_game(),
            viewing: self
                .viewing
                .and_then(|n| self.history.select(n))
                .map(Arc::clone),
            history_len: self.history.len(),
            targeting: self.targeting.state(),
            notice: self.notice.clone(),
            reconnect: self.supervisor.state(),
        }
    }

    // ── User operations ─────────────────────────────────────────────

    /// Join `session_id` as `display_name`: subscribe to the session topic,
    /// persist the credentials and publish the join request.
    ///
    /// Joining again with the same credentials keeps the confirmed
    /// participant, so a rejoin resumes the same seat.
    ///
    /// # Errors
    ///
    /// - [`SessionError::MissingIdentity`] if either value is blank
    /// - [`SessionError::NotConnected`] while the channel is down
    pub fn join(&mut self, session_id: &str, display_name: &str) -> Result<()> {
        let session_id = session_id.trim();
        let display_name = display_name.trim();
        if session_id.is_empty() || display_name.is_empty() {
            return self.reject(SessionError::MissingIdentity);
        }
        if !self.publisher.is_connected() {
            return self.reject(SessionError::NotConnected);
        }
        if self.identity.session_id != session_id || self.identity.display_name != display_name {
            self.identity = SessionIdentity::new(session_id, display_name);
        }
        self.issue_join()
    }

    /// A click on board cell `position`.
    ///
    /// Completes a pending targeted power, or else becomes a move.
    ///
    /// # Errors
    ///
    /// Any local rejection; see [`SessionError::is_local_rejection`]. Nothing
    /// is published when an error is returned.
    pub fn on_cell_click(&mut self, position: i32) -> Result<()> {
        if self.viewing.is_some() {
            return self.reject(SessionError::ViewingHistory);
        }
        let Ok(cell) = u8::try_from(position) else {
            return self.reject(SessionError::InvalidPosition(position));
        };
        let Some(ids) = self.acting_ids() else {
            return self.reject(SessionError::NoActiveGame);
        };
        // A stale game waits for the rejoin before it accepts actions.
        if !self.publisher.is_connected() || self.subscription.is_none() {
            return self.reject(SessionError::NotConnected);
        }

        let outcome = match &self.game {
            Some(game) => self.targeting.on_cell_click(cell, game, &ids.1),
            None => Err(SessionError::NoActiveGame),
        };
        match outcome {
            Ok(intent) => self.dispatch(intent, ids),
            Err(e) => self.reject(e),
        }
    }

    /// Select a power. Target-requiring powers arm the coordinator and wait
    /// for a cell click; the others are used right away.
    ///
    /// # Errors
    ///
    /// Any local rejection; see [`SessionError::is_local_rejection`].
    pub fn select_power(&mut self, kind: PowerKind) -> Result<()> {
        if self.viewing.is_some() {
            return self.reject(SessionError::ViewingHistory);
        }
        let Some(ids) = self.acting_ids() else {
            return self.reject(SessionError::NoActiveGame);
        };
        if !self.publisher.is_connected() || self.subscription.is_none() {
            return self.reject(SessionError::NotConnected);
        }
        let intent = self.targeting.select_power(kind);
        self.dispatch(intent, ids)
    }

    /// Drop a pending targeted power. Returns `true` if one was pending.
    pub fn cancel_targeting(&mut self) -> bool {
        let cancelled = self.targeting.cancel();
        if cancelled {
            self.emit(SessionEvent::TargetingCancelled);
        }
        cancelled
    }

    /// Display snapshot `sequence_number`, or the live state for `None`.
    ///
    /// # Errors
    ///
    /// [`SessionError::SnapshotNotFound`] for an unknown sequence number.
    pub fn select_snapshot(&mut self, sequence_number: Option<usize>) -> Result<()> {
        match sequence_number {
            None => {
                if self.viewing.take().is_some() {
                    self.emit(SessionEvent::ViewChanged { viewing: None });
                }
                Ok(())
            }
            Some(n) => {
                if self.history.select(n).is_none() {
                    return self.reject(SessionError::SnapshotNotFound(n));
                }
                self.cancel_targeting();
                self.viewing = Some(n);
                self.emit(SessionEvent::ViewChanged { viewing: Some(n) });
                Ok(())
            }
        }
    }

    /// Clear the current notice early. Returns `true` if one was showing.
    pub fn dismiss_notice(&mut self) -> bool {
        match self.notice.take() {
            Some(notice) => {
                self.timers.push(Timer::CancelNotice(notice.id));
                self.emit(SessionEvent::NoticeCleared { id: notice.id });
                true
            }
            None => false,
        }
    }

    /// Leave the session: unsubscribe, drop all session state and forget the
    /// stored identity.
    pub fn leave(&mut self) {
        if let Some((id, session)) = self.subscription.take() {
            debug!(%session, "unsubscribing");
            if let Err(e) = self.publisher.unsubscribe(&id) {
                debug!("unsubscribe not sent: {e}");
            }
        }
        self.drop_game();
        self.identity = SessionIdentity::default();
        if let Err(e) = SessionIdentity::clear(&mut self.store) {
            warn!("could not clear stored identity: {e}");
        }
        self.supervisor.reset();
        self.watcher.reset();
        info!("left session");
        self.emit(SessionEvent::Left);
    }

    /// The session a lobby restart would apply to.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoActiveGame`] when no game is held.
    pub fn restart_target(&mut self) -> Result<SessionId> {
        match &self.game {
            Some(game) => Ok(game.session_id.clone()),
            None => self.reject(SessionError::NoActiveGame),
        }
    }

    /// The lobby accepted a restart of `session_id`.
    ///
    /// The server pushes the fresh state before it answers, and the shrunk
    /// move log in that push is what resets the history. Clearing here would
    /// also drop snapshots recorded since.
    pub fn on_restarted(&mut self, session_id: &str) {
        if self.game.as_ref().map(|g| g.session_id.as_str()) != Some(session_id) {
            debug!(%session_id, "restart of a session we no longer hold");
            return;
        }
        info!(%session_id, "session restarted");
        self.status("Game restarted");
    }

    /// Surface text produced outside the core, e.g. a failed lobby call.
    pub fn report(&mut self, message: impl Into<String>) {
        self.status(message);
    }

    /// Surface a session freshly created by the lobby.
    pub fn on_session_created(&mut self, session_id: SessionId) {
        self.status(format!("Session created: {session_id}"));
        self.emit(SessionEvent::SessionCreated { session_id });
    }

    // ── Channel and timer input ─────────────────────────────────────

    pub fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                self.connected = true;
                self.emit(SessionEvent::Connected);
                let live = self.has_live_game();
                if self.supervisor.on_connected(&self.identity, live) {
                    self.timers.push(Timer::Rejoin);
                }
            }
            ChannelEvent::Disconnected { reason } => {
                // The subscription died with the connection.
                self.subscription = None;
                self.supervisor.on_disconnected();
                if std::mem::replace(&mut self.connected, false) {
                    self.emit(SessionEvent::Disconnected { reason });
                }
            }
            ChannelEvent::Message {
                subscription, body, ..
            } => self.on_push(&subscription, &body),
        }
    }

    /// The rejoin delay elapsed.
    pub fn on_rejoin_timer(&mut self) {
        let live = self.has_live_game();
        let connected = self.publisher.is_connected();
        if !self.supervisor.begin(connected, &self.identity, live) {
            return;
        }
        info!(session = %self.identity.session_id, "rejoining stored session");
        let identity = self.identity.clone();
        if let Err(e) = self.issue_join() {
            warn!("automatic rejoin failed: {e}");
        }
        self.supervisor.finish();
        self.emit(SessionEvent::RejoinAttempted { identity });
    }

    /// The display time of notice `id` ran out. Returns `true` if it was
    /// still showing; a newer notice is never cleared by an older timer.
    pub fn expire_notice(&mut self, id: NoticeId) -> bool {
        if self.notice.as_ref().is_some_and(|n| n.id == id) {
            self.notice = None;
            self.emit(SessionEvent::NoticeCleared { id });
            true
        } else {
            false
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn on_push(&mut self, subscription: &str, body: &str) {
        let current = self.subscription.as_ref().map(|(id, _)| id.as_str());
        if current != Some(subscription) {
            debug!(%subscription, "ignoring push for a stale subscription");
            return;
        }
        let Some(reconciliation) = self.reconciler.apply_raw(body, &mut self.identity) else {
            return;
        };

        if let Some(participant) = reconciliation.confirmed {
            if let Err(e) = self.identity.save_participant(&mut self.store) {
                warn!("could not persist participant: {e}");
            }
            info!(participant = %participant.id, symbol = %participant.symbol, "joined as participant");
            self.emit(SessionEvent::IdentityConfirmed { participant });
        }
        if let Some(state) = reconciliation.game_state {
            self.accept_state(reconciliation.kind, state);
        }
        if let Some(text) = reconciliation.status_text {
            self.status(text);
        }
    }

    fn accept_state(&mut self, kind: FrameKind, state: GameState) {
        match self.history.observe(&state) {
            Recorded::Unchanged => {}
            Recorded::Appended(sequence_number) => {
                self.emit(SessionEvent::SnapshotRecorded { sequence_number });
            }
            Recorded::Reset { appended } => {
                if self.viewing.take().is_some() {
                    self.emit(SessionEvent::ViewChanged { viewing: None });
                }
                self.emit(SessionEvent::HistoryReset);
                if let Some(sequence_number) = appended {
                    self.emit(SessionEvent::SnapshotRecorded { sequence_number });
                }
            }
        }

        let local = self.identity.participant_id().cloned();
        if let Some(notice) = self.watcher.observe(&state, local.as_deref()) {
            self.raise_notice(notice);
        }

        if state.status != GameStatus::InProgress {
            self.cancel_targeting();
        }

        self.emit(SessionEvent::StateUpdated {
            kind,
            state: Box::new(state.clone()),
        });
        self.game = Some(state);
    }

    fn raise_notice(&mut self, notice: Notice) {
        if let Some(previous) = self.notice.replace(notice.clone()) {
            self.emit(SessionEvent::NoticeCleared { id: previous.id });
        }
        self.timers.push(Timer::NoticeExpiry(notice.id));
        self.emit(SessionEvent::NoticeRaised(notice));
    }

    fn issue_join(&mut self) -> Result<()> {
        let session_id = self.identity.session_id.clone();
        let subscribed = matches!(&self.subscription, Some((_, s)) if *s == session_id);
        if !subscribed {
            if let Some((old, old_session)) = self.subscription.take() {
                debug!(session = %old_session, "switching sessions, unsubscribing");
                if let Err(e) = self.publisher.unsubscribe(&old) {
                    debug!("unsubscribe not sent: {e}");
                }
            }
            if self.game.as_ref().is_some_and(|g| g.session_id != session_id) {
                self.drop_game();
            }
            let id = match self.publisher.subscribe(&session_topic(&session_id)) {
                Ok(id) => id,
                Err(e) => return self.reject(e),
            };
            self.subscription = Some((id, session_id.clone()));
        }

        // All three entries, so a seat from another session never survives.
        if let Err(e) = self.identity.save(&mut self.store) {
            warn!("could not persist session identity: {e}");
        }

        let request = JoinRequest {
            session_id: session_id.clone(),
            display_name: self.identity.display_name.clone(),
        };
        self.publish(JOIN_DESTINATION, &request)?;
        self.supervisor.on_join_issued();
        info!(session = %session_id, name = %request.display_name, "join requested");
        self.status(format!("Joining session {session_id}..."));
        Ok(())
    }

    fn dispatch(&mut self, intent: Intent, (session_id, participant_id): (SessionId, ParticipantId)) -> Result<()> {
        match intent {
            Intent::PromptTarget(power) => {
                self.emit(SessionEvent::TargetPrompt { power });
                self.status(format!("Select a target cell for {}", power.display_name()));
                Ok(())
            }
            Intent::Move { position } => {
                debug!(position, "move");
                let request = MoveRequest {
                    session_id,
                    participant_id,
                    position,
                };
                self.publish(MOVE_DESTINATION, &request)
            }
            Intent::UsePower { kind, target } => {
                debug!(power = %kind, target, "use power");
                let request = PowerRequest {
                    session_id,
                    participant_id,
                    power_kind: kind,
                    target_position: target,
                };
                self.publish(POWER_DESTINATION, &request)
            }
        }
    }

    fn publish<T: Serialize>(&mut self, destination: &str, payload: &T) -> Result<()> {
        let body = serde_json::to_string(payload)?;
        match self.publisher.publish(destination, body) {
            Ok(()) => Ok(()),
            Err(e) => self.reject(e),
        }
    }

    /// Session and participant ids to act with, when both a game and a
    /// confirmed identity are held.
    fn acting_ids(&self) -> Option<(SessionId, ParticipantId)> {
        let game = self.game.as_ref()?;
        let participant = self.identity.participant_id()?;
        Some((game.session_id.clone(), participant.clone()))
    }

    fn drop_game(&mut self) {
        self.game = None;
        self.reset_history();
        self.cancel_targeting();
        self.dismiss_notice();
    }

    fn reset_history(&mut self) {
        let had_history = !self.history.is_empty();
        self.history.clear();
        if self.viewing.take().is_some() {
            self.emit(SessionEvent::ViewChanged { viewing: None });
        }
        if had_history {
            self.emit(SessionEvent::HistoryReset);
        }
    }

    fn reject<T>(&mut self, err: SessionError) -> Result<T> {
        debug!(%err, "rejected locally");
        self.status(err.to_string());
        Err(err)
    }

    fn status(&mut self, message: impl Into<String>) {
        self.emit(SessionEvent::Status {
            message: message.into(),
        });
    }

    fn emit(&mut self, event: SessionEvent) {
        self.events.push(event);
    }
}

impl<P, S> std::fmt::Debug for SessionCore<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCore")
            .field("connected", &self.connected)
            .field("session", &self.identity.session_id)
            .field("live", &(self.game.is_some() && self.subscription.is_some()))
            .field("history", &self.history.len())
            .finish()
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
    use crate::identity::{MemoryStore, KEY_DISPLAY_NAME, KEY_PARTICIPANT, KEY_SESSION_ID};
    use crate::protocol::{InboundFrame, Participant, BOARD_SIZE};
    use async_trait::async_trait;

    /// Records every request instead of sending it.
    #[derive(Debug, Default)]
    struct RecordingPublisher {
        connected: bool,
        next: u64,
        subscribed: Vec<(SubscriptionId, String)>,
        unsubscribed: Vec<SubscriptionId>,
        published: Vec<(String, serde_json::Value)>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId> {
            if !self.connected {
                return Err(SessionError::NotConnected);
            }
            self.next += 1;
            let id = format!("sub-{}", self.next);
            self.subscribed.push((id.clone(), topic.to_string()));
            Ok(id)
        }

        fn unsubscribe(&mut self, id: &SubscriptionId) -> Result<()> {
            self.unsubscribed.push(id.clone());
            Ok(())
        }

        fn publish(&mut self, destination: &str, body: String) -> Result<()> {
            if !self.connected {
                return Err(SessionError::NotConnected);
            }
            let json = serde_json::from_str(&body).unwrap();
            self.published.push((destination.to_string(), json));
            Ok(())
        }

        async fn close(&mut self) {
            self.connected = false;
        }
    }

    type Core = SessionCore<RecordingPublisher, MemoryStore>;

    fn participant(id: &str, name: &str, symbol: &str, caps: &[&str]) -> Participant {
        Participant {
            id: id.into(),
            display_name: name.into(),
            symbol: symbol.into(),
            score: 0,
            is_active: true,
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn game(participants: Vec<Participant>, active_index: usize, log: usize) -> GameState {
        GameState {
            session_id: "G1".into(),
            board: (0..BOARD_SIZE as u8)
                .map(|position| Cell {
                    position,
                    ..Cell::default()
                })
                .collect(),
            participants,
            active_index,
            status: GameStatus::InProgress,
            winner: None,
            move_log: (0..log).map(|i| format!("move {i}")).collect(),
            turn_count: log as u32,
            special_cells_enabled: true,
        }
    }

    fn push(core: &mut Core, kind: FrameKind, state: GameState, player: Option<&str>) {
        let frame = InboundFrame {
            kind,
            game_state: Some(state),
            participant_id: player.map(str::to_string),
            text: None,
        };
        let subscription = core.subscription.as_ref().unwrap().0.clone();
        core.on_channel_event(ChannelEvent::Message {
            subscription,
            destination: "/topic/game/G1".into(),
            body: serde_json::to_string(&frame).unwrap(),
        });
    }

    fn connected_core() -> Core {
        let publisher = RecordingPublisher {
            connected: true,
            ..Default::default()
        };
        let mut core = SessionCore::new(publisher, MemoryStore::new());
        core.on_channel_event(ChannelEvent::Connected);
        core.take_events();
        core
    }

    /// Connected, joined as Ana and confirmed as `p1` holding `X`, Bruno `p2`
    /// holding `O`. `active` picks whose turn it is.
    fn playing_core(active: usize) -> Core {
        let mut core = connected_core();
        core.join("G1", "Ana").unwrap();
        let roster = vec![
            participant("p1", "Ana", "X", &[]),
            participant("p2", "Bruno", "O", &[]),
        ];
        push(&mut core, FrameKind::PlayerJoined, game(roster, active, 0), Some("p1"));
        core.take_events();
        core.take_timers();
        core.publisher.published.clear();
        core
    }

    fn statuses(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Status { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn join_then_move() {
        let mut core = connected_core();
        core.join("G1", "Ana").unwrap();

        assert_eq!(core.publisher.subscribed[0].1, "/topic/game/G1");
        assert_eq!(
            core.publisher.published[0],
            (
                "/app/game/join".to_string(),
                serde_json::json!({ "gameId": "G1", "username": "Ana" })
            )
        );
        assert_eq!(core.store().get(KEY_SESSION_ID).as_deref(), Some("G1"));
        assert_eq!(core.store().get(KEY_DISPLAY_NAME).as_deref(), Some("Ana"));

        let roster = vec![participant("p1", "Ana", "X", &[])];
        push(&mut core, FrameKind::PlayerJoined, game(roster, 0, 0), Some("p1"));
        assert_eq!(
            core.identity().participant_id().map(String::as_str),
            Some("p1")
        );
        assert!(core.store().get(KEY_PARTICIPANT).unwrap().contains("\"p1\""));
        assert!(core
            .take_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::IdentityConfirmed { participant } if participant.symbol == "X")));

        core.on_cell_click(4).unwrap();
        assert_eq!(
            core.publisher.published.last().unwrap(),
            &(
                "/app/game/move".to_string(),
                serde_json::json!({ "gameId": "G1", "playerId": "p1", "position": 4 })
            )
        );
    }

    #[test]
    fn wrong_turn_is_rejected_without_publishing() {
        let mut core = playing_core(1);

        let err = core.on_cell_click(4).unwrap_err();
        assert!(matches!(err, SessionError::NotYourTurn));
        assert!(core.publisher.published.is_empty());
        assert_eq!(statuses(&core.take_events()), vec!["not your turn".to_string()]);
    }

    #[test]
    fn targeted_power_round_trip() {
        let mut core = playing_core(1);

        core.select_power(PowerKind::BlockCell).unwrap();
        assert!(core.publisher.published.is_empty());
        assert!(core
            .take_events()
            .contains(&SessionEvent::TargetPrompt { power: PowerKind::BlockCell }));

        // Targets ignore turn ownership.
        core.on_cell_click(5).unwrap();
        assert_eq!(core.publisher.published.len(), 1);
        assert_eq!(
            core.publisher.published[0],
            (
                "/app/game/power".to_string(),
                serde_json::json!({
                    "gameId": "G1",
                    "playerId": "p1",
                    "powerType": "BLOCK_CELL",
                    "targetPosition": 5
                })
            )
        );
        assert_eq!(core.view().targeting, TargetingState::Idle);
    }

    #[test]
    fn cancelled_power_publishes_nothing() {
        let mut core = playing_core(0);
        core.select_power(PowerKind::RemoveOpponent).unwrap();
        assert!(core.cancel_targeting());
        assert!(!core.cancel_targeting());
        assert!(core.publisher.published.is_empty());

        // With targeting gone the next click is a plain move again.
        core.on_cell_click(2).unwrap();
        assert_eq!(core.publisher.published[0].0, "/app/game/move");
    }

    #[test]
    fn untargeted_power_is_used_immediately() {
        let mut core = playing_core(0);
        core.select_power(PowerKind::ExtraTurn).unwrap();
        assert_eq!(
            core.publisher.published[0].1["targetPosition"],
            serde_json::json!(-1)
        );
    }

    #[test]
    fn duplicate_frame_records_one_snapshot() {
        let mut core = playing_core(0);
        let state = game(vec![participant("p1", "Ana", "X", &[])], 0, 1);

        push(&mut core, FrameKind::MoveMade, state.clone(), None);
        push(&mut core, FrameKind::MoveMade, state, None);

        let recorded = core
            .take_events()
            .iter()
            .filter(|e| matches!(e, SessionEvent::SnapshotRecorded { .. }))
            .count();
        assert_eq!(recorded, 1);
        assert_eq!(core.history().len(), 1);
    }

    #[test]
    fn history_follows_move_log() {
        let mut core = playing_core(0);
        for moves in 1..=4 {
            push(
                &mut core,
                FrameKind::MoveMade,
                game(vec![participant("p1", "Ana", "X", &[])], 0, moves),
                None,
            );
            let latest = core.history().latest().unwrap();
            assert_eq!(latest.sequence_number, moves - 1);
        }
    }

    #[test]
    fn capability_grant_raises_one_notice() {
        let mut core = playing_core(0);
        let me = |caps: &[&str]| game(vec![participant("p1", "Ana", "X", caps)], 0, 1);

        push(&mut core, FrameKind::MoveMade, me(&["EXTRA_TURN"]), None);
        let notices: Vec<_> = core
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::NoticeRaised(n) => Some(n),
                _ => None,
            })
            .collect();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].capability, "EXTRA_TURN");
        assert_eq!(core.take_timers(), vec![Timer::NoticeExpiry(notices[0].id)]);

        assert!(core.expire_notice(notices[0].id));
        assert!(core.view().notice.is_none());

        push(&mut core, FrameKind::GameUpdate, me(&["EXTRA_TURN"]), None);
        assert!(!core
            .take_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::NoticeRaised(_))));
    }

    #[test]
    fn stale_expiry_keeps_newer_notice() {
        let mut core = playing_core(0);
        let me = |caps: &[&str]| game(vec![participant("p1", "Ana", "X", caps)], 0, 1);

        push(&mut core, FrameKind::MoveMade, me(&["EXTRA_TURN"]), None);
        push(&mut core, FrameKind::MoveMade, me(&["EXTRA_TURN", "BLOCK_CELL"]), None);
        let timers = core.take_timers();
        let (Timer::NoticeExpiry(first), Timer::NoticeExpiry(second)) = (timers[0], timers[1]) else {
            panic!("expected two notice timers, got {timers:?}");
        };

        assert!(!core.expire_notice(first));
        assert_eq!(core.view().notice.unwrap().capability, "BLOCK_CELL");
        assert!(core.dismiss_notice());
        assert_eq!(core.take_timers(), vec![Timer::CancelNotice(second)]);
        assert!(!core.expire_notice(second));
    }

    #[test]
    fn stored_identity_rejoins_once_per_connection() {
        let mut store = MemoryStore::new();
        store.set(KEY_SESSION_ID, "G1").unwrap();
        store.set(KEY_DISPLAY_NAME, "Ana").unwrap();
        let publisher = RecordingPublisher {
            connected: true,
            ..Default::default()
        };
        let mut core = SessionCore::new(publisher, store);

        core.on_channel_event(ChannelEvent::Connected);
        assert_eq!(core.take_timers(), vec![Timer::Rejoin]);
        core.on_rejoin_timer();
        core.on_rejoin_timer();

        let joins = |core: &Core| {
            core.publisher
                .published
                .iter()
                .filter(|(d, _)| d == "/app/game/join")
                .count()
        };
        assert_eq!(joins(&core), 1);
        assert_eq!(core.view().reconnect, ReconnectState::Done);

        // A repeated Connected on the same connection does not rejoin.
        core.on_channel_event(ChannelEvent::Connected);
        assert!(core.take_timers().is_empty());

        core.on_channel_event(ChannelEvent::Disconnected { reason: None });
        core.on_channel_event(ChannelEvent::Connected);
        assert_eq!(core.take_timers(), vec![Timer::Rejoin]);
        core.on_rejoin_timer();
        assert_eq!(joins(&core), 2);
    }

    #[test]
    fn live_game_suppresses_rejoin() {
        let mut core = playing_core(0);
        core.on_channel_event(ChannelEvent::Connected);
        assert!(core.take_timers().is_empty());
    }

    #[test]
    fn disconnect_makes_the_game_stale() {
        let mut core = playing_core(0);
        core.on_channel_event(ChannelEvent::Disconnected {
            reason: Some("gone".into()),
        });
        assert!(core.game().is_some());
        assert!(!core.has_live_game());

        core.on_channel_event(ChannelEvent::Connected);
        assert_eq!(core.take_timers(), vec![Timer::Rejoin]);
        assert!(matches!(core.on_cell_click(4), Err(SessionError::NotConnected)));
        assert!(core.publisher.published.is_empty());

        core.on_rejoin_timer();
        assert!(core.has_live_game());
        // The confirmed seat survives the rejoin.
        assert_eq!(
            core.identity().participant_id().map(String::as_str),
            Some("p1")
        );
    }

    #[test]
    fn pushes_on_dead_subscriptions_are_ignored() {
        let mut core = playing_core(0);
        core.on_channel_event(ChannelEvent::Disconnected { reason: None });
        core.on_channel_event(ChannelEvent::Message {
            subscription: "sub-1".into(),
            destination: "/topic/game/G1".into(),
            body: serde_json::to_string(&InboundFrame {
                kind: FrameKind::MoveMade,
                game_state: Some(game(vec![], 0, 3)),
                participant_id: None,
                text: None,
            })
            .unwrap(),
        });
        assert_eq!(core.game().unwrap().move_log.len(), 0);
    }

    #[test]
    fn viewing_history_blocks_clicks() {
        let mut core = playing_core(0);
        push(
            &mut core,
            FrameKind::MoveMade,
            game(vec![participant("p1", "Ana", "X", &[])], 0, 1),
            None,
        );

        core.select_snapshot(Some(0)).unwrap();
        assert_eq!(core.view().viewing.unwrap().sequence_number, 0);
        assert!(matches!(
            core.on_cell_click(4),
            Err(SessionError::ViewingHistory)
        ));
        assert!(matches!(
            core.select_snapshot(Some(7)),
            Err(SessionError::SnapshotNotFound(7))
        ));

        core.select_snapshot(None).unwrap();
        core.on_cell_click(4).unwrap();
    }

    #[test]
    fn local_rejections() {
        let mut core = SessionCore::new(RecordingPublisher::default(), MemoryStore::new());
        assert!(matches!(
            core.join(" ", "Ana"),
            Err(SessionError::MissingIdentity)
        ));
        assert!(matches!(
            core.join("G1", "Ana"),
            Err(SessionError::NotConnected)
        ));
        assert!(matches!(
            core.on_cell_click(0),
            Err(SessionError::NoActiveGame)
        ));

        let mut core = playing_core(0);
        assert!(matches!(
            core.on_cell_click(-1),
            Err(SessionError::InvalidPosition(-1))
        ));
        assert!(matches!(
            core.on_cell_click(9),
            Err(SessionError::InvalidPosition(9))
        ));
        core.publisher.connected = false;
        assert!(matches!(
            core.on_cell_click(4),
            Err(SessionError::NotConnected)
        ));
        assert!(core.publisher.published.is_empty());
    }

    #[test]
    fn leave_forgets_everything() {
        let mut core = playing_core(0);
        push(
            &mut core,
            FrameKind::MoveMade,
            game(vec![participant("p1", "Ana", "X", &[])], 0, 1),
            None,
        );
        core.leave();

        assert_eq!(core.publisher.unsubscribed, vec!["sub-1".to_string()]);
        assert!(core.game().is_none());
        assert!(core.history().is_empty());
        assert_eq!(core.identity(), &SessionIdentity::default());
        assert!(core.store().get(KEY_SESSION_ID).is_none());
        assert!(core.store().get(KEY_PARTICIPANT).is_none());

        core.on_channel_event(ChannelEvent::Disconnected { reason: None });
        core.on_channel_event(ChannelEvent::Connected);
        assert!(core.take_timers().is_empty());
    }

    #[test]
    fn restart_push_resets_history_and_late_answer_keeps_it() {
        let mut core = playing_core(0);
        let me = |log| game(vec![participant("p1", "Ana", "X", &[])], 0, log);
        push(&mut core, FrameKind::MoveMade, me(2), None);
        assert_eq!(core.restart_target().unwrap(), "G1");

        // The server pushes the fresh game before answering the restart.
        push(&mut core, FrameKind::GameUpdate, me(0), None);
        assert!(core.history().is_empty());
        assert!(core.take_events().contains(&SessionEvent::HistoryReset));

        push(&mut core, FrameKind::MoveMade, me(1), None);
        assert_eq!(core.history().len(), 1);
        core.take_events();

        core.on_restarted("G1");
        assert_eq!(core.history().len(), 1);
        let events = core.take_events();
        assert!(!events.contains(&SessionEvent::HistoryReset));
        assert_eq!(statuses(&events), vec!["Game restarted".to_string()]);

        // A restart of a session we no longer hold is ignored.
        core.on_restarted("G7");
        assert!(core.take_events().is_empty());
    }

    #[test]
    fn switching_sessions_unsubscribes_the_old_topic() {
        let mut core = playing_core(0);
        core.join("G2", "Ana").unwrap();

        assert_eq!(core.publisher.unsubscribed, vec!["sub-1".to_string()]);
        assert_eq!(core.publisher.subscribed[1].1, "/topic/game/G2");
        assert!(core.game().is_none());
        assert!(core.identity().participant.is_none());
    }

    #[test]
    fn switching_sessions_forgets_the_stored_seat() {
        let mut core = playing_core(0);
        assert!(core.store().get(KEY_PARTICIPANT).is_some());

        core.join("G2", "Ana").unwrap();
        assert!(core.store().get(KEY_PARTICIPANT).is_none());

        // A restart before G2 confirms the seat must not act as G1's p1.
        let reloaded = SessionIdentity::load(core.store());
        assert_eq!(reloaded.session_id, "G2");
        assert_eq!(reloaded.display_name, "Ana");
        assert!(reloaded.participant.is_none());
    }

    #[test]
    fn rejoining_the_same_session_keeps_the_stored_seat() {
        let mut core = playing_core(0);
        core.join("G1", "Ana").unwrap();
        assert!(core.store().get(KEY_PARTICIPANT).unwrap().contains("\"p1\""));
    }

    #[test]
    fn manual_join_during_rejoin_delay_joins_once() {
        let mut store = MemoryStore::new();
        store.set(KEY_SESSION_ID, "G1").unwrap();
        store.set(KEY_DISPLAY_NAME, "Ana").unwrap();
        let publisher = RecordingPublisher {
            connected: true,
            ..Default::default()
        };
        let mut core = SessionCore::new(publisher, store);

        core.on_channel_event(ChannelEvent::Connected);
        assert_eq!(core.take_timers(), vec![Timer::Rejoin]);
        core.join("G1", "Ana").unwrap();
        core.on_rejoin_timer();

        let joins = core
            .publisher
            .published
            .iter()
            .filter(|(d, _)| d == "/app/game/join")
            .count();
        assert_eq!(joins, 1);
        assert!(!core
            .take_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::RejoinAttempted { .. })));
    }

    #[test]
    fn server_text_becomes_status() {
        let mut core = playing_core(0);
        let subscription = core.subscription.as_ref().unwrap().0.clone();
        core.on_channel_event(ChannelEvent::Message {
            subscription,
            destination: "/topic/game/G1".into(),
            body: r#"{"type":"ERROR","message":"No es tu turno"}"#.into(),
        });
        assert_eq!(statuses(&core.take_events()), vec!["No es tu turno".to_string()]);
        assert!(core.game().is_some());
    }

    #[test]
    fn view_reports_turn_and_board() {
        let core = playing_core(0);
        let view = core.view();
        assert!(view.is_my_turn());
        assert!(view.live);
        assert_eq!(view.displayed_board().unwrap().len(), BOARD_SIZE);

        let core = playing_core(1);
        assert!(!core.view().is_my_turn());
    }
}
