//! Automatic rejoin after a (re)connection.
//!
//! When the channel comes up while a resumable identity is stored and no live
//! game is held, the supervisor asks for one join after a short settle delay.
//! It is one-way per connection: `NotAttempted → Attempting → Done`, reset
//! only by a disconnect (or by leaving the session). A server that rejects the
//! join therefore costs one attempt per connection, never a storm.

use std::time::Duration;

use tracing::debug;

use crate::identity::SessionIdentity;

/// Settle delay between `Connected` and the automatic join.
pub const DEFAULT_REJOIN_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectState {
    #[default]
    NotAttempted,
    Attempting,
    Done,
}

#[derive(Debug, Default)]
pub struct ReconnectSupervisor {
    state: ReconnectState,
    armed: bool,
}

impl ReconnectSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    /// Whether a delayed attempt is scheduled.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    fn triggers(&self, identity: &SessionIdentity, has_live_game: bool) -> bool {
        self.state == ReconnectState::NotAttempted && identity.is_resumable() && !has_live_game
    }

    /// The channel reported `Connected`. Returns `true` when the caller must
    /// schedule [`begin`](Self::begin) after the settle delay.
    pub fn on_connected(&mut self, identity: &SessionIdentity, has_live_game: bool) -> bool {
        if self.armed || !self.triggers(identity, has_live_game) {
            return false;
        }
        self.armed = true;
        debug!(session = %identity.session_id, "scheduling automatic rejoin");
        true
    }

    /// The settle delay elapsed. Re-checks the trigger; returns `true` when
    /// the caller must issue the join now and then call
    /// [`finish`](Self::finish).
    pub fn begin(&mut self, connected: bool, identity: &SessionIdentity, has_live_game: bool) -> bool {
        if !std::mem::take(&mut self.armed) {
            return false;
        }
        if !connected || !self.triggers(identity, has_live_game) {
            debug!("automatic rejoin no longer needed");
            return false;
        }
        self.state = ReconnectState::Attempting;
        true
    }

    /// The join was issued, whatever its outcome.
    pub fn finish(&mut self) {
        if self.state == ReconnectState::Attempting {
            self.state = ReconnectState::Done;
        }
    }

    /// A join went out on this connection, by hand or automatically. Any
    /// scheduled attempt is dropped; the next one waits for a reconnect.
    pub fn on_join_issued(&mut self) {
        self.armed = false;
        self.state = ReconnectState::Done;
    }

    /// The channel reported `Disconnected`: the next connection gets a fresh
    /// attempt and any scheduled one is dropped.
    pub fn on_disconnected(&mut self) {
        self.reset();
    }

    pub fn reset(&mut self) {
        self.state = ReconnectState::NotAttempted;
        self.armed = false;
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

    fn resumable() -> SessionIdentity {
        SessionIdentity::new("G1", "Ana")
    }

    #[test]
    fn one_attempt_per_connection() {
        let mut supervisor = ReconnectSupervisor::new();
        let identity = resumable();

        assert!(supervisor.on_connected(&identity, false));
        // A duplicate Connected notification does not schedule twice.
        assert!(!supervisor.on_connected(&identity, false));

        assert!(supervisor.begin(true, &identity, false));
        assert_eq!(supervisor.state(), ReconnectState::Attempting);
        supervisor.finish();
        assert_eq!(supervisor.state(), ReconnectState::Done);

        assert!(!supervisor.on_connected(&identity, false));
        assert!(!supervisor.begin(true, &identity, false));
    }

    #[test]
    fn disconnect_resets_for_next_connection() {
        let mut supervisor = ReconnectSupervisor::new();
        let identity = resumable();

        for _ in 0..3 {
            assert!(supervisor.on_connected(&identity, false));
            assert!(supervisor.begin(true, &identity, false));
            supervisor.finish();
            supervisor.on_disconnected();
            assert_eq!(supervisor.state(), ReconnectState::NotAttempted);
        }
    }

    #[test]
    fn no_attempt_without_identity_or_with_live_game() {
        let mut supervisor = ReconnectSupervisor::new();
        assert!(!supervisor.on_connected(&SessionIdentity::default(), false));
        assert!(!supervisor.on_connected(&resumable(), true));
        assert!(!supervisor.is_armed());
    }

    #[test]
    fn conditions_are_rechecked_after_delay() {
        let mut supervisor = ReconnectSupervisor::new();
        let identity = resumable();

        assert!(supervisor.on_connected(&identity, false));
        // The user joined by hand during the delay.
        assert!(!supervisor.begin(true, &identity, true));
        assert_eq!(supervisor.state(), ReconnectState::NotAttempted);
        assert!(!supervisor.is_armed());
    }

    #[test]
    fn manual_join_satisfies_the_connection() {
        let mut supervisor = ReconnectSupervisor::new();
        let identity = resumable();

        assert!(supervisor.on_connected(&identity, false));
        supervisor.on_join_issued();
        assert!(!supervisor.is_armed());
        assert!(!supervisor.begin(true, &identity, false));
        assert_eq!(supervisor.state(), ReconnectState::Done);

        supervisor.on_disconnected();
        assert!(supervisor.on_connected(&identity, false));
    }

    #[test]
    fn disconnect_during_delay_cancels() {
        let mut supervisor = ReconnectSupervisor::new();
        let identity = resumable();

        assert!(supervisor.on_connected(&identity, false));
        supervisor.on_disconnected();
        assert!(!supervisor.begin(true, &identity, false));
    }
}
