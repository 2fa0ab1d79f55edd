//! The observer link state machine.
//!
//! All connection state and every retry counter live in one struct with a
//! pure transition function, so the backoff/ceiling rules can be tested
//! exhaustively without touching the network. The driver task in
//! [`crate::link`] only ever acts on the [`LossAction`] this machine
//! returns.

use std::time::Duration;

use crate::reconnect::{next_delay, ReconnectConfig};

/// Connection lifecycle of a single observer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No channel open and none being opened.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The channel is open and receiving.
    Connected,
    /// The channel was lost abnormally; a retry is pending.
    Reconnecting,
    /// The attempt ceiling was exceeded; only a manual reset resumes.
    Failed,
}

/// What the driver should do after a connection loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossAction {
    /// Normal close: do not reconnect.
    Stop,
    /// Abnormal close within budget: retry after this delay.
    ReconnectAfter(Duration),
    /// Attempt ceiling exceeded: surface a terminal failure.
    GiveUp,
}

/// One observer connection's authoritative state.
#[derive(Debug, Clone)]
pub struct LinkState {
    config: ReconnectConfig,
    conn: ConnState,
    /// Consecutive abnormal losses since the last successful connect.
    attempts: u32,
    /// Delay for the next scheduled reconnect.
    delay: Duration,
}

impl LinkState {
    pub fn new(config: ReconnectConfig) -> Self {
        let delay = config.initial_delay;
        Self {
            config,
            conn: ConnState::Disconnected,
            attempts: 0,
            delay,
        }
    }

    pub fn state(&self) -> ConnState {
        self.conn
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Move to `Connecting`. Returns `false` (and changes nothing) if a
    /// connect is already in flight or the link is already up -- concurrent
    /// connect attempts are suppressed.
    pub fn begin_connect(&mut self) -> bool {
        match self.conn {
            ConnState::Connecting | ConnState::Connected => false,
            ConnState::Disconnected | ConnState::Reconnecting | ConnState::Failed => {
                self.conn = ConnState::Connecting;
                true
            }
        }
    }

    /// The channel opened: reset the retry budget and the backoff delay to
    /// its floor.
    pub fn connected(&mut self) {
        self.conn = ConnState::Connected;
        self.attempts = 0;
        self.delay = self.config.initial_delay;
    }

    /// The channel closed (or a connect attempt failed).
    ///
    /// `normal` closes never schedule a reconnect. Abnormal losses consume
    /// one attempt and return the delay to wait before retrying; the delay
    /// then grows toward the ceiling.
    pub fn connection_lost(&mut self, normal: bool) -> LossAction {
        if normal {
            self.conn = ConnState::Disconnected;
            return LossAction::Stop;
        }

        self.attempts += 1;
        if self.attempts > self.config.max_attempts {
            self.conn = ConnState::Failed;
            return LossAction::GiveUp;
        }

        let wait = self.delay;
        self.delay = next_delay(self.delay, &self.config);
        self.conn = ConnState::Reconnecting;
        LossAction::ReconnectAfter(wait)
    }

    /// Manual reset: clear the counters so the next connect retries
    /// immediately with a fresh budget.
    pub fn reset(&mut self) {
        self.conn = ConnState::Disconnected;
        self.attempts = 0;
        self.delay = self.config.initial_delay;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }

    // -- connect suppression --------------------------------------------------

    #[test]
    fn begin_connect_from_disconnected() {
        let mut link = LinkState::new(quick_config());
        assert!(link.begin_connect());
        assert_eq!(link.state(), ConnState::Connecting);
    }

    #[test]
    fn concurrent_connect_is_suppressed() {
        let mut link = LinkState::new(quick_config());
        assert!(link.begin_connect());
        assert!(!link.begin_connect());

        link.connected();
        assert!(!link.begin_connect());
        assert_eq!(link.state(), ConnState::Connected);
    }

    // -- normal close ---------------------------------------------------------

    #[test]
    fn normal_close_schedules_no_reconnect() {
        let mut link = LinkState::new(quick_config());
        link.begin_connect();
        link.connected();

        assert_eq!(link.connection_lost(true), LossAction::Stop);
        assert_eq!(link.state(), ConnState::Disconnected);
        assert_eq!(link.attempts(), 0);
    }

    // -- backoff --------------------------------------------------------------

    #[test]
    fn nth_attempt_waits_min_of_doubling_and_ceiling() {
        let mut link = LinkState::new(quick_config());
        let expected_secs = [1, 2, 4, 8, 16];

        for (n, &secs) in expected_secs.iter().enumerate() {
            link.begin_connect();
            let action = link.connection_lost(false);
            assert_eq!(
                action,
                LossAction::ReconnectAfter(Duration::from_secs(secs)),
                "attempt {}",
                n + 1
            );
            assert_eq!(link.state(), ConnState::Reconnecting);
        }
    }

    #[test]
    fn delay_clamps_at_the_ceiling() {
        let config = ReconnectConfig {
            max_attempts: 20,
            ..quick_config()
        };
        let mut link = LinkState::new(config);

        let mut last = Duration::ZERO;
        for _ in 0..10 {
            link.begin_connect();
            if let LossAction::ReconnectAfter(d) = link.connection_lost(false) {
                last = d;
            } else {
                panic!("expected a scheduled reconnect");
            }
        }
        assert_eq!(last, Duration::from_secs(30));
    }

    #[test]
    fn exceeding_the_ceiling_gives_up() {
        let mut link = LinkState::new(quick_config());

        for _ in 0..5 {
            link.begin_connect();
            assert!(matches!(
                link.connection_lost(false),
                LossAction::ReconnectAfter(_)
            ));
        }

        link.begin_connect();
        assert_eq!(link.connection_lost(false), LossAction::GiveUp);
        assert_eq!(link.state(), ConnState::Failed);

        // Once failed, a further connect must be explicitly requested via
        // reset(); begin_connect alone is still allowed to transition out,
        // but the budget stays exhausted until reset.
        assert_eq!(link.attempts(), 6);
    }

    // -- reset on success -----------------------------------------------------

    #[test]
    fn successful_connect_resets_budget_and_delay() {
        let mut link = LinkState::new(quick_config());

        link.begin_connect();
        link.connection_lost(false);
        link.begin_connect();
        link.connection_lost(false);

        link.begin_connect();
        link.connected();
        assert_eq!(link.attempts(), 0);

        // The next loss starts over from the floor delay.
        assert_eq!(
            link.connection_lost(false),
            LossAction::ReconnectAfter(Duration::from_secs(1))
        );
    }

    #[test]
    fn manual_reset_clears_a_failed_link() {
        let mut link = LinkState::new(quick_config());
        for _ in 0..6 {
            link.begin_connect();
            link.connection_lost(false);
        }
        assert_eq!(link.state(), ConnState::Failed);

        link.reset();
        assert_eq!(link.state(), ConnState::Disconnected);
        assert_eq!(link.attempts(), 0);
        assert!(link.begin_connect());
        assert_eq!(
            link.connection_lost(false),
            LossAction::ReconnectAfter(Duration::from_secs(1))
        );
    }
}
