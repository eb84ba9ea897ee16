use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where the client's link to the bridge stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No transport and no attempt in flight.
    Disconnected,
    /// An attempt is in flight.
    Connecting,
    /// A transport is live.
    Connected,
    /// Too many failed attempts; only an explicit open retries.
    GivenUp,
}

/// Events that ask for a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Explicit open request. Also the only way out of `GivenUp`.
    Open,
    /// The host became visible again.
    Foreground,
    /// The network came back.
    NetworkRestored,
}

/// Backoff settings for reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Retries scheduled before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    5
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// `min(base * 2^attempt, max)`.
pub fn compute_backoff(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let delay = policy
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(policy.max_delay_ms))
}

/// One scheduled retry, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// Zero-based retry index.
    pub attempt: u32,
    /// Delay that was scheduled.
    pub delay: Duration,
    /// When it was scheduled.
    pub scheduled_at: Instant,
}

/// What the driver should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Dial now.
    Connect,
    /// Dial again after `delay`.
    Retry {
        /// Zero-based retry index.
        attempt: u32,
        /// How long to wait.
        delay: Duration,
    },
    /// Attempts exhausted.
    GiveUp,
    /// Nothing to do.
    Idle,
}

/// Reconnect state machine for one session.
///
/// It performs no I/O: the driver feeds it triggers and transport outcomes
/// and carries out the returned [`Action`].
#[derive(Debug)]
pub struct ReconnectController {
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
    session_ended: bool,
    history: Vec<AttemptRecord>,
}

impl ReconnectController {
    /// Starts `Disconnected` with no attempts.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
            session_ended: false,
            history: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Retries scheduled since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the bridge said the session is over.
    pub fn session_ended(&self) -> bool {
        self.session_ended
    }

    /// Every retry scheduled so far.
    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    /// The policy in force.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Applies a trigger.
    ///
    /// `Open` dials from `Disconnected` or `GivenUp` and resets the attempt
    /// count. `Foreground` and `NetworkRestored` dial only from
    /// `Disconnected`. Nothing dials once the session has ended.
    pub fn trigger(&mut self, trigger: Trigger) -> Action {
        if self.session_ended {
            debug!(?trigger, "Session ended, trigger ignored");
            return Action::Idle;
        }
        match (trigger, self.state) {
            (_, ConnectionState::Connected | ConnectionState::Connecting) => {
                debug!(?trigger, state = ?self.state, "Trigger suppressed");
                Action::Idle
            }
            (Trigger::Open, ConnectionState::Disconnected | ConnectionState::GivenUp) => {
                self.attempts = 0;
                self.state = ConnectionState::Connecting;
                Action::Connect
            }
            (_, ConnectionState::Disconnected) => {
                self.state = ConnectionState::Connecting;
                Action::Connect
            }
            (_, ConnectionState::GivenUp) => {
                debug!(?trigger, "Given up, waiting for an explicit open");
                Action::Idle
            }
        }
    }

    /// The transport is live.
    pub fn on_connected(&mut self) {
        if self.attempts > 0 {
            info!(after_attempts = self.attempts, "Reconnected");
        }
        self.state = ConnectionState::Connected;
        self.attempts = 0;
    }

    /// The dial failed.
    pub fn on_connect_failed(&mut self) -> Action {
        self.state = ConnectionState::Disconnected;
        self.schedule_retry()
    }

    /// The live transport closed. `session_ended` marks a close after
    /// `session_complete` or a refusal of a terminal session.
    pub fn on_closed(&mut self, session_ended: bool) -> Action {
        self.state = ConnectionState::Disconnected;
        if session_ended {
            self.session_ended = true;
            info!("Session ended, not reconnecting");
            return Action::Idle;
        }
        self.schedule_retry()
    }

    /// A retry timer fired.
    pub fn on_retry_due(&mut self) -> Action {
        if self.session_ended || self.state != ConnectionState::Disconnected {
            return Action::Idle;
        }
        self.state = ConnectionState::Connecting;
        Action::Connect
    }

    fn schedule_retry(&mut self) -> Action {
        if self.attempts >= self.policy.max_attempts {
            warn!(attempts = self.attempts, "Reconnect attempts exhausted");
            self.state = ConnectionState::GivenUp;
            return Action::GiveUp;
        }
        let attempt = self.attempts;
        let delay = compute_backoff(&self.policy, attempt);
        self.attempts += 1;
        self.history.push(AttemptRecord {
            attempt,
            delay,
            scheduled_at: Instant::now(),
        });
        info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        Action::Retry { attempt, delay }
    }
}
