use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the session bridge.
///
/// Every field has a serde default so a partial `[bridge]` table is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Idle time after which a live session is expired by the sweep.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// How long terminal sessions are kept before the sweep removes them.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Period of the background sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Bound of the outbound (bridge to client) queue.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    /// Bound of the inbound (client to bridge) queue.
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
    /// Complete the session after the first accepted `user_feedback`.
    #[serde(default = "default_single_shot")]
    pub single_shot: bool,
    /// How long a session survives after its waiting caller gave up.
    #[serde(default = "default_abandon_grace_secs")]
    pub abandon_grace_secs: u64,
    /// Wait used when a tool call does not name a timeout.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    3600
}
fn default_retention_secs() -> u64 {
    86_400
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_outbound_capacity() -> usize {
    64
}
fn default_inbound_capacity() -> usize {
    16
}
fn default_single_shot() -> bool {
    true
}
fn default_abandon_grace_secs() -> u64 {
    30
}
fn default_timeout_secs() -> u64 {
    300
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            outbound_capacity: default_outbound_capacity(),
            inbound_capacity: default_inbound_capacity(),
            single_shot: default_single_shot(),
            abandon_grace_secs: default_abandon_grace_secs(),
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

impl BridgeConfig {
    /// Idle TTL as a [`Duration`].
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Terminal retention as a [`Duration`].
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Sweep period as a [`Duration`], never shorter than one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Abandonment grace as a [`Duration`].
    pub fn abandon_grace(&self) -> Duration {
        Duration::from_secs(self.abandon_grace_secs)
    }

    /// Default wait as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}
