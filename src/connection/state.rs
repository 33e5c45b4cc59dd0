//! Connection state types

use crate::codec::LearningResponse;
use crate::config::Endpoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle phase of the single backend socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnPhase {
    #[default]
    Idle,
    Connecting,
    Open,
    /// Peer has started the closing handshake
    Closing,
    /// A failure was observed and a reconnect timer is pending
    Reconnecting,
}

/// Published view of the connection, as observers see it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub connecting: bool,
    pub error: Option<String>,
    pub reconnect_attempts: u32,
}

/// Full machine state, including bookkeeping observers never see
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnState {
    pub phase: ConnPhase,
    pub error: Option<String>,
    pub reconnect_attempts: u32,
    /// Last endpoint passed to `connect`; reconnects reuse it
    pub endpoint: Option<Endpoint>,
    /// Generation of the current socket attempt
    pub attempt: u64,
    /// Generation of the armed reconnect timer, if any
    pub pending_timer: Option<u64>,
    pub timer_seq: u64,
    pub response: Option<LearningResponse>,
    /// Bumped every time a new response is accepted
    pub response_seq: u64,
}

impl ConnState {
    pub fn snapshot(&self) -> ConnectionState {
        ConnectionState {
            connected: self.phase == ConnPhase::Open,
            connecting: self.phase == ConnPhase::Connecting,
            error: self.error.clone(),
            reconnect_attempts: self.reconnect_attempts,
        }
    }

    /// Whether a socket may currently exist
    pub fn has_transport(&self) -> bool {
        matches!(
            self.phase,
            ConnPhase::Connecting | ConnPhase::Open | ConnPhase::Closing
        )
    }
}

/// Reconnection policy
#[derive(Debug, Clone)]
pub struct ConnContext {
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl ConnContext {
    pub fn new(max_reconnect_attempts: u32, reconnect_delay: Duration) -> Self {
        Self {
            max_reconnect_attempts,
            reconnect_delay,
        }
    }
}

impl Default for ConnContext {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5))
    }
}
