//! Events that drive the connection state machine

use crate::config::Endpoint;

/// Transport callbacks carry the `attempt` they belong to so that late
/// callbacks from a superseded socket are recognised and dropped.
#[derive(Debug, Clone)]
pub enum ConnEvent {
    // Caller events
    Connect {
        endpoint: Endpoint,
    },
    Disconnect,
    ClearError,
    ClearResponse,

    // Transport events
    TransportOpened {
        attempt: u64,
    },
    FrameReceived {
        attempt: u64,
        text: String,
    },
    TransportFailed {
        attempt: u64,
        reason: String,
    },
    /// Peer sent a Close frame
    PeerClosing {
        attempt: u64,
        code: Option<u16>,
        reason: String,
    },
    TransportClosed {
        attempt: u64,
        code: Option<u16>,
        reason: String,
    },

    // Timer events
    ReconnectTimerFired {
        timer: u64,
    },
}

impl ConnEvent {
    /// Socket attempt this event belongs to, if it came from a transport
    pub fn attempt(&self) -> Option<u64> {
        match self {
            Self::TransportOpened { attempt }
            | Self::FrameReceived { attempt, .. }
            | Self::TransportFailed { attempt, .. }
            | Self::PeerClosing { attempt, .. }
            | Self::TransportClosed { attempt, .. } => Some(*attempt),
            _ => None,
        }
    }
}
