//! Effects produced by connection transitions

use std::time::Duration;

pub const NORMAL_CLOSURE: u16 = 1000;
pub const USER_DISCONNECT_REASON: &str = "User disconnected";

/// Effects to be executed after a connection transition
#[derive(Debug, Clone, PartialEq)]
pub enum ConnEffect {
    /// Open a socket; supersedes any socket still owned by the runtime
    OpenTransport { attempt: u64, url: String },

    /// Close the current socket
    CloseTransport { code: u16, reason: String },

    /// Arm the single reconnect timer
    ScheduleReconnect { timer: u64, delay: Duration },

    CancelReconnect,

    /// Publish the connection snapshot to observers
    PublishState,

    /// Publish the current response (or its absence)
    PublishResponse,
}

impl ConnEffect {
    pub fn user_close() -> Self {
        ConnEffect::CloseTransport {
            code: NORMAL_CLOSURE,
            reason: USER_DISCONNECT_REASON.to_string(),
        }
    }
}
