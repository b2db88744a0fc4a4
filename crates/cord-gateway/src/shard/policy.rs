//! Reconnection policy

use std::time::Duration;

use crate::protocol::CloseCode;

/// Fixed-delay reconnection
///
/// Attempts that never opened the socket wait `connect_retry`; drops of an
/// established connection wait `reconnect_delay`. Both retry forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub connect_retry: Duration,
    pub reconnect_delay: Duration,
    /// Give up on close codes that cannot succeed on retry
    pub stop_on_fatal_close: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            connect_retry: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            stop_on_fatal_close: true,
        }
    }
}

impl ReconnectPolicy {
    #[must_use]
    pub fn delay(&self, established: bool) -> Duration {
        if established {
            self.reconnect_delay
        } else {
            self.connect_retry
        }
    }

    #[must_use]
    pub fn stops_on(&self, status: u16) -> bool {
        self.stop_on_fatal_close && CloseCode::from_u16(status).is_some_and(CloseCode::is_fatal)
    }
}
