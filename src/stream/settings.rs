//! Per-connection settings fixed by the handshake.

use std::time::Duration;

/// Negotiated values shared by a stream manager and all of its handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Outbound byte budget per handler.
    pub send_buffer_size: usize,
    /// Inbound byte budget per handler.
    pub read_buffer_size: usize,
    pub frame_max_size: usize,
    pub headers_max_size: usize,
    /// Idle timeout in seconds, applied to handlers and the connection.
    pub stream_timeout: u64,
    /// Maximum concurrent handlers; 0 means unlimited.
    pub handler_max_count: usize,
}

impl StreamSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout)
    }

    pub fn is_handler_limit_reached(&self, count: usize) -> bool {
        self.handler_max_count > 0 && count >= self.handler_max_count
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            send_buffer_size: 102_400_000,
            read_buffer_size: 102_400_000,
            frame_max_size: 1_024_000,
            headers_max_size: 1_024_000,
            stream_timeout: 5,
            handler_max_count: 0,
        }
    }
}
