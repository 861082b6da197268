use std::time::Duration;

/// Default WebSocket port.
pub const DEFAULT_PORT: u16 = 2222;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
/// Frames a connection may have waiting for the transport.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Handed to the transport for every accepted session.
    pub idle_timeout: Duration,
    pub queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// A depth of zero is raised to one so a connection can always queue a frame.
    #[must_use]
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }
}
