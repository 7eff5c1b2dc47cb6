use std::time::Duration;

/// Client timing and buffer limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Deadline for a request after its handle is issued.
    pub request_timeout: Duration,
    /// Deadline that replaces `request_timeout` once a Friend acknowledged
    /// the request on behalf of a sleeping low power node.
    pub lpn_timeout: Duration,
    /// How long a command waits for its immediate response.
    pub response_timeout: Duration,
    /// Read timeout of the receive loop; bounds how late `tick` runs.
    pub poll_interval: Duration,
    /// Incomplete multi-part messages idle longer than this are dropped.
    pub fragment_idle_timeout: Duration,
    /// Largest reassembled multi-part payload.
    pub max_fragment_payload: usize,
    /// Payload bytes per outgoing vendor chunk (at most 255).
    pub vendor_chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            lpn_timeout: Duration::from_secs(120),
            response_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            fragment_idle_timeout: Duration::from_secs(10),
            max_fragment_payload: 64 * 1024,
            vendor_chunk_size: 255,
        }
    }
}

impl ClientConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_lpn_timeout(mut self, timeout: Duration) -> Self {
        self.lpn_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Also bounds how long `poll` blocks on an idle link.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
