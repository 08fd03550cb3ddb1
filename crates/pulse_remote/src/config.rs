//! Configuration for remote sessions.

/// Configuration for remote sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Name of the peer, used in log output.
    pub peer: String,
    /// Whether `close` sends put batches still collecting instead of
    /// dropping them.
    pub flush_on_close: bool,
}

impl RemoteConfig {
    /// Creates a configuration for `peer`.
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            flush_on_close: true,
        }
    }

    /// Sets whether `close` sends unfinished put batches.
    #[must_use]
    pub fn with_flush_on_close(mut self, flush: bool) -> Self {
        self.flush_on_close = flush;
        self
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::new("loopback")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = RemoteConfig::new("pulse.example.org").with_flush_on_close(false);
        assert_eq!(config.peer, "pulse.example.org");
        assert!(!config.flush_on_close);
        assert!(RemoteConfig::default().flush_on_close);
    }
}
