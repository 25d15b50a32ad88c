//! Configuration for swarm discovery

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main configuration for a [`TrackerRegistry`](crate::TrackerRegistry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Tracker announce URLs (ws:// or wss://)
    pub trackers: Vec<String>,

    /// Application-chosen identifier; peers sharing it join the same swarm
    pub identifier: String,

    /// Connection offers generated per announce (default: 5)
    pub num_want: usize,

    /// Interval between periodic re-announces (default: 5s)
    pub announce_interval: Duration,

    /// Interval between control-channel keepalive pings (default: 60s)
    pub keepalive_interval: Duration,

    /// How long an unestablished offer or answer may stay pending before its
    /// peer connection is discarded (default: 30s)
    pub handshake_timeout: Duration,

    /// Wait between reconnect attempts after a tracker connection drops
    /// (default: 60s)
    pub reconnect_backoff: Duration,

    /// STUN server URLs for the peer-connection engine
    pub stun_servers: Vec<String>,

    /// Capacity of the negotiated-peer accept queue (default: 16)
    pub accept_queue_capacity: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            trackers: Vec::new(),
            identifier: String::new(),
            num_want: 5,
            announce_interval: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(30),
            reconnect_backoff: Duration::from_secs(60),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            accept_queue_capacity: 16,
        }
    }
}

impl SwarmConfig {
    /// Convenience constructor for the common case: an identifier plus
    /// tracker URLs, everything else at its default.
    pub fn new(identifier: impl Into<String>, trackers: Vec<String>) -> Self {
        Self {
            identifier: identifier.into(),
            trackers,
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `trackers` is empty or contains a non-WebSocket URL
    /// - `identifier` is empty
    /// - `num_want` is zero
    /// - `accept_queue_capacity` is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.trackers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one tracker URL is required".to_string(),
            ));
        }

        for url in &self.trackers {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(Error::InvalidConfig(format!(
                    "tracker URL must start with ws:// or wss://, got {url}"
                )));
            }
        }

        if self.identifier.is_empty() {
            return Err(Error::InvalidConfig(
                "swarm identifier must not be empty".to_string(),
            ));
        }

        if self.num_want == 0 {
            return Err(Error::InvalidConfig(
                "num_want must be at least 1".to_string(),
            ));
        }

        if self.accept_queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "accept_queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
