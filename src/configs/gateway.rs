use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::constants::{
    DEFAULT_FRAME_QUEUE_CAPACITY, DEFAULT_READ_TIMEOUT_SECS, DISCOVERY_ATTEMPTS,
    DISCOVERY_BACKOFF_MS, HANDSHAKE_TIMEOUT_SECS, IP_DISCOVERY_TIMEOUT_SECS,
    VOICE_GATEWAY_VERSION,
};

/// Tunables for the signaling channel, UDP discovery and the frame queue.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GatewayConfig {
    #[serde(default = "default_version")]
    pub version: u8,
    /// Read deadline used until Hello advertises a heartbeat interval.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// How long after identify the secret key may take to arrive.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_discovery_attempts")]
    pub discovery_attempts: u32,
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
    #[serde(default = "default_discovery_backoff_ms")]
    pub discovery_backoff_ms: u64,
    #[serde(default = "default_frame_queue_capacity")]
    pub frame_queue_capacity: usize,
}

impl GatewayConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn discovery_backoff(&self) -> Duration {
        Duration::from_millis(self.discovery_backoff_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            read_timeout_secs: default_read_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            discovery_attempts: default_discovery_attempts(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            discovery_backoff_ms: default_discovery_backoff_ms(),
            frame_queue_capacity: default_frame_queue_capacity(),
        }
    }
}

fn default_version() -> u8 {
    VOICE_GATEWAY_VERSION
}

fn default_read_timeout_secs() -> u64 {
    DEFAULT_READ_TIMEOUT_SECS
}

fn default_handshake_timeout_secs() -> u64 {
    HANDSHAKE_TIMEOUT_SECS
}

fn default_discovery_attempts() -> u32 {
    DISCOVERY_ATTEMPTS
}

fn default_discovery_timeout_ms() -> u64 {
    IP_DISCOVERY_TIMEOUT_SECS * 1_000
}

fn default_discovery_backoff_ms() -> u64 {
    DISCOVERY_BACKOFF_MS
}

fn default_frame_queue_capacity() -> usize {
    DEFAULT_FRAME_QUEUE_CAPACITY
}
