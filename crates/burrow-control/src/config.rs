//! Control plane configuration

use burrow_proto::{ProtocolVersion, ENVELOPE_HEADER_LEN, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_frame_size {0} is smaller than the envelope header")]
    FrameSizeTooSmall(usize),

    #[error("outbound_queue must be at least 1")]
    EmptyOutboundQueue,
}

/// Settings shared by every session of a process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// Version announced to (and checked against) the peer
    pub version: ProtocolVersion,

    /// Bound on the whole handshake in seconds (0 = no bound)
    pub handshake_timeout_secs: u64,

    /// Bound on waiting for a command reply in seconds (0 = no bound)
    pub request_timeout_secs: u64,

    /// Largest envelope frame accepted or sent
    pub max_frame_size: usize,

    /// Capacity of the per-session write queue
    pub outbound_queue: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            handshake_timeout_secs: 10,
            request_timeout_secs: 30,
            max_frame_size: MAX_FRAME_SIZE,
            outbound_queue: 64,
        }
    }
}

impl ControlConfig {
    pub fn handshake_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.handshake_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_size < ENVELOPE_HEADER_LEN {
            return Err(ConfigError::FrameSizeTooSmall(self.max_frame_size));
        }
        if self.outbound_queue == 0 {
            return Err(ConfigError::EmptyOutboundQueue);
        }
        Ok(())
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
