//! Admin command payloads

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::status::ReplyStatus;

/// String parameters handed to a service (keys are unique, order is irrelevant)
pub type Parameters = BTreeMap<String, String>;

/// Generic reply payload for every lifecycle command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ServiceStatus {
    pub instance_id: u32,
    pub service_type: u32,
    pub status_code: i32,
    pub parameters: Parameters,
}

impl ServiceStatus {
    /// Command id under which status records travel as replies
    pub const COMMAND_ID: u32 = 2;

    pub fn new(instance_id: u32, service_type: u32, status_code: i32, parameters: Parameters) -> Self {
        Self {
            instance_id,
            service_type,
            status_code,
            parameters,
        }
    }

    /// Status record without a service type or parameters
    pub fn bare(instance_id: u32, status: ReplyStatus) -> Self {
        Self::new(instance_id, 0, status.code(), Parameters::new())
    }

    /// Decoded status code, `None` for codes this build does not know
    pub fn status(&self) -> Option<ReplyStatus> {
        ReplyStatus::from_code(self.status_code)
    }

    pub fn is_success(&self) -> bool {
        self.status_code == ReplyStatus::Success.code()
    }
}

/// Ask the peer to start a service instance
///
/// If `instance_id` is set the peer uses that id, otherwise it allocates one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartServiceRequest {
    pub service_type: u32,
    pub instance_id: Option<u32>,
    pub parameters: Parameters,
}

impl StartServiceRequest {
    pub const COMMAND_ID: u32 = 1;
    pub const REPLY_ID: u32 = ServiceStatus::COMMAND_ID;
}

/// Ask the peer to stop a running service instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StopServiceRequest {
    pub instance_id: u32,
}

impl StopServiceRequest {
    pub const COMMAND_ID: u32 = 3;
    pub const REPLY_ID: u32 = ServiceStatus::COMMAND_ID;
}

/// Acknowledgment of a stop: the echoed instance id plus the stop outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StopAck {
    pub instance_id: u32,
    pub outcome: i32,
}

/// Ask the peer for the status of one service instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryServiceRequest {
    pub instance_id: u32,
}

impl QueryServiceRequest {
    pub const COMMAND_ID: u32 = 4;
    pub const REPLY_ID: u32 = ServiceStatus::COMMAND_ID;
}

/// Ask the peer which service instances it runs for this session
///
/// The reply is a [`ServiceStatus`] whose parameters map each instance id to
/// its service type, both in decimal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListServicesRequest;

impl ListServicesRequest {
    pub const COMMAND_ID: u32 = 5;
    pub const REPLY_ID: u32 = ServiceStatus::COMMAND_ID;
}
