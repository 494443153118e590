//! Pending requests tracker
//!
//! Tracks commands sent to the peer and routes their replies back to the
//! callers waiting on them. Requests are keyed by envelope serial.

use burrow_proto::ServiceStatus;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::dispatcher::DispatchError;

pub type CommandResult = Result<ServiceStatus, DispatchError>;

/// A command awaiting its reply
#[derive(Debug)]
pub struct PendingRequest {
    /// Command id the request was sent with
    pub command_id: u32,
    /// Encoded request payload, handed to the reply handler
    pub request: Bytes,
    tx: oneshot::Sender<CommandResult>,
}

impl PendingRequest {
    /// Deliver the outcome to the waiting caller
    /// Returns false if the caller gave up waiting
    pub fn complete(self, result: CommandResult) -> bool {
        self.tx.send(result).is_ok()
    }
}

/// Tracks in-flight commands awaiting replies
#[derive(Clone, Default)]
pub struct PendingRequests {
    /// Maps serial -> pending request
    requests: Arc<DashMap<u32, PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending request
    /// Returns a receiver that will receive the outcome
    pub fn register(
        &self,
        serial: u32,
        command_id: u32,
        request: Bytes,
    ) -> oneshot::Receiver<CommandResult> {
        let (tx, rx) = oneshot::channel();
        let pending = PendingRequest {
            command_id,
            request,
            tx,
        };
        if self.requests.insert(serial, pending).is_some() {
            warn!("Serial {} reused while a request was still pending", serial);
        }
        debug!("Registered pending request {} (command {})", serial, command_id);
        rx
    }

    /// Remove the request a reply answers, if any
    pub fn take(&self, serial: u32) -> Option<PendingRequest> {
        let taken = self.requests.remove(&serial).map(|(_, pending)| pending);
        if taken.is_none() {
            warn!("No pending request found for serial {}", serial);
        }
        taken
    }

    /// Cancel a pending request (e.g., on timeout or error)
    pub fn cancel(&self, serial: u32) {
        if self.requests.remove(&serial).is_some() {
            debug!("Cancelled pending request {}", serial);
        }
    }

    /// Drop every pending request; their callers observe a closed channel
    pub fn cancel_all(&self) {
        let count = self.requests.len();
        self.requests.clear();
        if count > 0 {
            debug!("Cancelled {} pending request(s)", count);
        }
    }

    /// Get count of pending requests
    pub fn count(&self) -> usize {
        self.requests.len()
    }
}
