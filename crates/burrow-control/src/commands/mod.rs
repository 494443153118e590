//! Admin commands
//!
//! Every command type describes its own wire ids and its two handlers; the
//! registry stores monomorphized entry points produced from this trait.

use burrow_proto::{Parameters, PayloadCodec, ServiceStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::dispatcher::DispatchError;
use crate::lifecycle::ServiceLifecycleManager;
use crate::registry::{CommandRegistry, HandlerReply, RegistryError};

mod list_services;
mod query_service;
mod start_service;
mod stop_service;

/// A request type that can be sent to, and served by, a peer
pub trait Command: Serialize + DeserializeOwned + Sized {
    const COMMAND_ID: u32;

    /// Command id the peer tags its acknowledgment with
    const REPLY_ID: u32;

    /// Perform the requested effect on the serving side
    fn on_receive(self, services: &mut ServiceLifecycleManager)
        -> Result<HandlerReply, DispatchError>;

    /// Build the caller-visible status from the peer's reply
    ///
    /// `self` is the original request as it was sent.
    fn on_reply(self, status: i32, ack: &[u8]) -> Result<ServiceStatus, DispatchError>;
}

/// Register start, stop, query and list
pub fn register_admin(registry: &mut CommandRegistry) -> Result<(), RegistryError> {
    registry.register::<burrow_proto::StartServiceRequest>()?;
    registry.register::<burrow_proto::StopServiceRequest>()?;
    registry.register::<burrow_proto::QueryServiceRequest>()?;
    registry.register::<burrow_proto::ListServicesRequest>()?;
    Ok(())
}

/// Receive entry point stored in the registry for `C`
///
/// The payload is fully decoded before the command runs; a payload that does
/// not decode never reaches `on_receive`.
pub(crate) fn receive_handler<C: Command>(
    payload: &[u8],
    services: &mut ServiceLifecycleManager,
) -> Result<HandlerReply, DispatchError> {
    let request: C = decode(C::COMMAND_ID, payload)?;
    request.on_receive(services)
}

/// Reply entry point stored in the registry for `C`
pub(crate) fn reply_handler<C: Command>(
    request: &[u8],
    status: i32,
    ack: &[u8],
) -> Result<ServiceStatus, DispatchError> {
    let request: C = decode(C::COMMAND_ID, request)?;
    request.on_reply(status, ack)
}

pub(crate) fn decode<T: DeserializeOwned>(command_id: u32, bytes: &[u8]) -> Result<T, DispatchError> {
    PayloadCodec::decode(bytes).map_err(|e| {
        warn!(command_id, "Cannot extract command payload: {}", e);
        DispatchError::MalformedPayload {
            command_id,
            reason: e.to_string(),
        }
    })
}

pub(crate) fn reply<T: Serialize>(
    status: burrow_proto::ReplyStatus,
    ack: &T,
) -> Result<HandlerReply, DispatchError> {
    Ok(HandlerReply {
        status,
        payload: PayloadCodec::encode(ack)?,
    })
}

/// Status for a reply that carries no ack, i.e. the peer could not serve the
/// request at all (unknown command, malformed payload)
pub(crate) fn failed_status(instance_id: u32, service_type: u32, status: i32) -> ServiceStatus {
    ServiceStatus::new(instance_id, service_type, status, Parameters::new())
}
