use burrow_proto::{ReplyStatus, ServiceStatus, StartServiceRequest};
use tracing::debug;

use super::{decode, failed_status, reply, Command};
use crate::dispatcher::DispatchError;
use crate::lifecycle::ServiceLifecycleManager;
use crate::registry::HandlerReply;

/// Parameter key under which a start failure reason is reported
pub const ERROR_PARAMETER: &str = "error";

impl Command for StartServiceRequest {
    const COMMAND_ID: u32 = StartServiceRequest::COMMAND_ID;
    const REPLY_ID: u32 = StartServiceRequest::REPLY_ID;

    fn on_receive(
        self,
        services: &mut ServiceLifecycleManager,
    ) -> Result<HandlerReply, DispatchError> {
        let StartServiceRequest {
            service_type,
            instance_id,
            parameters,
        } = self;
        debug!(service_type, ?instance_id, "Start service request");

        let started = match instance_id {
            Some(id) => services.start_with_id(id, service_type, parameters.clone()),
            None => services.start(service_type, parameters.clone()),
        };

        match started {
            Ok(id) => {
                let status = services.status(id).unwrap_or_else(|| {
                    ServiceStatus::new(id, service_type, ReplyStatus::Success.code(), parameters)
                });
                reply(ReplyStatus::Success, &status)
            }
            Err(e) => {
                let mut parameters = parameters;
                parameters.insert(ERROR_PARAMETER.to_string(), e.to_string());
                let status = ServiceStatus::new(
                    instance_id.unwrap_or(0),
                    service_type,
                    e.status().code(),
                    parameters,
                );
                reply(e.status(), &status)
            }
        }
    }

    fn on_reply(self, status: i32, ack: &[u8]) -> Result<ServiceStatus, DispatchError> {
        if ack.is_empty() {
            return Ok(failed_status(
                self.instance_id.unwrap_or(0),
                self.service_type,
                status,
            ));
        }
        decode(Self::COMMAND_ID, ack)
    }
}
