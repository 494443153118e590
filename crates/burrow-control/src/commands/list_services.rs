use burrow_proto::{ListServicesRequest, Parameters, ReplyStatus, ServiceStatus};
use tracing::debug;

use super::{decode, failed_status, reply, Command};
use crate::dispatcher::DispatchError;
use crate::lifecycle::ServiceLifecycleManager;
use crate::registry::HandlerReply;

impl Command for ListServicesRequest {
    const COMMAND_ID: u32 = ListServicesRequest::COMMAND_ID;
    const REPLY_ID: u32 = ListServicesRequest::REPLY_ID;

    fn on_receive(
        self,
        services: &mut ServiceLifecycleManager,
    ) -> Result<HandlerReply, DispatchError> {
        let running: Parameters = services
            .list()
            .into_iter()
            .map(|status| (status.instance_id.to_string(), status.service_type.to_string()))
            .collect();
        debug!(count = running.len(), "List services request");

        reply(
            ReplyStatus::Success,
            &ServiceStatus::new(0, 0, ReplyStatus::Success.code(), running),
        )
    }

    fn on_reply(self, status: i32, ack: &[u8]) -> Result<ServiceStatus, DispatchError> {
        if ack.is_empty() {
            return Ok(failed_status(0, 0, status));
        }
        decode(Self::COMMAND_ID, ack)
    }
}
