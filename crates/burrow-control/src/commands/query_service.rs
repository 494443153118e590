use burrow_proto::{QueryServiceRequest, ReplyStatus, ServiceStatus};

use super::{decode, failed_status, reply, Command};
use crate::dispatcher::DispatchError;
use crate::lifecycle::ServiceLifecycleManager;
use crate::registry::HandlerReply;

impl Command for QueryServiceRequest {
    const COMMAND_ID: u32 = QueryServiceRequest::COMMAND_ID;
    const REPLY_ID: u32 = QueryServiceRequest::REPLY_ID;

    fn on_receive(
        self,
        services: &mut ServiceLifecycleManager,
    ) -> Result<HandlerReply, DispatchError> {
        match services.status(self.instance_id) {
            Some(status) => reply(ReplyStatus::Success, &status),
            None => reply(
                ReplyStatus::InstanceNotFound,
                &ServiceStatus::bare(self.instance_id, ReplyStatus::InstanceNotFound),
            ),
        }
    }

    fn on_reply(self, status: i32, ack: &[u8]) -> Result<ServiceStatus, DispatchError> {
        if ack.is_empty() {
            return Ok(failed_status(self.instance_id, 0, status));
        }
        decode(Self::COMMAND_ID, ack)
    }
}
