use burrow_proto::{ReplyStatus, ServiceStatus, StopAck, StopServiceRequest};
use tracing::{debug, warn};

use super::{decode, failed_status, reply, Command};
use crate::dispatcher::DispatchError;
use crate::lifecycle::ServiceLifecycleManager;
use crate::registry::HandlerReply;

impl Command for StopServiceRequest {
    const COMMAND_ID: u32 = StopServiceRequest::COMMAND_ID;
    const REPLY_ID: u32 = StopServiceRequest::REPLY_ID;

    fn on_receive(
        self,
        services: &mut ServiceLifecycleManager,
    ) -> Result<HandlerReply, DispatchError> {
        let outcome = match services.stop(self.instance_id) {
            Ok(()) => ReplyStatus::Success,
            Err(e) => e.status(),
        };
        debug!(
            instance_id = self.instance_id,
            %outcome,
            "Stop service request"
        );

        // The stop already happened; the transaction completes with the reply
        reply(
            ReplyStatus::InProgress,
            &StopAck {
                instance_id: self.instance_id,
                outcome: outcome.code(),
            },
        )
    }

    fn on_reply(self, status: i32, ack: &[u8]) -> Result<ServiceStatus, DispatchError> {
        if ack.is_empty() {
            return Ok(failed_status(self.instance_id, 0, status));
        }

        let ack: StopAck = decode(Self::COMMAND_ID, ack)?;
        if status != ReplyStatus::InProgress.code() {
            debug!(status, "Stop acknowledged with unexpected transport status");
        }
        if ack.instance_id != self.instance_id {
            warn!(
                requested = self.instance_id,
                echoed = ack.instance_id,
                "Stop reply echoes a different instance id"
            );
        }

        Ok(ServiceStatus::new(
            ack.instance_id,
            0,
            ack.outcome,
            Default::default(),
        ))
    }
}
