//! Routes incoming envelopes to the registered command handlers

use burrow_proto::{CodecError, ReplyStatus, ServiceStatus};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::lifecycle::ServiceLifecycleManager;
use crate::registry::CommandRegistry;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown command {0}")]
    UnknownCommand(u32),

    #[error("Malformed payload for command {command_id}: {reason}")]
    MalformedPayload { command_id: u32, reason: String },

    #[error("Command {0} has no reply binding")]
    MissingReplyBinding(u32),

    #[error("Reply {command_id} does not answer request {serial}")]
    UnexpectedReply { serial: u32, command_id: u32 },

    #[error("Cannot encode acknowledgment: {0}")]
    Encode(#[from] CodecError),
}

impl DispatchError {
    /// Status code reported to the peer when a request cannot be served
    pub fn status(&self) -> ReplyStatus {
        match self {
            DispatchError::UnknownCommand(_) | DispatchError::MissingReplyBinding(_) => {
                ReplyStatus::UnknownCommand
            }
            DispatchError::MalformedPayload { .. }
            | DispatchError::UnexpectedReply { .. }
            | DispatchError::Encode(_) => ReplyStatus::MalformedPayload,
        }
    }
}

/// Acknowledgment to write back to the requesting peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingReply {
    /// Bound reply command id of the request that was served
    pub command_id: u32,
    pub status: ReplyStatus,
    pub payload: Vec<u8>,
}

/// Looks up handlers in the shared registry and runs them
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    registry: Arc<CommandRegistry>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    /// Serve a request sent by the peer
    ///
    /// Nothing runs unless the command has both a receive handler and a reply
    /// binding, so an unserviceable request never has side effects.
    pub fn dispatch_request(
        &self,
        command_id: u32,
        payload: &[u8],
        services: &mut ServiceLifecycleManager,
    ) -> Result<OutgoingReply, DispatchError> {
        let Some(handler) = self.registry.lookup_receive(command_id) else {
            warn!(command_id, "Received unknown command");
            return Err(DispatchError::UnknownCommand(command_id));
        };
        let Some(reply_id) = self.registry.lookup_reply_binding(command_id) else {
            warn!(command_id, "Command has no reply binding");
            return Err(DispatchError::MissingReplyBinding(command_id));
        };

        let reply = handler(payload, services)?;
        debug!(
            command_id,
            reply_id,
            status = %reply.status,
            "Command served"
        );

        Ok(OutgoingReply {
            command_id: reply_id,
            status: reply.status,
            payload: reply.payload,
        })
    }

    /// Turn the peer's reply to one of our requests into a `ServiceStatus`
    ///
    /// `command_id` is the id of the original request, not the reply id.
    pub fn dispatch_reply(
        &self,
        command_id: u32,
        original_request: &[u8],
        status: i32,
        ack: &[u8],
    ) -> Result<ServiceStatus, DispatchError> {
        let Some(handler) = self.registry.lookup_reply(command_id) else {
            warn!(command_id, "Reply for a command without reply handler");
            return Err(DispatchError::UnknownCommand(command_id));
        };
        handler(original_request, status, ack)
    }

    /// Command id a reply to `command_id` is expected to carry
    pub fn expected_reply_id(&self, command_id: u32) -> Option<u32> {
        self.registry.lookup_reply_binding(command_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Microservice, ServiceFactory};
    use burrow_proto::{
        ListServicesRequest, Parameters, PayloadCodec, QueryServiceRequest, StartServiceRequest,
        StopAck, StopServiceRequest,
    };

    struct Idle(bool);

    impl Microservice for Idle {
        fn start(&mut self) -> Result<(), String> {
            self.0 = true;
            Ok(())
        }
        fn stop(&mut self) {
            self.0 = false;
        }
        fn is_running(&self) -> bool {
            self.0
        }
    }

    const IDLE: u32 = 9;

    fn setup() -> (CommandDispatcher, ServiceLifecycleManager) {
        let mut factory = ServiceFactory::new();
        factory
            .register(IDLE, |_| Ok(Box::new(Idle(false)) as Box<dyn Microservice>))
            .unwrap();
        let registry = Arc::new(CommandRegistry::admin().unwrap());
        (
            CommandDispatcher::new(registry),
            ServiceLifecycleManager::new(Arc::new(factory)),
        )
    }

    fn stop_request(instance_id: u32) -> Vec<u8> {
        PayloadCodec::encode(&StopServiceRequest { instance_id }).unwrap()
    }

    #[test]
    fn test_stop_running_instance() {
        let (dispatcher, mut services) = setup();
        services.start_with_id(7, IDLE, Parameters::new()).unwrap();

        let request = stop_request(7);
        let reply = dispatcher
            .dispatch_request(StopServiceRequest::COMMAND_ID, &request, &mut services)
            .unwrap();

        assert_eq!(reply.command_id, ServiceStatus::COMMAND_ID);
        assert_eq!(reply.status, ReplyStatus::InProgress);
        let ack: StopAck = PayloadCodec::decode(&reply.payload).unwrap();
        assert_eq!(ack.instance_id, 7);
        assert!(!services.contains(7));

        let status = dispatcher
            .dispatch_reply(
                StopServiceRequest::COMMAND_ID,
                &request,
                reply.status.code(),
                &reply.payload,
            )
            .unwrap();
        assert_eq!(
            status,
            ServiceStatus::new(7, 0, ReplyStatus::Success.code(), Parameters::new())
        );
    }

    #[test]
    fn test_stop_unknown_instance_reports_not_found() {
        let (dispatcher, mut services) = setup();
        let request = stop_request(99);

        for _ in 0..2 {
            let reply = dispatcher
                .dispatch_request(StopServiceRequest::COMMAND_ID, &request, &mut services)
                .unwrap();
            let status = dispatcher
                .dispatch_reply(
                    StopServiceRequest::COMMAND_ID,
                    &request,
                    reply.status.code(),
                    &reply.payload,
                )
                .unwrap();
            assert_eq!(status.instance_id, 99);
            assert_eq!(status.status_code, ReplyStatus::InstanceNotFound.code());
        }
    }

    #[test]
    fn test_unknown_command_runs_nothing() {
        let (dispatcher, mut services) = setup();
        services.start_with_id(1, IDLE, Parameters::new()).unwrap();

        let result = dispatcher.dispatch_request(4242, &stop_request(1), &mut services);
        assert!(matches!(result, Err(DispatchError::UnknownCommand(4242))));
        assert_eq!(result.unwrap_err().status(), ReplyStatus::UnknownCommand);
        assert!(services.contains(1));
    }

    #[test]
    fn test_malformed_payload_is_not_applied() {
        let (dispatcher, mut services) = setup();
        services.start_with_id(1, IDLE, Parameters::new()).unwrap();

        // Two bytes cannot hold a u32 instance id
        let result =
            dispatcher.dispatch_request(StopServiceRequest::COMMAND_ID, &[1, 0], &mut services);
        assert!(matches!(
            result,
            Err(DispatchError::MalformedPayload { command_id: 3, .. })
        ));
        assert!(services.contains(1));
    }

    #[test]
    fn test_receive_without_binding_is_refused() {
        let mut registry = CommandRegistry::new();
        registry
            .register_receive(20, crate::commands::receive_handler::<StopServiceRequest>)
            .unwrap();
        let dispatcher = CommandDispatcher::new(Arc::new(registry));
        let (_, mut services) = setup();
        services.start_with_id(1, IDLE, Parameters::new()).unwrap();

        let result = dispatcher.dispatch_request(20, &stop_request(1), &mut services);
        assert!(matches!(result, Err(DispatchError::MissingReplyBinding(20))));
        assert!(services.contains(1));
    }

    #[test]
    fn test_start_and_query() {
        let (dispatcher, mut services) = setup();
        let mut parameters = Parameters::new();
        parameters.insert("name".to_string(), "idle".to_string());

        let request = PayloadCodec::encode(&StartServiceRequest {
            service_type: IDLE,
            instance_id: None,
            parameters: parameters.clone(),
        })
        .unwrap();
        let reply = dispatcher
            .dispatch_request(StartServiceRequest::COMMAND_ID, &request, &mut services)
            .unwrap();
        assert_eq!(reply.status, ReplyStatus::Success);

        let started = dispatcher
            .dispatch_reply(
                StartServiceRequest::COMMAND_ID,
                &request,
                reply.status.code(),
                &reply.payload,
            )
            .unwrap();
        assert_eq!(started.instance_id, 1);
        assert_eq!(started.service_type, IDLE);
        assert_eq!(started.parameters, parameters);

        let query = PayloadCodec::encode(&QueryServiceRequest { instance_id: 1 }).unwrap();
        let reply = dispatcher
            .dispatch_request(QueryServiceRequest::COMMAND_ID, &query, &mut services)
            .unwrap();
        let status: ServiceStatus = PayloadCodec::decode(&reply.payload).unwrap();
        assert!(status.is_success());
        assert_eq!(status.parameters, parameters);
    }

    #[test]
    fn test_start_unknown_type_reports_status() {
        let (dispatcher, mut services) = setup();
        let request = PayloadCodec::encode(&StartServiceRequest {
            service_type: 77,
            instance_id: Some(4),
            parameters: Parameters::new(),
        })
        .unwrap();

        let reply = dispatcher
            .dispatch_request(StartServiceRequest::COMMAND_ID, &request, &mut services)
            .unwrap();
        assert_eq!(reply.status, ReplyStatus::UnknownServiceType);

        let status: ServiceStatus = PayloadCodec::decode(&reply.payload).unwrap();
        assert_eq!(status.instance_id, 4);
        assert_eq!(status.status(), Some(ReplyStatus::UnknownServiceType));
        assert!(status.parameters.contains_key("error"));
        assert!(services.is_empty());
    }

    #[test]
    fn test_error_reply_without_ack_uses_original_request() {
        let (dispatcher, _) = setup();
        let status = dispatcher
            .dispatch_reply(
                StopServiceRequest::COMMAND_ID,
                &stop_request(12),
                ReplyStatus::UnknownCommand.code(),
                &[],
            )
            .unwrap();

        assert_eq!(status.instance_id, 12);
        assert_eq!(status.status(), Some(ReplyStatus::UnknownCommand));
    }

    #[test]
    fn test_list_running_instances() {
        let (dispatcher, mut services) = setup();
        services.start_with_id(3, IDLE, Parameters::new()).unwrap();
        services.start_with_id(1, IDLE, Parameters::new()).unwrap();

        let request = PayloadCodec::encode(&ListServicesRequest).unwrap();
        let reply = dispatcher
            .dispatch_request(ListServicesRequest::COMMAND_ID, &request, &mut services)
            .unwrap();
        assert_eq!(reply.command_id, ServiceStatus::COMMAND_ID);
        assert_eq!(reply.status, ReplyStatus::Success);

        let status = dispatcher
            .dispatch_reply(
                ListServicesRequest::COMMAND_ID,
                &request,
                reply.status.code(),
                &reply.payload,
            )
            .unwrap();
        assert!(status.is_success());
        let ids: Vec<&str> = status.parameters.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(status.parameters["3"], IDLE.to_string());
    }

    #[test]
    fn test_reply_for_unregistered_command() {
        let (dispatcher, _) = setup();
        let result = dispatcher.dispatch_reply(4242, &[], 0, &[]);
        assert!(matches!(result, Err(DispatchError::UnknownCommand(4242))));
    }
}
