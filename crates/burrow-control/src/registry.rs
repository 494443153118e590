//! Command registry
//!
//! Maps command ids to the handlers that serve them. The table is built once
//! at startup, then shared read-only (behind an `Arc`) by every session.

use burrow_proto::{ReplyStatus, ServiceStatus};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::commands::{self, Command};
use crate::dispatcher::DispatchError;
use crate::lifecycle::ServiceLifecycleManager;

/// Which table of the registry an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerRole {
    Receive,
    Reply,
    ReplyBinding,
}

impl fmt::Display for HandlerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandlerRole::Receive => "receive handler",
            HandlerRole::Reply => "reply handler",
            HandlerRole::ReplyBinding => "reply binding",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Command {command_id} already has a {role}")]
    DuplicateRegistration { command_id: u32, role: HandlerRole },

    #[error("Service type {0} is already registered")]
    DuplicateServiceType(u32),
}

/// What a receive handler sends back to the requesting peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerReply {
    pub status: ReplyStatus,
    pub payload: Vec<u8>,
}

/// Serves a peer's request: decodes the payload, performs the effect and
/// produces the acknowledgment
pub type ReceiveHandler =
    fn(&[u8], &mut ServiceLifecycleManager) -> Result<HandlerReply, DispatchError>;

/// Turns the reply to one of our requests into the status surfaced to the caller
///
/// Arguments: the serialized original request, the reply status code, the ack payload.
pub type ReplyHandler = fn(&[u8], i32, &[u8]) -> Result<ServiceStatus, DispatchError>;

#[derive(Default)]
pub struct CommandRegistry {
    receive: HashMap<u32, ReceiveHandler>,
    reply: HashMap<u32, ReplyHandler>,
    reply_bindings: HashMap<u32, u32>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the standard admin commands (start, stop, query)
    pub fn admin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        commands::register_admin(&mut registry)?;
        Ok(registry)
    }

    pub fn register_receive(
        &mut self,
        command_id: u32,
        handler: ReceiveHandler,
    ) -> Result<(), RegistryError> {
        if self.receive.contains_key(&command_id) {
            return Err(duplicate(command_id, HandlerRole::Receive));
        }
        self.receive.insert(command_id, handler);
        Ok(())
    }

    pub fn register_reply(
        &mut self,
        command_id: u32,
        handler: ReplyHandler,
    ) -> Result<(), RegistryError> {
        if self.reply.contains_key(&command_id) {
            return Err(duplicate(command_id, HandlerRole::Reply));
        }
        self.reply.insert(command_id, handler);
        Ok(())
    }

    /// Record the command id under which replies to `command_id` travel
    pub fn register_reply_binding(
        &mut self,
        command_id: u32,
        reply_id: u32,
    ) -> Result<(), RegistryError> {
        if self.reply_bindings.contains_key(&command_id) {
            return Err(duplicate(command_id, HandlerRole::ReplyBinding));
        }
        self.reply_bindings.insert(command_id, reply_id);
        Ok(())
    }

    /// Register all three roles of a command type
    ///
    /// Nothing is inserted unless every role is free.
    pub fn register<C: Command>(&mut self) -> Result<(), RegistryError> {
        let id = C::COMMAND_ID;
        if self.receive.contains_key(&id) {
            return Err(duplicate(id, HandlerRole::Receive));
        }
        if self.reply.contains_key(&id) {
            return Err(duplicate(id, HandlerRole::Reply));
        }
        if self.reply_bindings.contains_key(&id) {
            return Err(duplicate(id, HandlerRole::ReplyBinding));
        }

        self.register_receive(id, commands::receive_handler::<C>)?;
        self.register_reply(id, commands::reply_handler::<C>)?;
        self.register_reply_binding(id, C::REPLY_ID)?;
        debug!(command_id = id, reply_id = C::REPLY_ID, "Registered command");
        Ok(())
    }

    pub fn lookup_receive(&self, command_id: u32) -> Option<ReceiveHandler> {
        self.receive.get(&command_id).copied()
    }

    pub fn lookup_reply(&self, command_id: u32) -> Option<ReplyHandler> {
        self.reply.get(&command_id).copied()
    }

    pub fn lookup_reply_binding(&self, command_id: u32) -> Option<u32> {
        self.reply_bindings.get(&command_id).copied()
    }

    /// Ids that have a receive handler, sorted
    pub fn command_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.receive.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.command_ids())
            .field("reply_bindings", &self.reply_bindings)
            .finish()
    }
}

fn duplicate(command_id: u32, role: HandlerRole) -> RegistryError {
    RegistryError::DuplicateRegistration { command_id, role }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_proto::{
        ListServicesRequest, QueryServiceRequest, StartServiceRequest, StopServiceRequest,
    };

    fn ack_a(_: &[u8], _: &mut ServiceLifecycleManager) -> Result<HandlerReply, DispatchError> {
        Ok(HandlerReply {
            status: ReplyStatus::Success,
            payload: b"a".to_vec(),
        })
    }

    fn ack_b(_: &[u8], _: &mut ServiceLifecycleManager) -> Result<HandlerReply, DispatchError> {
        Ok(HandlerReply {
            status: ReplyStatus::Success,
            payload: b"b".to_vec(),
        })
    }

    fn reply_ok(_: &[u8], status: i32, _: &[u8]) -> Result<ServiceStatus, DispatchError> {
        Ok(ServiceStatus::new(0, 0, status, Default::default()))
    }

    #[test]
    fn test_duplicate_receive_keeps_first() {
        let mut registry = CommandRegistry::new();
        registry.register_receive(10, ack_a).unwrap();

        let result = registry.register_receive(10, ack_b);
        assert_eq!(
            result,
            Err(RegistryError::DuplicateRegistration {
                command_id: 10,
                role: HandlerRole::Receive
            })
        );

        let handler = registry.lookup_receive(10).unwrap();
        let mut services = ServiceLifecycleManager::new(Default::default());
        assert_eq!(handler(&[], &mut services).unwrap().payload, b"a");
    }

    #[test]
    fn test_roles_are_independent() {
        let mut registry = CommandRegistry::new();
        registry.register_receive(10, ack_a).unwrap();
        registry.register_reply(10, reply_ok).unwrap();
        registry.register_reply_binding(10, 11).unwrap();

        assert!(registry.register_reply(10, reply_ok).is_err());
        assert!(registry.register_reply_binding(10, 12).is_err());
        assert_eq!(registry.lookup_reply_binding(10), Some(11));
    }

    #[test]
    fn test_lookup_missing() {
        let registry = CommandRegistry::new();
        assert!(registry.lookup_receive(4242).is_none());
        assert!(registry.lookup_reply(4242).is_none());
        assert!(registry.lookup_reply_binding(4242).is_none());
    }

    #[test]
    fn test_admin_commands() {
        let registry = CommandRegistry::admin().unwrap();
        assert_eq!(
            registry.command_ids(),
            vec![
                StartServiceRequest::COMMAND_ID,
                StopServiceRequest::COMMAND_ID,
                QueryServiceRequest::COMMAND_ID,
                ListServicesRequest::COMMAND_ID
            ]
        );
        assert_eq!(
            registry.lookup_reply_binding(StopServiceRequest::COMMAND_ID),
            Some(ServiceStatus::COMMAND_ID)
        );
        // Status records only travel as replies
        assert!(registry.lookup_receive(ServiceStatus::COMMAND_ID).is_none());
    }

    #[test]
    fn test_registering_a_command_twice_is_rejected_atomically() {
        let mut registry = CommandRegistry::admin().unwrap();
        let result = registry.register::<StopServiceRequest>();
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateRegistration { command_id: 3, .. })
        ));

        let mut partial = CommandRegistry::new();
        partial.register_reply(StopServiceRequest::COMMAND_ID, reply_ok).unwrap();
        assert!(partial.register::<StopServiceRequest>().is_err());
        assert!(partial.lookup_receive(StopServiceRequest::COMMAND_ID).is_none());
    }
}
