//! Control plane for burrow sessions
//!
//! A session starts with the version handshake and then carries admin
//! commands in both directions. Commands start, stop and query service
//! instances owned by the session that received them.
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod handshake;
pub mod lifecycle;
pub mod pending_requests;
pub mod registry;
pub mod service;
pub mod session;

pub use commands::Command;
pub use config::{ConfigError, ControlConfig};
pub use dispatcher::{CommandDispatcher, DispatchError, OutgoingReply};
pub use handshake::{HandshakeEngine, HandshakeError};
pub use lifecycle::{ServiceLifecycleManager, StartError, StopError};
pub use pending_requests::{PendingRequest, PendingRequests};
pub use registry::{
    CommandRegistry, HandlerReply, HandlerRole, ReceiveHandler, RegistryError, ReplyHandler,
};
pub use service::{Microservice, ServiceConstructor, ServiceFactory, TaskService};
pub use session::{Session, SessionError, SessionHandle};
