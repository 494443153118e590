//! One control connection after its handshake
//!
//! A session owns the stream, the lifecycle manager of the services started
//! on the peer's behalf, and the table of requests it sent itself. The reader
//! loop serves the peer's requests one at a time in arrival order and routes
//! replies to waiting [`SessionHandle`] callers. One writer task owns the
//! sink and drains two queues: replies to the peer ahead of our own requests.
//! The reply queue is unbounded so the reader never waits on the writer; the
//! request queue is bounded so callers feel backpressure. Within a queue
//! envelopes leave in the order they were queued.

use burrow_proto::{
    CodecError, Envelope, EnvelopeCodec, ListServicesRequest, Parameters, PayloadCodec,
    QueryServiceRequest, ReplyStatus, ServiceStatus, StartServiceRequest, StopServiceRequest,
    ENVELOPE_HEADER_LEN,
};
use burrow_transport::ByteStream;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::commands::Command;
use crate::config::{ConfigError, ControlConfig};
use crate::dispatcher::{CommandDispatcher, DispatchError};
use crate::handshake::{HandshakeEngine, HandshakeError};
use crate::lifecycle::ServiceLifecycleManager;
use crate::pending_requests::PendingRequests;
use crate::registry::CommandRegistry;
use crate::service::ServiceFactory;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Command failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Session closed")]
    Closed,

    #[error("No reply within {0:?}")]
    Timeout(Duration),
}

/// Everything a session shares with its handles
struct Shared {
    pending: PendingRequests,
    next_serial: AtomicU32,
    closed: AtomicBool,
}

/// An established control connection, ready to [`run`](Session::run)
pub struct Session<S> {
    stream: S,
    config: ControlConfig,
    dispatcher: CommandDispatcher,
    services: ServiceLifecycleManager,
    shared: Arc<Shared>,
    tx: mpsc::Sender<Envelope>,
    rx: mpsc::Receiver<Envelope>,
}

impl<S: ByteStream> Session<S> {
    /// Open a session on a connection this side established
    pub async fn initiate(
        mut stream: S,
        config: ControlConfig,
        registry: Arc<CommandRegistry>,
        factory: Arc<ServiceFactory>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let engine = HandshakeEngine::from_config(&config);
        engine.initiate(&mut stream).await?;
        info!(
            "Session established (initiator, version {})",
            engine.local_version()
        );
        Ok(Self::established(stream, config, registry, factory))
    }

    /// Open a session on a connection the peer established
    pub async fn respond(
        mut stream: S,
        config: ControlConfig,
        registry: Arc<CommandRegistry>,
        factory: Arc<ServiceFactory>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let engine = HandshakeEngine::from_config(&config);
        engine.respond(&mut stream).await?;
        info!(
            "Session established (responder, version {})",
            engine.local_version()
        );
        Ok(Self::established(stream, config, registry, factory))
    }

    fn established(
        stream: S,
        config: ControlConfig,
        registry: Arc<CommandRegistry>,
        factory: Arc<ServiceFactory>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.outbound_queue);
        Self {
            stream,
            dispatcher: CommandDispatcher::new(registry),
            services: ServiceLifecycleManager::new(factory),
            shared: Arc::new(Shared {
                pending: PendingRequests::new(),
                next_serial: AtomicU32::new(1),
                closed: AtomicBool::new(false),
            }),
            tx,
            rx,
            config,
        }
    }

    /// A handle for sending commands to the peer
    ///
    /// Commands sent before `run` starts are queued and go out first.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.tx.downgrade(),
            shared: self.shared.clone(),
            request_timeout: self.config.request_timeout(),
            max_frame_size: self.config.max_frame_size,
        }
    }

    /// Run the session on its own task
    pub fn spawn(self) -> JoinHandle<Result<(), SessionError>> {
        tokio::spawn(self.run())
    }

    /// Serve the connection until the peer closes it or a frame is unreadable
    ///
    /// On return every service started for the peer is stopped and every
    /// outstanding request has been cancelled.
    pub async fn run(self) -> Result<(), SessionError> {
        let Session {
            stream,
            config,
            dispatcher,
            mut services,
            shared,
            tx,
            mut rx,
        } = self;

        let closing = CloseOnDrop(shared.clone());
        let (read_half, write_half) = tokio::io::split(stream);
        let mut frames = FramedRead::new(read_half, EnvelopeCodec::new(config.max_frame_size));
        let mut sink = FramedWrite::new(write_half, EnvelopeCodec::new(config.max_frame_size));
        let (reply_tx, mut replies) = mpsc::unbounded_channel::<Envelope>();

        let writer = tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    biased;
                    Some(reply) = replies.recv() => reply,
                    Some(request) = rx.recv() => request,
                    else => break,
                };
                let (command_id, serial) = (envelope.command_id, envelope.serial);
                if let Err(e) = sink.send(envelope).await {
                    error!(
                        "Failed to write envelope (command {}, serial {}): {}",
                        command_id, serial, e
                    );
                    break;
                }
            }
            debug!("Session writer finished");
        });

        let result = loop {
            let envelope = match frames.next().await {
                Some(Ok(envelope)) => envelope,
                Some(Err(e)) => {
                    error!("Failed to read envelope: {}", e);
                    break Err(SessionError::Codec(e));
                }
                None => {
                    info!("Peer closed the session");
                    break Ok(());
                }
            };

            if envelope.is_reply() {
                route_reply(&dispatcher, &shared.pending, envelope);
                continue;
            }

            let reply = serve_request(&dispatcher, &mut services, envelope, config.max_frame_size);
            if reply_tx.send(reply).is_err() {
                warn!("Session writer is gone, closing session");
                break Err(SessionError::Closed);
            }
        };

        drop(closing);
        services.stop_all();
        drop(reply_tx);
        drop(tx);
        if let Err(e) = writer.await {
            error!("Session writer task failed: {}", e);
        }

        result
    }
}

/// Marks the session closed and cancels outstanding requests, also when the
/// session task is aborted
struct CloseOnDrop(Arc<Shared>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.closed.store(true, Ordering::SeqCst);
        self.0.pending.cancel_all();
    }
}

fn serve_request(
    dispatcher: &CommandDispatcher,
    services: &mut ServiceLifecycleManager,
    request: Envelope,
    max_frame_size: usize,
) -> Envelope {
    debug!(
        "Serving command {} (serial {})",
        request.command_id, request.serial
    );
    match dispatcher.dispatch_request(request.command_id, &request.payload, services) {
        Ok(reply) if ENVELOPE_HEADER_LEN + reply.payload.len() > max_frame_size => {
            warn!(
                "Reply to command {} (serial {}) exceeds the frame limit of {} bytes",
                request.command_id, request.serial, max_frame_size
            );
            Envelope::reply(
                reply.command_id,
                request.serial,
                ReplyStatus::MalformedPayload.code(),
                Bytes::new(),
            )
        }
        Ok(reply) => Envelope::reply(
            reply.command_id,
            request.serial,
            reply.status.code(),
            reply.payload,
        ),
        Err(e) => {
            warn!(
                "Cannot serve command {} (serial {}): {}",
                request.command_id, request.serial, e
            );
            // Without a handler there is no binding; answer under the request's id
            Envelope::reply(
                request.command_id,
                request.serial,
                e.status().code(),
                Bytes::new(),
            )
        }
    }
}

fn route_reply(dispatcher: &CommandDispatcher, pending: &PendingRequests, reply: Envelope) {
    let Some(request) = pending.take(reply.serial) else {
        return;
    };

    let accepted = reply.command_id == request.command_id
        || dispatcher.expected_reply_id(request.command_id) == Some(reply.command_id);
    let result = if accepted {
        dispatcher.dispatch_reply(
            request.command_id,
            &request.request,
            reply.status,
            &reply.payload,
        )
    } else {
        warn!(
            "Reply {} does not answer command {} (serial {})",
            reply.command_id, request.command_id, reply.serial
        );
        Err(DispatchError::UnexpectedReply {
            serial: reply.serial,
            command_id: reply.command_id,
        })
    };

    if !request.complete(result) {
        debug!("Caller of serial {} stopped waiting", reply.serial);
    }
}

/// Sends commands over a running session
///
/// Handles do not keep the session alive; once it ends every call fails
/// with [`SessionError::Closed`].
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::WeakSender<Envelope>,
    shared: Arc<Shared>,
    request_timeout: Option<Duration>,
    max_frame_size: usize,
}

impl SessionHandle {
    /// Start a service on the peer under an id the peer allocates
    pub async fn start_service(
        &self,
        service_type: u32,
        parameters: Parameters,
    ) -> Result<ServiceStatus, SessionError> {
        self.send_command(&StartServiceRequest {
            service_type,
            instance_id: None,
            parameters,
        })
        .await
    }

    /// Start a service on the peer under a chosen id
    pub async fn start_service_with_id(
        &self,
        instance_id: u32,
        service_type: u32,
        parameters: Parameters,
    ) -> Result<ServiceStatus, SessionError> {
        self.send_command(&StartServiceRequest {
            service_type,
            instance_id: Some(instance_id),
            parameters,
        })
        .await
    }

    pub async fn stop_service(&self, instance_id: u32) -> Result<ServiceStatus, SessionError> {
        self.send_command(&StopServiceRequest { instance_id }).await
    }

    pub async fn query_service(&self, instance_id: u32) -> Result<ServiceStatus, SessionError> {
        self.send_command(&QueryServiceRequest { instance_id }).await
    }

    /// Services the peer runs for this session, as instance id to service type
    pub async fn list_services(&self) -> Result<ServiceStatus, SessionError> {
        self.send_command(&ListServicesRequest).await
    }

    /// Send any registered command and wait for its outcome
    pub async fn send_command<C: Command>(&self, command: &C) -> Result<ServiceStatus, SessionError> {
        let payload = PayloadCodec::encode(command)?;
        self.send_raw(C::COMMAND_ID, Bytes::from(payload)).await
    }

    /// Send an already encoded payload under an arbitrary command id
    pub async fn send_raw(
        &self,
        command_id: u32,
        payload: Bytes,
    ) -> Result<ServiceStatus, SessionError> {
        let length = ENVELOPE_HEADER_LEN + payload.len();
        if length > self.max_frame_size {
            warn!(
                "Command {} needs a {} byte frame (max {})",
                command_id, length, self.max_frame_size
            );
            return Err(SessionError::Codec(CodecError::FrameTooLarge(length)));
        }

        let serial = self.shared.next_serial.fetch_add(1, Ordering::Relaxed);
        let rx = self
            .shared
            .pending
            .register(serial, command_id, payload.clone());

        if self.shared.closed.load(Ordering::SeqCst) {
            self.shared.pending.cancel(serial);
            return Err(SessionError::Closed);
        }
        let Some(tx) = self.tx.upgrade() else {
            self.shared.pending.cancel(serial);
            return Err(SessionError::Closed);
        };
        if tx
            .send(Envelope::request(command_id, serial, payload))
            .await
            .is_err()
        {
            self.shared.pending.cancel(serial);
            return Err(SessionError::Closed);
        }
        drop(tx);
        debug!("Sent command {} (serial {})", command_id, serial);

        let outcome = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Command {} (serial {}) timed out", command_id, serial);
                    self.shared.pending.cancel(serial);
                    return Err(SessionError::Timeout(limit));
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(result) => Ok(result?),
            Err(_) => Err(SessionError::Closed),
        }
    }

    /// Number of commands sent and not yet answered
    pub fn pending_count(&self) -> usize {
        self.shared.pending.count()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}
