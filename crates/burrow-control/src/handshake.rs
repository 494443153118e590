//! Version handshake run once per connection before any command flows
//!
//! Both sides drive an explicit state machine. Each state owns the packet
//! its I/O operates on and hands it to the next state; the caller only ever
//! sees the terminal result.
//!
//! ```text
//! initiate:  SendRequest ──> AwaitReply ──> CheckReply ──> Ok | Rejected
//! respond:   AwaitRequest ──> CheckVersion ──> SendReply ──> Ok
//!                                  └──> UnsupportedVersion (no reply written)
//! ```
//!
//! Any read or write failure is terminal and surfaces as `Transport`.
//! Closing the stream is the only way to cancel a handshake in flight.

use burrow_proto::{HandshakeReply, HandshakeRequest, ProtocolVersion};
use burrow_transport::ByteStream;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::config::ControlConfig;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Transport error during handshake: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Unsupported peer version {peer} (local {local})")]
    UnsupportedVersion {
        local: ProtocolVersion,
        peer: ProtocolVersion,
    },

    #[error("Handshake rejected by peer")]
    Rejected,

    #[error("Handshake timed out")]
    Timeout,
}

impl HandshakeError {
    /// True when the peer speaks an incompatible protocol, whichever side noticed
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            HandshakeError::UnsupportedVersion { .. } | HandshakeError::Rejected
        )
    }
}

enum Step<S> {
    Next(S),
    Done(Result<(), HandshakeError>),
}

enum InitiateState {
    SendRequest(HandshakeRequest),
    AwaitReply(HandshakeReply),
    CheckReply(HandshakeReply),
}

impl InitiateState {
    async fn step<T>(self, stream: &mut T) -> Step<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            InitiateState::SendRequest(request) => {
                if let Err(e) = write_packet(stream, request.as_bytes()).await {
                    error!("Could not send handshake request: {}", e);
                    return Step::Done(Err(e.into()));
                }
                debug!("Handshake request sent");
                Step::Next(InitiateState::AwaitReply(HandshakeReply::empty()))
            }
            InitiateState::AwaitReply(mut reply) => {
                if let Err(e) = stream.read_exact(reply.buffer_mut()).await {
                    error!("Could not read handshake reply: {}", e);
                    return Step::Done(Err(e.into()));
                }
                Step::Next(InitiateState::CheckReply(reply))
            }
            InitiateState::CheckReply(reply) => {
                if !reply.is_accepted() {
                    error!("Handshake reply rejected our version");
                    return Step::Done(Err(HandshakeError::Rejected));
                }
                trace!("Handshake reply OK");
                Step::Done(Ok(()))
            }
        }
    }
}

enum RespondState {
    AwaitRequest(HandshakeRequest),
    CheckVersion(HandshakeRequest),
    SendReply(HandshakeReply),
}

impl RespondState {
    async fn step<T>(self, stream: &mut T, local: ProtocolVersion) -> Step<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            RespondState::AwaitRequest(mut request) => {
                if let Err(e) = stream.read_exact(request.buffer_mut()).await {
                    error!("Handshake request not read: {}", e);
                    return Step::Done(Err(e.into()));
                }
                Step::Next(RespondState::CheckVersion(request))
            }
            RespondState::CheckVersion(request) => {
                let peer = request.version();
                trace!("Peer protocol version {}", peer);

                if !local.is_compatible_with(&peer) {
                    error!("Peer protocol version {} not supported (local {})", peer, local);
                    return Step::Done(Err(HandshakeError::UnsupportedVersion { local, peer }));
                }
                Step::Next(RespondState::SendReply(HandshakeReply::new(true)))
            }
            RespondState::SendReply(reply) => {
                if let Err(e) = write_packet(stream, reply.as_bytes()).await {
                    error!("Could not send handshake reply: {}", e);
                    return Step::Done(Err(e.into()));
                }
                trace!("Handshake reply sent");
                Step::Done(Ok(()))
            }
        }
    }
}

async fn write_packet<T>(stream: &mut T, bytes: &[u8]) -> std::io::Result<()>
where
    T: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await?;
    stream.flush().await
}

/// Drives the handshake for one side of a connection
#[derive(Debug, Clone, Copy)]
pub struct HandshakeEngine {
    local: ProtocolVersion,
    timeout: Option<Duration>,
}

impl HandshakeEngine {
    pub fn new(local: ProtocolVersion) -> Self {
        Self {
            local,
            timeout: None,
        }
    }

    pub fn from_config(config: &ControlConfig) -> Self {
        Self {
            local: config.version,
            timeout: config.handshake_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn local_version(&self) -> ProtocolVersion {
        self.local
    }

    /// Run the opening side of the handshake
    pub async fn initiate<T>(&self, stream: &mut T) -> Result<(), HandshakeError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        debug!("Starting handshake as initiator (version {})", self.local);
        let local = self.local;
        self.bounded(async move {
            let mut state = InitiateState::SendRequest(HandshakeRequest::new(local));
            loop {
                match state.step(stream).await {
                    Step::Next(next) => state = next,
                    Step::Done(result) => return result,
                }
            }
        })
        .await
    }

    /// Run the accepting side of the handshake
    pub async fn respond<T>(&self, stream: &mut T) -> Result<(), HandshakeError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        debug!("Waiting for handshake as responder (version {})", self.local);
        let local = self.local;
        self.bounded(async move {
            let mut state = RespondState::AwaitRequest(HandshakeRequest::empty());
            loop {
                match state.step(stream, local).await {
                    Step::Next(next) => state = next,
                    Step::Done(result) => return result,
                }
            }
        })
        .await
    }

    /// Start `initiate` on the runtime and return immediately
    ///
    /// `on_complete` receives the stream back together with the result. It runs
    /// exactly once, on the spawned task, after the last I/O step returned.
    pub fn spawn_initiate<S, F>(&self, mut stream: S, on_complete: F) -> JoinHandle<()>
    where
        S: ByteStream,
        F: FnOnce(S, Result<(), HandshakeError>) + Send + 'static,
    {
        let engine = *self;
        tokio::spawn(async move {
            let result = engine.initiate(&mut stream).await;
            on_complete(stream, result);
        })
    }

    /// Start `respond` on the runtime and return immediately
    pub fn spawn_respond<S, F>(&self, mut stream: S, on_complete: F) -> JoinHandle<()>
    where
        S: ByteStream,
        F: FnOnce(S, Result<(), HandshakeError>) + Send + 'static,
    {
        let engine = *self;
        tokio::spawn(async move {
            let result = engine.respond(&mut stream).await;
            on_complete(stream, result);
        })
    }

    async fn bounded<F>(&self, handshake: F) -> Result<(), HandshakeError>
    where
        F: Future<Output = Result<(), HandshakeError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .unwrap_or_else(|_| {
                    warn!("Handshake did not complete within {:?}", limit);
                    Err(HandshakeError::Timeout)
                }),
            None => handshake.await,
        }
    }
}

impl Default for HandshakeEngine {
    fn default() -> Self {
        Self::new(ProtocolVersion::CURRENT)
    }
}
