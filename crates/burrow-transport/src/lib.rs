//! Transport abstraction layer for burrow connections
//!
//! The control plane runs on top of any ordered, reliable byte stream. The
//! underlying channel is expected to be secured and multiplexed already;
//! this crate only names the capability the control plane needs and offers
//! listener/connector traits so callers can plug in their own transport.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   burrow-control                         │
//! │           (handshake, command dispatch)                  │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ ByteStream
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │            burrow-transport (this crate)                 │
//! │  - TransportListener    - TransportConnector             │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Implemented by
//!                           ↓
//! ┌──────────────┬──────────────────────────────────────────┐
//! │ tcp          │  secured / multiplexed channels          │
//! └──────────────┴──────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use std::fmt::Debug;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod tcp;

pub use tcp::{TcpConnector, TcpTransportListener};

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// An ordered, reliable duplex byte stream
///
/// Anything offering asynchronous reads and writes of byte buffers qualifies:
/// a TCP stream, one channel of a multiplexed connection, an in-memory pipe.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Server-side: Listens for incoming streams
#[async_trait]
pub trait TransportListener: Send + Sync + Debug {
    /// The stream type accepted by this listener
    type Stream: ByteStream;

    /// Accept an incoming stream
    ///
    /// Returns the stream and the remote address of the connecting peer.
    async fn accept(&self) -> TransportResult<(Self::Stream, SocketAddr)>;

    /// Get the local address this listener is bound to
    fn local_addr(&self) -> TransportResult<SocketAddr>;
}

/// Client-side: Establishes outgoing streams
#[async_trait]
pub trait TransportConnector: Send + Sync + Debug {
    /// The stream type created by this connector
    type Stream: ByteStream;

    /// Connect to a remote peer
    async fn connect(&self, addr: SocketAddr) -> TransportResult<Self::Stream>;
}
