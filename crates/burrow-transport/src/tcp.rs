//! Plain TCP transport

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::{TransportConnector, TransportError, TransportListener, TransportResult};

/// TCP listener producing one control stream per accepted connection
#[derive(Debug)]
pub struct TcpTransportListener {
    listener: TcpListener,
}

impl TcpTransportListener {
    pub async fn bind(addr: SocketAddr) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        debug!("TCP transport listening on {}", listener.local_addr()?);
        Ok(Self { listener })
    }
}

#[async_trait]
impl TransportListener for TcpTransportListener {
    type Stream = TcpStream;

    async fn accept(&self) -> TransportResult<(TcpStream, SocketAddr)> {
        let (stream, peer_addr) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }
        debug!("Accepted TCP connection from {}", peer_addr);
        Ok((stream, peer_addr))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// TCP connector with an optional connect timeout
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, addr: SocketAddr) -> TransportResult<TcpStream> {
        let stream = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| TransportError::Timeout)??,
            None => TcpStream::connect(addr).await?,
        };
        stream.set_nodelay(true)?;
        debug!("Connected to {}", addr);
        Ok(stream)
    }
}
