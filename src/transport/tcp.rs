//! Direct transport implementation
//!
//! Opens plain TCP and UDP sockets with tokio.

use super::{
    DatagramConn, Dialer, PacketListen, PacketSocket, ProxyStream, SocketOpts, StreamListen,
    StreamListener,
};
use crate::socks::TargetAddr;
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Default hooks: dials and listens on the host network stack
#[derive(Debug, Clone)]
pub struct DirectTransport {
    /// Socket options applied to outbound and accepted TCP connections
    socket_opts: SocketOpts,
    /// Connection timeout
    connect_timeout: Duration,
}

impl Default for DirectTransport {
    fn default() -> Self {
        DirectTransport::with_defaults()
    }
}

impl DirectTransport {
    /// Create a transport with default options
    pub fn with_defaults() -> Self {
        DirectTransport {
            socket_opts: SocketOpts::default(),
            connect_timeout: Duration::from_secs(crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Set socket options
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn hint(&self, stream: &TcpStream) {
        if let Err(e) = self.socket_opts.apply(stream) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }
    }
}

/// Wildcard address of the same family as `peer`
fn unspecified_for(peer: &SocketAddr) -> SocketAddr {
    let ip = match peer {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

#[async_trait]
impl Dialer for DirectTransport {
    async fn connect(&self, target: &TargetAddr) -> io::Result<Box<dyn ProxyStream>> {
        let resolved = target.resolve().await?;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(resolved))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("Connection timeout to {}", target),
                )
            })??;

        self.hint(&stream);

        tracing::debug!("TCP connection established to {}", resolved);

        Ok(Box::new(stream))
    }

    async fn connect_datagram(&self, target: &TargetAddr) -> io::Result<Arc<dyn DatagramConn>> {
        let resolved = target.resolve().await?;

        let socket = UdpSocket::bind(unspecified_for(&resolved)).await?;
        socket.connect(resolved).await?;

        tracing::debug!(
            "UDP socket {} connected to {}",
            socket.local_addr()?,
            resolved
        );

        Ok(Arc::new(socket))
    }
}

/// TCP listener that applies socket options to accepted connections
#[derive(Debug)]
pub struct DirectListener {
    inner: TcpListener,
    socket_opts: SocketOpts,
}

#[async_trait]
impl StreamListener for DirectListener {
    async fn accept(&self) -> io::Result<(Box<dyn ProxyStream>, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        if let Err(e) = self.socket_opts.apply(&stream) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }
        Ok((Box::new(stream), peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[async_trait]
impl StreamListen for DirectTransport {
    async fn listen(&self, addr: SocketAddr) -> io::Result<Box<dyn StreamListener>> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Box::new(DirectListener {
            inner,
            socket_opts: self.socket_opts.clone(),
        }))
    }
}

#[async_trait]
impl PacketListen for DirectTransport {
    async fn listen_packet(&self, addr: SocketAddr) -> io::Result<Arc<dyn PacketSocket>> {
        Ok(Arc::new(UdpSocket::bind(addr).await?))
    }
}
