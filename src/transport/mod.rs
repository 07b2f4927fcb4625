//! Transport hooks for Socksd
//!
//! The server opens every socket through the traits in this module: a
//! [`Dialer`] for outbound CONNECT streams and UDP sends, a [`StreamListen`]
//! for BIND listeners and a [`PacketListen`] for the shared UDP socket.
//! [`DirectTransport`] implements all three on top of tokio's networking.

mod tcp;

pub use tcp::{DirectListener, DirectTransport};

use crate::config::TcpConfig;
use crate::socks::TargetAddr;
use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Socket options applied to TCP connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }
}

impl SocketOpts {
    /// Create socket options from TCP config
    pub fn from_tcp_config(config: &TcpConfig) -> Self {
        SocketOpts {
            nodelay: config.nodelay,
            keepalive_secs: Some(config.keepalive_secs),
            keepalive_interval: Some(config.keepalive_interval),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Dynamic stream trait for boxed streams
pub trait StreamDyn: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Debug> StreamDyn for T {}

/// A connected stream that knows its endpoints
pub trait ProxyStream: StreamDyn {
    /// Local address of the connection
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Remote address of the connection
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl ProxyStream for TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

/// Source of accepted streams, used by the accept loop and by BIND
#[async_trait]
pub trait StreamListener: Send + Sync {
    /// Wait for the next inbound connection
    async fn accept(&self) -> io::Result<(Box<dyn ProxyStream>, SocketAddr)>;

    /// Address the listener is bound to
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl StreamListener for TcpListener {
    async fn accept(&self) -> io::Result<(Box<dyn ProxyStream>, SocketAddr)> {
        let (stream, peer) = TcpListener::accept(self).await?;
        Ok((Box::new(stream), peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

#[async_trait]
impl<T: StreamListener + ?Sized> StreamListener for Box<T> {
    async fn accept(&self) -> io::Result<(Box<dyn ProxyStream>, SocketAddr)> {
        (**self).accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}

/// A UDP socket that sends to and receives from a single peer
#[async_trait]
pub trait DatagramConn: Debug + Send + Sync {
    /// Send one datagram to the peer
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Receive one datagram from the peer
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Address of the peer
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl DatagramConn for UdpSocket {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, buf).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, buf).await
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::peer_addr(self)
    }
}

/// An unconnected UDP socket shared by every association
#[async_trait]
pub trait PacketSocket: Debug + Send + Sync {
    /// Receive one datagram and its source
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Send one datagram to `target`
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Address the socket is bound to
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl PacketSocket for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Dial hook, used for CONNECT and for UDP ASSOCIATE outbound sends
#[async_trait]
pub trait Dialer: Debug + Send + Sync {
    /// Open a TCP stream to `target`
    async fn connect(&self, target: &TargetAddr) -> io::Result<Box<dyn ProxyStream>>;

    /// Open a UDP socket connected to `target`
    async fn connect_datagram(&self, target: &TargetAddr) -> io::Result<Arc<dyn DatagramConn>>;
}

/// Stream-listen hook, used for BIND
#[async_trait]
pub trait StreamListen: Debug + Send + Sync {
    /// Bind a listener at `addr`
    async fn listen(&self, addr: SocketAddr) -> io::Result<Box<dyn StreamListener>>;
}

/// Packet-listen hook, used once per `serve` for the shared UDP socket
#[async_trait]
pub trait PacketListen: Debug + Send + Sync {
    /// Bind a UDP socket at `addr`
    async fn listen_packet(&self, addr: SocketAddr) -> io::Result<Arc<dyn PacketSocket>>;
}
