//! Test utilities for Socksd
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use socksd::{Server, ServerOptions, SocksdError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Spawn a TCP server echoing every connection back to itself
pub async fn spawn_tcp_echo() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Spawn a UDP server echoing every datagram to its sender
pub async fn spawn_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    addr
}

/// A server running on a loopback listener
pub struct TestServer {
    /// The server instance
    pub server: Arc<Server>,
    /// Address clients connect to
    pub addr: SocketAddr,
    /// The `serve` task
    pub handle: JoinHandle<Result<(), SocksdError>>,
}

impl TestServer {
    /// Open a client connection to the server
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }
}

/// Start a server with `options` on 127.0.0.1, UDP relay included
pub async fn start_server(options: ServerOptions) -> TestServer {
    let (listener, addr) = create_test_listener().await;
    let server = Arc::new(Server::new(
        options.with_udp_bind("127.0.0.1:0".parse().unwrap()),
    ));

    let serving = server.clone();
    let handle = tokio::spawn(async move { serving.serve(listener).await });

    TestServer {
        server,
        addr,
        handle,
    }
}

/// Run the no-auth greeting on `stream`
pub async fn greet_no_auth(stream: &mut TcpStream) {
    stream
        .write_all(&socks5_mock::create_auth_request_no_auth())
        .await
        .unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);
}

/// Read a 10-byte IPv4 reply and return `(REP, BND)`
pub async fn read_ipv4_reply(stream: &mut TcpStream) -> (u8, SocketAddr) {
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[3], 0x01);
    let ip = [reply[4], reply[5], reply[6], reply[7]];
    let port = u16::from_be_bytes([reply[8], reply[9]]);
    (reply[1], SocketAddr::from((ip, port)))
}

/// Mock SOCKS5 handshake data
pub mod socks5_mock {
    use socksd::socks::*;
    use std::net::SocketAddr;

    /// Create a no-auth method selection request
    pub fn create_auth_request_no_auth() -> Vec<u8> {
        vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE]
    }

    /// Create a password auth method selection request
    pub fn create_auth_request_password() -> Vec<u8> {
        vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_PASSWORD]
    }

    /// Create an RFC 1929 username/password message
    pub fn create_password_auth(username: &str, password: &str) -> Vec<u8> {
        let mut msg = vec![SOCKS5_AUTH_VERSION, username.len() as u8];
        msg.extend_from_slice(username.as_bytes());
        msg.push(password.len() as u8);
        msg.extend_from_slice(password.as_bytes());
        msg
    }

    /// Create a request for `command` to an IP destination
    pub fn create_request(command: SocksCommand, addr: SocketAddr) -> Vec<u8> {
        Request::new(command, TargetAddr::Ip(addr)).to_bytes()
    }

    /// Create a connect command to IPv4 address
    pub fn create_connect_ipv4(ip: [u8; 4], port: u16) -> Vec<u8> {
        let mut cmd = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_IPV4,
        ];
        cmd.extend_from_slice(&ip);
        cmd.extend_from_slice(&port.to_be_bytes());
        cmd
    }

    /// Create a connect command to domain
    pub fn create_connect_domain(domain: &str, port: u16) -> Vec<u8> {
        let mut cmd = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_DOMAIN,
            domain.len() as u8,
        ];
        cmd.extend_from_slice(domain.as_bytes());
        cmd.extend_from_slice(&port.to_be_bytes());
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_echo_helper() {
        let addr = spawn_tcp_echo().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_socks5_mock_auth_request() {
        let request = socks5_mock::create_auth_request_no_auth();
        assert_eq!(request, vec![5, 1, 0]);
    }

    #[test]
    fn test_socks5_mock_connect_ipv4() {
        let cmd = socks5_mock::create_connect_ipv4([127, 0, 0, 1], 80);
        assert_eq!(cmd, vec![0x05, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01, 0x00, 0x50]);
    }
}
