//! SOCKS5 request types
//!
//! Commands, destination addresses and the parsed request.

use super::consts::*;
use bytes::BufMut;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// SOCKS5 command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksCommand {
    /// Open an outbound TCP connection
    Connect,
    /// Accept one inbound TCP connection on the client's behalf
    Bind,
    /// Relay UDP datagrams through the shared socket
    UdpAssociate,
}

impl SocksCommand {
    /// Parse a command byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_CMD_TCP_CONNECT => Some(SocksCommand::Connect),
            SOCKS5_CMD_TCP_BIND => Some(SocksCommand::Bind),
            SOCKS5_CMD_UDP_ASSOCIATE => Some(SocksCommand::UdpAssociate),
            _ => None,
        }
    }

    /// Wire value of the command
    pub fn to_byte(self) -> u8 {
        match self {
            SocksCommand::Connect => SOCKS5_CMD_TCP_CONNECT,
            SocksCommand::Bind => SOCKS5_CMD_TCP_BIND,
            SocksCommand::UdpAssociate => SOCKS5_CMD_UDP_ASSOCIATE,
        }
    }
}

impl fmt::Display for SocksCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksCommand::Connect => write!(f, "CONNECT"),
            SocksCommand::Bind => write!(f, "BIND"),
            SocksCommand::UdpAssociate => write!(f, "UDP ASSOCIATE"),
        }
    }
}

/// Destination address of a request or UDP datagram
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port, resolved by the dialer
    Domain(String, u16),
}

impl TargetAddr {
    /// IPv4 destination
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
    }

    /// IPv6 destination
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Domain destination
    pub fn domain(domain: impl Into<String>, port: u16) -> Self {
        TargetAddr::Domain(domain.into(), port)
    }

    /// Port number
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// ATYP byte for this address
    pub fn addr_type(&self) -> u8 {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => SOCKS5_ADDR_TYPE_IPV4,
            TargetAddr::Ip(SocketAddr::V6(_)) => SOCKS5_ADDR_TYPE_IPV6,
            TargetAddr::Domain(_, _) => SOCKS5_ADDR_TYPE_DOMAIN,
        }
    }

    /// Resolve to a socket address, looking up domain names
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        match self {
            TargetAddr::Ip(addr) => Ok(*addr),
            TargetAddr::Domain(domain, port) => tokio::net::lookup_host((domain.as_str(), *port))
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("No addresses found for domain: {}", domain),
                    )
                }),
        }
    }

    /// Number of bytes [`TargetAddr::write_to`] produces
    pub fn encoded_len(&self) -> usize {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => 1 + 4 + 2,
            TargetAddr::Ip(SocketAddr::V6(_)) => 1 + 16 + 2,
            TargetAddr::Domain(domain, _) => 1 + 1 + wire_domain(domain).len() + 2,
        }
    }

    /// Append `ATYP ADDR PORT` to a buffer
    ///
    /// Domains longer than [`MAX_DOMAIN_LEN`] bytes are cut to fit the
    /// one-byte length field.
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.addr_type());
        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => buf.put_slice(&addr.ip().octets()),
            TargetAddr::Ip(SocketAddr::V6(addr)) => buf.put_slice(&addr.ip().octets()),
            TargetAddr::Domain(domain, _) => {
                let domain = wire_domain(domain);
                buf.put_u8(domain.len() as u8);
                buf.put_slice(domain);
            }
        }
        buf.put_u16(self.port());
    }

    /// Serialize as `ATYP ADDR PORT`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut bytes);
        bytes
    }
}

fn wire_domain(domain: &str) -> &[u8] {
    let bytes = domain.as_bytes();
    &bytes[..bytes.len().min(MAX_DOMAIN_LEN)]
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}

impl Default for TargetAddr {
    fn default() -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
    }
}

/// A parsed client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Requested command
    pub command: SocksCommand,
    /// DST.ADDR and DST.PORT
    pub target: TargetAddr,
}

impl Request {
    /// Create a request
    pub fn new(command: SocksCommand, target: TargetAddr) -> Self {
        Request { command, target }
    }

    /// Encode as `VER CMD RSV ATYP ADDR PORT`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(3 + self.target.encoded_len());
        bytes.put_u8(SOCKS5_VERSION);
        bytes.put_u8(self.command.to_byte());
        bytes.put_u8(SOCKS5_RESERVED);
        self.target.write_to(&mut bytes);
        bytes
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.command, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks_command_from_byte() {
        assert_eq!(SocksCommand::from_byte(1), Some(SocksCommand::Connect));
        assert_eq!(SocksCommand::from_byte(2), Some(SocksCommand::Bind));
        assert_eq!(SocksCommand::from_byte(3), Some(SocksCommand::UdpAssociate));
        assert_eq!(SocksCommand::from_byte(0), None);
        assert_eq!(SocksCommand::from_byte(4), None);
    }

    #[test]
    fn test_socks_command_display() {
        assert_eq!(SocksCommand::Connect.to_string(), "CONNECT");
        assert_eq!(SocksCommand::UdpAssociate.to_string(), "UDP ASSOCIATE");
    }

    #[test]
    fn test_target_addr_display() {
        let addr = TargetAddr::ipv4(Ipv4Addr::new(127, 0, 0, 1), 8080);
        assert_eq!(addr.to_string(), "127.0.0.1:8080");

        let addr = TargetAddr::ipv6(Ipv6Addr::LOCALHOST, 443);
        assert_eq!(addr.to_string(), "[::1]:443");

        let addr = TargetAddr::domain("test.com", 443);
        assert_eq!(addr.to_string(), "test.com:443");
    }

    #[test]
    fn test_target_addr_to_bytes_ipv4() {
        let addr = TargetAddr::ipv4(Ipv4Addr::new(192, 168, 1, 1), 8080);
        assert_eq!(
            addr.to_bytes(),
            vec![SOCKS5_ADDR_TYPE_IPV4, 192, 168, 1, 1, 0x1F, 0x90]
        );
        assert_eq!(addr.encoded_len(), 7);
    }

    #[test]
    fn test_target_addr_to_bytes_domain() {
        let addr = TargetAddr::domain("test", 80);
        let bytes = addr.to_bytes();

        assert_eq!(bytes[0], SOCKS5_ADDR_TYPE_DOMAIN);
        assert_eq!(bytes[1], 4);
        assert_eq!(&bytes[2..6], b"test");
        assert_eq!(&bytes[6..8], &80u16.to_be_bytes());
        assert_eq!(bytes.len(), addr.encoded_len());
    }

    #[test]
    fn test_target_addr_to_bytes_long_domain() {
        let addr = TargetAddr::domain("a".repeat(300), 443);
        let bytes = addr.to_bytes();

        assert_eq!(bytes[1] as usize, MAX_DOMAIN_LEN);
        assert_eq!(bytes.len(), 1 + 1 + MAX_DOMAIN_LEN + 2);
        assert_eq!(bytes.len(), addr.encoded_len());
        assert_eq!(&bytes[bytes.len() - 2..], &443u16.to_be_bytes());
    }

    #[test]
    fn test_target_addr_to_bytes_ipv6() {
        let addr = TargetAddr::ipv6(Ipv6Addr::LOCALHOST, 53);
        let bytes = addr.to_bytes();

        assert_eq!(bytes[0], SOCKS5_ADDR_TYPE_IPV6);
        assert_eq!(bytes[16], 1);
        assert_eq!(&bytes[17..19], &53u16.to_be_bytes());
        assert_eq!(bytes.len(), 19);
    }

    #[tokio::test]
    async fn test_target_addr_resolve_ip() {
        let addr = TargetAddr::ipv4(Ipv4Addr::LOCALHOST, 8080);
        let resolved = addr.resolve().await.unwrap();
        assert_eq!(resolved, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_target_addr_resolve_localhost() {
        let addr = TargetAddr::domain("localhost", 9000);
        let resolved = addr.resolve().await.unwrap();
        assert!(resolved.ip().is_loopback());
        assert_eq!(resolved.port(), 9000);
    }

    #[test]
    fn test_request_to_bytes() {
        let request = Request::new(
            SocksCommand::Connect,
            TargetAddr::ipv4(Ipv4Addr::LOCALHOST, 80),
        );
        assert_eq!(
            request.to_bytes(),
            vec![0x05, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01, 0x00, 0x50]
        );
        assert_eq!(request.to_string(), "CONNECT 127.0.0.1:80");
    }
}
