//! SOCKS5 wire constants
//!
//! Byte values from RFC 1928 and RFC 1929. Reply codes live in
//! [`Socks5ReplyCode`](crate::error::Socks5ReplyCode).

use std::time::Duration;

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

/// Username/password sub-negotiation version (RFC 1929)
pub const SOCKS5_AUTH_VERSION: u8 = 0x01;

// Authentication methods
/// No authentication required
pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;
/// Username/password authentication
pub const SOCKS5_AUTH_METHOD_PASSWORD: u8 = 0x02;
/// No acceptable methods
pub const SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE: u8 = 0xFF;

// Commands
/// TCP CONNECT command
pub const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;
/// TCP BIND command
pub const SOCKS5_CMD_TCP_BIND: u8 = 0x02;
/// UDP ASSOCIATE command
pub const SOCKS5_CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address types
/// IPv4 address
pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
/// Domain name
pub const SOCKS5_ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address
pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

/// Reserved byte value (always 0x00)
pub const SOCKS5_RESERVED: u8 = 0x00;

/// Maximum domain name length
pub const MAX_DOMAIN_LEN: usize = 255;

/// Per-direction transfer buffer for the TCP relay
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Largest UDP payload the relay reads in one datagram
pub const MAX_UDP_PACKET_SIZE: usize = 65535;

/// Datagrams queued per association before new ones are dropped
pub const UDP_ASSOCIATION_QUEUE: usize = 256;

/// Destinations one association keeps an outbound socket open for
pub const UDP_MAX_OUTBOUND: usize = 64;

/// An outbound UDP socket with no replies for this long is closed
pub const UDP_OUTBOUND_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
