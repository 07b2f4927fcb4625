//! Error types for Socksd
//!
//! This module defines all custom error types used throughout the server.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Socksd operations
#[derive(Error, Debug)]
pub enum SocksdError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// SOCKS5 protocol error
    #[error("SOCKS5 error: {0}")]
    Socks5(#[from] Socks5Error),

    /// Returned by `serve` once shutdown has been requested
    #[error("Server closed")]
    ServerClosed,

    /// In-flight sessions did not finish before the shutdown deadline
    #[error("Shutdown deadline of {0:?} exceeded")]
    ShutdownTimeout(Duration),
}

/// SOCKS5 specific errors
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// Unsupported SOCKS version
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// No acceptable authentication method
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// Authentication failed
    #[error("Authentication failed")]
    AuthFailed,

    /// Command not supported
    #[error("Command not supported: {0}")]
    CommandNotSupported(u8),

    /// Address type not supported
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Invalid domain name
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    /// UDP datagram carries a non-zero fragment number
    #[error("Fragmented datagram: {0}")]
    FragmentedDatagram(u8),

    /// UDP datagram shorter than its header claims
    #[error("Datagram too short: {0} bytes")]
    DatagramTooShort(usize),

    /// Reserved field in a UDP datagram is not zero
    #[error("Invalid reserved field: {0}")]
    InvalidReserved(u16),

    /// IO error while reading or writing protocol messages
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Socks5Error {
    /// Reply code to send to the client before closing, if a reply is possible.
    ///
    /// Truncated reads have no reply since the peer is already gone.
    pub fn reply_code(&self) -> Option<Socks5ReplyCode> {
        match self {
            Socks5Error::Io(_) => None,
            Socks5Error::CommandNotSupported(_) => Some(Socks5ReplyCode::CommandNotSupported),
            Socks5Error::AddressTypeNotSupported(_) => {
                Some(Socks5ReplyCode::AddressTypeNotSupported)
            }
            _ => Some(Socks5ReplyCode::GeneralFailure),
        }
    }
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks5ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl From<Socks5ReplyCode> for u8 {
    fn from(code: Socks5ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for Socks5ReplyCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Socks5ReplyCode::Succeeded),
            0x01 => Ok(Socks5ReplyCode::GeneralFailure),
            0x02 => Ok(Socks5ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(Socks5ReplyCode::NetworkUnreachable),
            0x04 => Ok(Socks5ReplyCode::HostUnreachable),
            0x05 => Ok(Socks5ReplyCode::ConnectionRefused),
            0x06 => Ok(Socks5ReplyCode::TtlExpired),
            0x07 => Ok(Socks5ReplyCode::CommandNotSupported),
            0x08 => Ok(Socks5ReplyCode::AddressTypeNotSupported),
            other => Err(other),
        }
    }
}

/// Linux errno values that carry no `ErrorKind` of their own on stable Rust.
const ENETUNREACH: i32 = 101;
const EHOSTUNREACH: i32 = 113;

impl From<&io::Error> for Socks5ReplyCode {
    fn from(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(ENETUNREACH) if cfg!(target_os = "linux") => {
                return Socks5ReplyCode::NetworkUnreachable
            }
            Some(EHOSTUNREACH) if cfg!(target_os = "linux") => {
                return Socks5ReplyCode::HostUnreachable
            }
            _ => {}
        }

        match err.kind() {
            io::ErrorKind::ConnectionRefused => Socks5ReplyCode::ConnectionRefused,
            io::ErrorKind::TimedOut => Socks5ReplyCode::HostUnreachable,
            io::ErrorKind::AddrNotAvailable => Socks5ReplyCode::HostUnreachable,
            io::ErrorKind::NotFound => Socks5ReplyCode::HostUnreachable,
            io::ErrorKind::PermissionDenied => Socks5ReplyCode::ConnectionNotAllowed,
            _ => Socks5ReplyCode::GeneralFailure,
        }
    }
}
