//! SOCKS5 reply builder
//!
//! Constructs SOCKS5 reply messages.

use crate::error::Socks5ReplyCode;
use crate::socks::consts::*;
use crate::socks::types::TargetAddr;
use bytes::BufMut;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Encode a reply without sending it
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// A missing bind address is sent as `0.0.0.0:0`.
pub fn encode_reply(code: Socks5ReplyCode, bind_addr: Option<SocketAddr>) -> Vec<u8> {
    let bind_addr: TargetAddr = bind_addr
        .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
        .into();

    let mut reply = Vec::with_capacity(3 + bind_addr.encoded_len());
    reply.put_u8(SOCKS5_VERSION);
    reply.put_u8(code.into());
    reply.put_u8(SOCKS5_RESERVED);
    bind_addr.write_to(&mut reply);
    reply
}

/// Build and send a SOCKS5 reply
pub async fn build_reply<S>(
    stream: &mut S,
    code: Socks5ReplyCode,
    bind_addr: Option<SocketAddr>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(&encode_reply(code, bind_addr)).await?;
    stream.flush().await
}

/// Send a success reply carrying the bound address
pub async fn send_success<S>(stream: &mut S, bind_addr: Option<SocketAddr>) -> io::Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    build_reply(stream, Socks5ReplyCode::Succeeded, bind_addr).await
}

/// Send the reply that best describes an outbound IO failure
pub async fn send_io_error<S>(stream: &mut S, error: &io::Error) -> io::Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    build_reply(stream, Socks5ReplyCode::from(error), None).await
}

/// Send a "command not supported" reply
pub async fn send_command_not_supported<S>(stream: &mut S) -> io::Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    build_reply(stream, Socks5ReplyCode::CommandNotSupported, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_encode_reply_ipv4() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 8080);
        let reply = encode_reply(Socks5ReplyCode::Succeeded, Some(addr));

        assert_eq!(
            reply,
            vec![0x05, 0x00, 0x00, 0x01, 192, 168, 1, 1, 0x1F, 0x90]
        );
    }

    #[test]
    fn test_encode_reply_ipv6() {
        let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 443);
        let reply = encode_reply(Socks5ReplyCode::Succeeded, Some(addr));

        assert_eq!(reply[3], SOCKS5_ADDR_TYPE_IPV6);
        assert_eq!(reply.len(), 3 + 1 + 16 + 2);
    }

    #[test]
    fn test_encode_reply_default_addr() {
        let reply = encode_reply(Socks5ReplyCode::GeneralFailure, None);
        assert_eq!(reply, vec![0x05, 0x01, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_send_success() {
        let mut buffer = Vec::new();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 9090);

        send_success(&mut buffer, Some(addr)).await.unwrap();

        assert_eq!(&buffer[..4], &[0x05, 0x00, 0x00, 0x01]);
        assert_eq!(&buffer[4..8], &[10, 0, 0, 1]);
    }

    #[tokio::test]
    async fn test_send_io_error() {
        let cases = [
            (io::ErrorKind::ConnectionRefused, 0x05),
            (io::ErrorKind::TimedOut, 0x04),
            (io::ErrorKind::PermissionDenied, 0x02),
            (io::ErrorKind::Other, 0x01),
        ];

        for (kind, expected) in cases {
            let mut buffer = Vec::new();
            send_io_error(&mut buffer, &io::Error::from(kind))
                .await
                .unwrap();
            assert_eq!(buffer[1], expected, "{:?}", kind);
        }
    }

    #[tokio::test]
    async fn test_send_command_not_supported() {
        let mut buffer = Vec::new();
        send_command_not_supported(&mut buffer).await.unwrap();
        assert_eq!(buffer[1], 0x07);
    }
}
