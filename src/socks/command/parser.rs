//! SOCKS5 request parser
//!
//! Reads the request that follows a successful authentication.

use crate::error::Socks5Error;
use crate::socks::consts::*;
use crate::socks::types::{Request, SocksCommand, TargetAddr};
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Parse a SOCKS5 request from the stream
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// The whole request is consumed before the command is checked, so an
/// unknown command still leaves the stream at a message boundary.
pub async fn parse_request<S>(stream: &mut S) -> Result<Request, Socks5Error>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    let [version, cmd_byte, _reserved, addr_type] = header;

    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }

    let target = read_address(stream, addr_type).await?;

    let command =
        SocksCommand::from_byte(cmd_byte).ok_or(Socks5Error::CommandNotSupported(cmd_byte))?;

    tracing::debug!("Parsed SOCKS5 request: {} {}", command, target);

    Ok(Request { command, target })
}

/// Read `DST.ADDR DST.PORT` for the given address type
async fn read_address<S>(stream: &mut S, addr_type: u8) -> Result<TargetAddr, Socks5Error>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let target = match addr_type {
        SOCKS5_ADDR_TYPE_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            let port = stream.read_u16().await?;
            TargetAddr::ipv4(Ipv4Addr::from(addr), port)
        }

        SOCKS5_ADDR_TYPE_DOMAIN => {
            let domain_len = stream.read_u8().await? as usize;
            let mut domain = vec![0u8; domain_len];
            stream.read_exact(&mut domain).await?;
            let port = stream.read_u16().await?;

            if domain_len == 0 {
                return Err(Socks5Error::InvalidDomain(String::new()));
            }
            let domain = String::from_utf8(domain).map_err(|e| {
                Socks5Error::InvalidDomain(String::from_utf8_lossy(e.as_bytes()).into_owned())
            })?;

            TargetAddr::Domain(domain, port)
        }

        SOCKS5_ADDR_TYPE_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            let port = stream.read_u16().await?;
            TargetAddr::ipv6(Ipv6Addr::from(addr), port)
        }

        other => return Err(Socks5Error::AddressTypeNotSupported(other)),
    };

    Ok(target)
}
