//! UDP packet encoding/decoding for SOCKS5
//!
//! Handles the encapsulation format for UDP packets in SOCKS5.

use crate::error::Socks5Error;
use crate::socks::consts::*;
use crate::socks::types::TargetAddr;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Smallest possible header: RSV, FRAG, ATYP, one domain length byte, PORT
const MIN_HEADER_LEN: usize = 2 + 1 + 1 + 1 + 2;

/// UDP packet structure for SOCKS5
///
/// # UDP Request/Response Format
///
/// ```text
/// +----+------+------+----------+----------+----------+
/// |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
/// +----+------+------+----------+----------+----------+
/// | 2  |  1   |  1   | Variable |    2     | Variable |
/// +----+------+------+----------+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPacket {
    /// Fragment number (0 for standalone packets)
    pub frag: u8,
    /// Destination on the way out, source on the way back
    pub addr: TargetAddr,
    /// Packet data
    pub data: Bytes,
}

impl UdpPacket {
    /// Create an unfragmented packet
    pub fn new(addr: TargetAddr, data: Bytes) -> Self {
        UdpPacket {
            frag: 0,
            addr,
            data,
        }
    }

    /// Check if this is a fragmented packet
    pub fn is_fragmented(&self) -> bool {
        self.frag != 0
    }
}

/// Parse a client datagram
///
/// The payload is sliced out of `data` without copying.
pub fn parse_udp_packet(data: Bytes) -> Result<UdpPacket, Socks5Error> {
    if data.len() < MIN_HEADER_LEN {
        return Err(Socks5Error::DatagramTooShort(data.len()));
    }

    let mut buf = &data[..];

    let rsv = buf.get_u16();
    if rsv != 0 {
        return Err(Socks5Error::InvalidReserved(rsv));
    }

    let frag = buf.get_u8();
    let atyp = buf.get_u8();

    let addr = match atyp {
        SOCKS5_ADDR_TYPE_IPV4 => {
            ensure_len(&data, buf.remaining(), 4 + 2)?;
            let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            buf.advance(4);
            TargetAddr::ipv4(ip, buf.get_u16())
        }
        SOCKS5_ADDR_TYPE_DOMAIN => {
            let len = buf.get_u8() as usize;
            if len == 0 {
                return Err(Socks5Error::InvalidDomain("empty domain".to_string()));
            }
            ensure_len(&data, buf.remaining(), len + 2)?;
            let domain = std::str::from_utf8(&buf[..len])
                .map_err(|e| Socks5Error::InvalidDomain(e.to_string()))?
                .to_string();
            buf.advance(len);
            TargetAddr::domain(domain, buf.get_u16())
        }
        SOCKS5_ADDR_TYPE_IPV6 => {
            ensure_len(&data, buf.remaining(), 16 + 2)?;
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            TargetAddr::ipv6(Ipv6Addr::from(octets), buf.get_u16())
        }
        other => return Err(Socks5Error::AddressTypeNotSupported(other)),
    };

    let header_len = data.len() - buf.remaining();
    Ok(UdpPacket {
        frag,
        addr,
        data: data.slice(header_len..),
    })
}

fn ensure_len(data: &Bytes, remaining: usize, needed: usize) -> Result<(), Socks5Error> {
    if remaining < needed {
        Err(Socks5Error::DatagramTooShort(data.len()))
    } else {
        Ok(())
    }
}

/// Encode a packet into the wire format
pub fn encode_udp_packet(packet: &UdpPacket) -> Bytes {
    let mut buf = BytesMut::with_capacity(3 + packet.addr.encoded_len() + packet.data.len());

    buf.put_u16(0);
    buf.put_u8(packet.frag);
    packet.addr.write_to(&mut buf);
    buf.put_slice(&packet.data);

    buf.freeze()
}
