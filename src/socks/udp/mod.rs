//! UDP ASSOCIATE module for SOCKS5
//!
//! Handles UDP ASSOCIATE requests by relaying datagrams through the server's
//! shared UDP socket.

mod associate;
mod packet;
mod relay;

pub use associate::{expected_source, handle_udp_associate};
pub use packet::{encode_udp_packet, parse_udp_packet, UdpPacket};
pub use relay::{AssociationGuard, Datagram, ExpectedSource, UdpRelay};
