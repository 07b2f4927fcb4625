//! SOCKS5 protocol engine
//!
//! Negotiation, request parsing and the CONNECT, BIND and UDP ASSOCIATE
//! relays. [`serve_session`] drives one accepted connection end to end.

pub mod auth;
pub mod command;
pub mod consts;
mod handler;
mod tcp_relay;
mod types;
pub mod udp;

pub use auth::{negotiate, AuthRegistry, Authenticator, NoAuth, PasswordAuth};
pub use command::{build_reply, encode_reply, parse_request};
pub use consts::*;
pub use handler::{serve_session, SessionContext};
pub use tcp_relay::{handle_bind, handle_connect, relay_tcp};
pub use types::{Request, SocksCommand, TargetAddr};
pub use udp::{handle_udp_associate, UdpRelay};
