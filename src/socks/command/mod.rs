//! SOCKS5 request parsing and replies

mod parser;
mod reply;

pub use parser::parse_request;
pub use reply::{
    build_reply, encode_reply, send_command_not_supported, send_io_error, send_success,
};
