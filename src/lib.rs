//! # Socksd - SOCKS5 Proxy Server
//!
//! Socksd is a SOCKS5 (RFC 1928) proxy server with username/password
//! authentication (RFC 1929). It serves CONNECT, BIND and UDP ASSOCIATE.
//!
//! ## Features
//!
//! - **Pluggable authentication**: no-auth and username/password ship by
//!   default; more methods register through [`socks::Authenticator`]
//! - **Injectable networking**: outbound dials, BIND listeners and the UDP
//!   socket all go through the hooks in [`transport`]
//! - **Shared UDP relay**: one UDP socket serves every association
//! - **Graceful shutdown**: stop accepting, then wait for in-flight sessions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socksd::{Server, ServerOptions};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = std::sync::Arc::new(Server::new(ServerOptions::new()));
//!
//!     let addr = "127.0.0.1:1080".parse()?;
//!     let serving = server.clone();
//!     tokio::spawn(async move { serving.listen_and_serve(addr).await });
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown(Duration::from_secs(10)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! accept -> negotiate -> parse request -> CONNECT | BIND | UDP ASSOCIATE -> relay
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod helper;
pub mod server;
pub mod socks;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{Socks5Error, Socks5ReplyCode, SocksdError};
pub use server::{Server, ServerOptions};

/// Version of the Socksd library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "socksd");
    }
}
