//! Server configuration types
//!
//! Defines the configuration file structures for the Socksd server.

use crate::error::SocksdError;
use crate::helper::{
    DEFAULT_BIND_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

fn default_listen() -> String {
    "127.0.0.1:1080".to_string()
}

fn default_udp_bind() -> String {
    "0.0.0.0:0".to_string()
}

fn default_bind_timeout() -> u64 {
    DEFAULT_BIND_TIMEOUT_SECS
}

fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

/// Default keepalive seconds
fn default_keepalive_secs() -> u64 {
    20
}

/// Default keepalive interval
fn default_keepalive_interval() -> u64 {
    8
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// TCP address the SOCKS5 listener binds to
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Address of the shared UDP relay socket
    #[serde(default = "default_udp_bind")]
    pub udp_bind: String,

    /// Seconds BIND waits for its inbound connection
    #[serde(default = "default_bind_timeout")]
    pub bind_timeout: u64,

    /// Seconds to wait for in-flight sessions on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Outbound connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// SOCKS5 protocol options
    #[serde(default)]
    pub socks: SocksConfig,

    /// TCP socket options
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: default_listen(),
            udp_bind: default_udp_bind(),
            bind_timeout: default_bind_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            connect_timeout: default_connect_timeout(),
            socks: SocksConfig::default(),
            tcp: TcpConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr, SocksdError> {
        parse_addr("listen", &self.listen)
    }

    /// Parsed UDP relay address
    pub fn udp_bind_addr(&self) -> Result<SocketAddr, SocksdError> {
        parse_addr("udp_bind", &self.udp_bind)
    }

    /// BIND accept timeout
    pub fn bind_timeout(&self) -> Duration {
        Duration::from_secs(self.bind_timeout)
    }

    /// Graceful shutdown deadline
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    /// Outbound connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SocksdError> {
        self.listen_addr()?;
        self.udp_bind_addr()?;
        self.socks.validate()
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, SocksdError> {
    value
        .parse()
        .map_err(|e| SocksdError::Config(format!("Invalid {} address {:?}: {}", field, value, e)))
}

/// SOCKS5 protocol configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SocksConfig {
    /// Refuse clients that do not authenticate
    #[serde(default)]
    pub auth_required: bool,

    /// Pick the method by server priority instead of the client's order
    #[serde(default)]
    pub prefer_server_order: bool,

    /// Allow BIND command
    #[serde(default = "default_true")]
    pub allow_bind: bool,

    /// Allow UDP associate command
    #[serde(default = "default_true")]
    pub allow_udp: bool,

    /// Accounts for username/password authentication
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl Default for SocksConfig {
    fn default() -> Self {
        Self {
            auth_required: false,
            prefer_server_order: false,
            allow_bind: true,
            allow_udp: true,
            users: Vec::new(),
        }
    }
}

impl SocksConfig {
    /// Check if authentication credentials are configured
    pub fn has_credentials(&self) -> bool {
        !self.users.is_empty()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SocksdError> {
        if self.auth_required && !self.has_credentials() {
            return Err(SocksdError::Config(
                "Authentication required but no users configured".to_string(),
            ));
        }

        for user in &self.users {
            if user.username.is_empty() || user.username.len() > 255 {
                return Err(SocksdError::Config(format!(
                    "Username must be 1 to 255 bytes: {:?}",
                    user.username
                )));
            }
            if user.password.is_empty() || user.password.len() > 255 {
                return Err(SocksdError::Config(format!(
                    "Password for {:?} must be 1 to 255 bytes",
                    user.username
                )));
            }
        }
        Ok(())
    }
}

/// One username/password account
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserConfig {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl std::fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserConfig")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// TCP socket configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY
    #[serde(default = "default_true")]
    pub nodelay: bool,

    /// TCP keepalive timeout in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            nodelay: true,
            keepalive_secs: default_keepalive_secs(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}
