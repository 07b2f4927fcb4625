//! SOCKS5 authentication module
//!
//! Method negotiation plus the shipped authenticators. New methods plug in by
//! implementing [`Authenticator`] and registering in an [`AuthRegistry`].

mod none;
mod password;

pub use none::NoAuth;
pub use password::PasswordAuth;

use super::consts::*;
use crate::error::Socks5Error;
use crate::transport::StreamDyn;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// An authentication method's sub-negotiation
#[async_trait]
pub trait Authenticator: Debug + Send + Sync {
    /// Method identifier advertised in the greeting
    fn method(&self) -> u8;

    /// Run the sub-negotiation after the method has been selected
    async fn authenticate(&self, stream: &mut dyn StreamDyn) -> Result<()>;
}

/// Ordered set of authenticators offered by the server
#[derive(Debug, Clone, Default)]
pub struct AuthRegistry {
    authenticators: Vec<Arc<dyn Authenticator>>,
    prefer_server_order: bool,
}

impl AuthRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an authenticator, replacing any with the same method identifier
    pub fn register(&mut self, authenticator: Arc<dyn Authenticator>) {
        let method = authenticator.method();
        match self.authenticators.iter_mut().find(|a| a.method() == method) {
            Some(slot) => *slot = authenticator,
            None => self.authenticators.push(authenticator),
        }
    }

    /// Builder form of [`AuthRegistry::register`]
    pub fn with(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.register(authenticator);
        self
    }

    /// Pick by registration order instead of the client's advertised order
    pub fn prefer_server_order(mut self, prefer: bool) -> Self {
        self.prefer_server_order = prefer;
        self
    }

    /// Look up an authenticator by method identifier
    pub fn get(&self, method: u8) -> Option<&Arc<dyn Authenticator>> {
        self.authenticators.iter().find(|a| a.method() == method)
    }

    /// Registered method identifiers, in priority order
    pub fn methods(&self) -> Vec<u8> {
        self.authenticators.iter().map(|a| a.method()).collect()
    }

    /// Number of registered authenticators
    pub fn len(&self) -> usize {
        self.authenticators.len()
    }

    /// Whether no authenticator is registered
    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }

    /// Select the method to use for the methods a client advertised
    pub fn select(&self, offered: &[u8]) -> Option<&Arc<dyn Authenticator>> {
        if self.prefer_server_order {
            self.authenticators
                .iter()
                .find(|a| offered.contains(&a.method()))
        } else {
            offered.iter().find_map(|&method| self.get(method))
        }
    }
}

/// Perform method negotiation and the selected sub-negotiation
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
///
/// A greeting with the wrong version is rejected without any reply. When no
/// advertised method is registered the client gets `05 FF`.
///
/// Returns the negotiated method identifier.
pub async fn negotiate<S>(stream: &mut S, registry: &AuthRegistry) -> Result<u8>
where
    S: StreamDyn,
{
    let mut buf = [0u8; 2];
    stream
        .read_exact(&mut buf)
        .await
        .context("Failed to read greeting")?;

    let [version, num_methods] = buf;

    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version).into());
    }

    let mut methods = vec![0u8; num_methods as usize];
    stream
        .read_exact(&mut methods)
        .await
        .context("Failed to read authentication methods")?;

    let selected = registry.select(&methods);

    stream
        .write_all(&[
            SOCKS5_VERSION,
            selected
                .map(|a| a.method())
                .unwrap_or(SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE),
        ])
        .await?;
    stream.flush().await?;

    let authenticator = match selected {
        Some(a) => a,
        None => {
            tracing::debug!("No acceptable method among {:?}", methods);
            return Err(Socks5Error::NoAcceptableMethod.into());
        }
    };

    authenticator
        .authenticate(stream)
        .await
        .context(Socks5Error::AuthFailed)?;

    Ok(authenticator.method())
}
