//! No-authentication method (0x00)

use super::Authenticator;
use crate::socks::consts::SOCKS5_AUTH_METHOD_NONE;
use crate::transport::StreamDyn;
use anyhow::Result;
use async_trait::async_trait;

/// Accepts every client without a sub-negotiation
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    fn method(&self) -> u8 {
        SOCKS5_AUTH_METHOD_NONE
    }

    async fn authenticate(&self, _stream: &mut dyn StreamDyn) -> Result<()> {
        Ok(())
    }
}
