//! Main SOCKS5 handler
//!
//! Runs one accepted connection through authentication, request parsing and
//! command dispatch.

use crate::socks::auth::{negotiate, AuthRegistry};
use crate::socks::command::{build_reply, parse_request, send_command_not_supported};
use crate::socks::tcp_relay::{handle_bind, handle_connect};
use crate::socks::types::SocksCommand;
use crate::socks::udp::{handle_udp_associate, UdpRelay};
use crate::transport::{Dialer, StreamDyn, StreamListen};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything a session needs from the server, shared by all sessions of one
/// `serve` call
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Authentication methods offered to clients
    pub auth: AuthRegistry,
    /// Outbound hook for CONNECT and UDP sends
    pub dialer: Arc<dyn Dialer>,
    /// Listen hook for BIND
    pub listener: Arc<dyn StreamListen>,
    /// Shared UDP relay
    pub udp: Arc<UdpRelay>,
    /// How long BIND waits for its inbound connection
    pub bind_timeout: Duration,
    /// Whether BIND is served
    pub allow_bind: bool,
    /// Whether UDP ASSOCIATE is served
    pub allow_udp: bool,
}

/// Handle SOCKS5 protocol on an accepted connection
///
/// # Protocol Flow
///
/// 1. Method negotiation and sub-negotiation
/// 2. Request parsing
/// 3. Command execution (CONNECT, BIND, or UDP ASSOCIATE)
///
/// A malformed request is answered with the matching reply code before the
/// error is returned.
pub async fn serve_session<S>(
    mut stream: S,
    peer: SocketAddr,
    local: SocketAddr,
    ctx: &SessionContext,
) -> Result<()>
where
    S: StreamDyn,
{
    let method = negotiate(&mut stream, &ctx.auth)
        .await
        .context("Authentication negotiation failed")?;

    debug!("Client {} authenticated with method {:#04x}", peer, method);

    let request = match parse_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            if let Some(code) = e.reply_code() {
                build_reply(&mut stream, code, None).await?;
            }
            return Err(e).context("Failed to parse SOCKS5 request");
        }
    };

    info!("SOCKS5 {} request from {}", request, peer);

    match request.command {
        SocksCommand::Connect => {
            handle_connect(stream, request.target, ctx.dialer.as_ref()).await?;
        }
        SocksCommand::Bind => {
            if ctx.allow_bind {
                handle_bind(
                    stream,
                    request.target,
                    local,
                    ctx.listener.as_ref(),
                    ctx.bind_timeout,
                )
                .await?;
            } else {
                warn!("BIND not allowed by configuration");
                send_command_not_supported(&mut stream).await?;
            }
        }
        SocksCommand::UdpAssociate => {
            if ctx.allow_udp {
                handle_udp_associate(
                    stream,
                    request.target,
                    peer,
                    local,
                    &ctx.udp,
                    ctx.dialer.clone(),
                )
                .await?;
            } else {
                warn!("UDP ASSOCIATE not allowed by configuration");
                send_command_not_supported(&mut stream).await?;
            }
        }
    }

    Ok(())
}
