//! TCP relay for SOCKS5 CONNECT and BIND
//!
//! Opens the outbound or inbound stream through the transport hooks and
//! relays data bidirectionally until one side finishes.

use crate::error::Socks5ReplyCode;
use crate::helper::advertised_addr;
use crate::socks::command::{build_reply, send_io_error, send_success};
use crate::socks::consts::DEFAULT_BUFFER_SIZE;
use crate::socks::types::TargetAddr;
use crate::transport::{Dialer, StreamDyn, StreamListen};
use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle the CONNECT command
///
/// Dials the target, reports the outbound connection's local address in the
/// success reply and relays until either side closes. A dial failure is
/// reported with the closest reply code.
pub async fn handle_connect<S>(mut client: S, target: TargetAddr, dialer: &dyn Dialer) -> Result<()>
where
    S: StreamDyn,
{
    debug!("Connecting to target: {}", target);

    let outbound = match dialer.connect(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to connect to {}: {}", target, e);
            send_io_error(&mut client, &e).await?;
            return Err(e).with_context(|| format!("Failed to connect to {}", target));
        }
    };

    send_success(&mut client, outbound.local_addr().ok()).await?;

    info!("SOCKS5 tunnel established to {}", target);

    let (sent, received) = relay_tcp(client, outbound).await;
    debug!(
        "Tunnel to {} closed: {} bytes sent, {} bytes received",
        target, sent, received
    );

    Ok(())
}

/// Handle the BIND command
///
/// Listens on the control connection's local IP, reports the listening
/// address, waits up to `bind_timeout` for one inbound connection, reports
/// its address in a second reply and relays.
pub async fn handle_bind<S>(
    mut client: S,
    target: TargetAddr,
    local_addr: SocketAddr,
    listen: &dyn StreamListen,
    bind_timeout: Duration,
) -> Result<()>
where
    S: StreamDyn,
{
    let listener = match listen.listen(SocketAddr::new(local_addr.ip(), 0)).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("BIND listen failed: {}", e);
            send_io_error(&mut client, &e).await?;
            return Err(e).context("Failed to open BIND listener");
        }
    };

    let bound = advertised_addr(listener.local_addr()?, local_addr.ip());
    send_success(&mut client, Some(bound)).await?;

    info!("SOCKS5 BIND on {} expecting {}", bound, target);

    let (inbound, peer) = match tokio::time::timeout(bind_timeout, listener.accept()).await {
        Ok(Ok(accepted)) => accepted,
        Ok(Err(e)) => {
            send_io_error(&mut client, &e).await?;
            return Err(e).context("BIND accept failed");
        }
        Err(_) => {
            build_reply(&mut client, Socks5ReplyCode::TtlExpired, None).await?;
            bail!("No inbound connection on {} within {:?}", bound, bind_timeout);
        }
    };
    drop(listener);

    send_success(&mut client, Some(peer)).await?;

    debug!("BIND on {} accepted {}", bound, peer);

    let (sent, received) = relay_tcp(client, inbound).await;
    debug!(
        "BIND relay with {} closed: {} bytes sent, {} bytes received",
        peer, sent, received
    );

    Ok(())
}

/// Relay data bidirectionally between two streams
///
/// Each direction copies through its own fixed buffer. When one direction
/// hits EOF or an error it shuts down its write half and stops the other
/// direction. Both directions are joined before returning.
///
/// Returns the bytes copied `a -> b` and `b -> a`.
pub async fn relay_tcp<A, B>(a: A, b: B) -> (u64, u64)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);
    let done = CancellationToken::new();

    tokio::join!(
        copy_until_done(a_read, b_write, done.clone(), "A->B"),
        copy_until_done(b_read, a_write, done, "B->A"),
    )
}

async fn copy_until_done<R, W>(
    mut reader: R,
    mut writer: W,
    done: CancellationToken,
    direction: &'static str,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
    let mut copied = 0u64;

    loop {
        let n = tokio::select! {
            _ = done.cancelled() => break,
            result = reader.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!("{} read error: {}", direction, e);
                    break;
                }
            },
        };

        let written = tokio::select! {
            _ = done.cancelled() => break,
            result = writer.write_all(&buf[..n]) => result,
        };
        if let Err(e) = written {
            debug!("{} write error: {}", direction, e);
            break;
        }
        copied += n as u64;
    }

    let _ = writer.shutdown().await;
    done.cancel();

    copied
}
