//! UDP ASSOCIATE command handler

use super::packet::{encode_udp_packet, parse_udp_packet, UdpPacket};
use super::relay::{Datagram, ExpectedSource, UdpRelay};
use crate::error::Socks5Error;
use crate::helper::advertised_addr;
use crate::socks::command::{send_io_error, send_success};
use crate::socks::consts::{MAX_UDP_PACKET_SIZE, UDP_MAX_OUTBOUND, UDP_OUTBOUND_IDLE_TIMEOUT};
use crate::socks::types::TargetAddr;
use crate::transport::{DatagramConn, Dialer, PacketSocket, StreamDyn};
use anyhow::{Context, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Client source to accept datagrams from, given the request's DST
///
/// A concrete DST is taken as-is, a DST without a port pins only the IP, and
/// an unspecified or domain DST falls back to the control connection's IP.
pub fn expected_source(target: &TargetAddr, control_peer: SocketAddr) -> ExpectedSource {
    match target {
        TargetAddr::Ip(addr) if !addr.ip().is_unspecified() && addr.port() != 0 => {
            ExpectedSource::Exact(*addr)
        }
        TargetAddr::Ip(addr) if !addr.ip().is_unspecified() => ExpectedSource::Ip(addr.ip()),
        _ => ExpectedSource::Ip(control_peer.ip()),
    }
}

/// Handle the UDP ASSOCIATE command
///
/// Registers an association on the shared relay, replies with the relay's
/// address and forwards datagrams until the control connection closes.
pub async fn handle_udp_associate<S>(
    mut control: S,
    target: TargetAddr,
    peer: SocketAddr,
    local: SocketAddr,
    relay: &UdpRelay,
    dialer: Arc<dyn Dialer>,
) -> Result<()>
where
    S: StreamDyn,
{
    let relay_addr = match relay.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            send_io_error(&mut control, &e).await?;
            return Err(e).context("UDP relay socket has no local address");
        }
    };

    let expected = expected_source(&target, peer);
    let (guard, mut datagrams) = relay.register(expected);

    let advertised = advertised_addr(relay_addr, local.ip());
    send_success(&mut control, Some(advertised)).await?;

    info!("SOCKS5 UDP association for {} via {}", peer, advertised);

    let mut session = Association::new(dialer, relay.socket());

    let mut byte = [0u8; 1];
    loop {
        tokio::select! {
            read = control.read(&mut byte) => match read {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("UDP control connection error: {}", e);
                    break;
                }
            },
            Some(datagram) = datagrams.recv() => session.forward(datagram).await,
            Some(done) = session.readers.join_next() => session.reap(done),
        }
    }

    drop(guard);
    drop(datagrams);
    session.readers.shutdown().await;

    debug!("UDP association for {} closed", peer);
    Ok(())
}

/// Outbound socket for one destination and the task reading its replies
struct Outbound {
    conn: Arc<dyn DatagramConn>,
    generation: u64,
    last_used: Instant,
    reader: AbortHandle,
}

struct Association {
    dialer: Arc<dyn Dialer>,
    socket: Arc<dyn PacketSocket>,
    outbound: HashMap<TargetAddr, Outbound>,
    readers: JoinSet<(TargetAddr, u64)>,
    next_generation: u64,
}

impl Association {
    fn new(dialer: Arc<dyn Dialer>, socket: Arc<dyn PacketSocket>) -> Self {
        Association {
            dialer,
            socket,
            outbound: HashMap::new(),
            readers: JoinSet::new(),
            next_generation: 0,
        }
    }

    async fn forward(&mut self, (src, raw): Datagram) {
        let packet = match parse_udp_packet(raw) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Dropping malformed datagram from {}: {}", src, e);
                return;
            }
        };

        if packet.is_fragmented() {
            debug!(
                "Dropping datagram from {}: {}",
                src,
                Socks5Error::FragmentedDatagram(packet.frag)
            );
            return;
        }

        let conn = match self.outbound.get_mut(&packet.addr) {
            Some(entry) => {
                entry.last_used = Instant::now();
                entry.conn.clone()
            }
            None => match self.dialer.connect_datagram(&packet.addr).await {
                Ok(conn) => {
                    self.open(packet.addr.clone(), conn.clone(), src);
                    conn
                }
                Err(e) => {
                    warn!("UDP dial to {} failed: {}", packet.addr, e);
                    return;
                }
            },
        };

        if let Err(e) = conn.send(&packet.data).await {
            debug!("UDP send to {} failed: {}", packet.addr, e);
        }
    }

    /// Track a new destination, evicting the least recently used one when full
    fn open(&mut self, target: TargetAddr, conn: Arc<dyn DatagramConn>, client: SocketAddr) {
        if self.outbound.len() >= UDP_MAX_OUTBOUND {
            self.evict_oldest();
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let reader = self.readers.spawn(read_replies(
            target.clone(),
            generation,
            conn.clone(),
            self.socket.clone(),
            client,
        ));

        self.outbound.insert(
            target,
            Outbound {
                conn,
                generation,
                last_used: Instant::now(),
                reader,
            },
        );
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .outbound
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(target, _)| target.clone());

        if let Some(target) = oldest {
            if let Some(entry) = self.outbound.remove(&target) {
                entry.reader.abort();
                debug!("UDP destination limit reached, closed socket to {}", target);
            }
        }
    }

    /// Forget a destination whose reader has exited
    fn reap(&mut self, done: Result<(TargetAddr, u64), JoinError>) {
        // Aborted readers were already removed by `evict_oldest`
        let Ok((target, generation)) = done else {
            return;
        };

        if self
            .outbound
            .get(&target)
            .is_some_and(|entry| entry.generation == generation)
        {
            self.outbound.remove(&target);
        }
    }
}

/// Copy replies from one destination back to the client, re-encapsulated
///
/// Returns the destination and its generation once the socket fails or has
/// been idle for [`UDP_OUTBOUND_IDLE_TIMEOUT`].
async fn read_replies(
    target: TargetAddr,
    generation: u64,
    conn: Arc<dyn DatagramConn>,
    socket: Arc<dyn PacketSocket>,
    client: SocketAddr,
) -> (TargetAddr, u64) {
    let from = match conn.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            debug!("UDP outbound socket has no peer: {}", e);
            return (target, generation);
        }
    };

    let mut buf = vec![0u8; MAX_UDP_PACKET_SIZE];
    loop {
        let n = match tokio::time::timeout(UDP_OUTBOUND_IDLE_TIMEOUT, conn.recv(&mut buf)).await {
            Ok(Ok(n)) => n,
            // ICMP unreachable surfaces on the next recv of a connected socket
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => continue,
            Ok(Err(e)) => {
                debug!("UDP receive from {} failed: {}", from, e);
                break;
            }
            Err(_) => {
                debug!("UDP socket to {} idle, closing", from);
                break;
            }
        };

        let reply = UdpPacket::new(TargetAddr::Ip(from), Bytes::copy_from_slice(&buf[..n]));
        if let Err(e) = socket.send_to(&encode_udp_packet(&reply), client).await {
            debug!("UDP reply to {} failed: {}", client, e);
        }
    }

    (target, generation)
}
