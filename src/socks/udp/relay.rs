//! Shared UDP socket demultiplexer
//!
//! One [`UdpRelay`] owns the server's UDP socket. A single dispatcher task
//! reads every datagram and routes it by source address to the session that
//! registered that source. Sessions hold an [`AssociationGuard`]; dropping it
//! removes the registration, after which datagrams from that source are
//! dropped.

use crate::helper::{is_transient_accept_error, AcceptBackoff};
use crate::socks::consts::{MAX_UDP_PACKET_SIZE, UDP_ASSOCIATION_QUEUE};
use crate::transport::PacketSocket;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

/// A datagram as delivered to its association: client source and raw bytes
pub type Datagram = (SocketAddr, Bytes);

/// Client source an association accepts datagrams from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedSource {
    /// Exactly this address
    Exact(SocketAddr),
    /// Any port on this IP; the first datagram pins the port
    Ip(IpAddr),
}

impl ExpectedSource {
    fn matches(&self, src: SocketAddr) -> bool {
        match self {
            ExpectedSource::Exact(addr) => *addr == src,
            ExpectedSource::Ip(ip) => *ip == src.ip(),
        }
    }
}

#[derive(Debug)]
struct Association {
    expected: ExpectedSource,
    tx: mpsc::Sender<Datagram>,
}

#[derive(Debug, Default)]
struct AssociationTable {
    next_id: u64,
    entries: BTreeMap<u64, Association>,
    by_source: HashMap<SocketAddr, u64>,
}

impl AssociationTable {
    fn insert(&mut self, expected: ExpectedSource, tx: mpsc::Sender<Datagram>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        if let ExpectedSource::Exact(addr) = expected {
            self.by_source.insert(addr, id);
        }
        self.entries.insert(id, Association { expected, tx });
        id
    }

    fn remove(&mut self, id: u64) {
        if let Some(assoc) = self.entries.remove(&id) {
            if let ExpectedSource::Exact(addr) = assoc.expected {
                if self.by_source.get(&addr) == Some(&id) {
                    self.by_source.remove(&addr);
                }
            }
        }
    }

    /// Find the association for `src`, pinning a pending one if needed
    ///
    /// A pending association is only pinned when it is the sole one waiting
    /// on `src`'s IP. With several candidates the owner is unknown and the
    /// datagram is dropped.
    fn route(&mut self, src: SocketAddr) -> Option<mpsc::Sender<Datagram>> {
        if let Some(id) = self.by_source.get(&src) {
            return self.entries.get(id).map(|a| a.tx.clone());
        }

        let mut pending = self.entries.iter_mut().filter(|(_, a)| {
            matches!(a.expected, ExpectedSource::Ip(_)) && a.expected.matches(src)
        });
        let (id, assoc) = pending.next()?;
        if pending.next().is_some() {
            warn!(
                "Datagram from {} matches several pending UDP associations, dropping",
                src
            );
            return None;
        }

        debug!("UDP association {} pinned to {}", id, src);
        assoc.expected = ExpectedSource::Exact(src);
        self.by_source.insert(src, *id);
        Some(assoc.tx.clone())
    }
}

#[derive(Debug)]
struct Shared {
    socket: Arc<dyn PacketSocket>,
    table: Mutex<AssociationTable>,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, AssociationTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to the shared UDP socket and its association table
///
/// The dispatcher task runs until the last handle is dropped.
#[derive(Debug)]
pub struct UdpRelay {
    shared: Arc<Shared>,
    _dispatcher: DropGuard,
}

impl UdpRelay {
    /// Take ownership of `socket` and start the dispatcher task
    pub fn start(socket: Arc<dyn PacketSocket>) -> Self {
        let shared = Arc::new(Shared {
            socket,
            table: Mutex::new(AssociationTable::default()),
        });
        let token = CancellationToken::new();

        tokio::spawn(dispatch(shared.clone(), token.clone()));

        UdpRelay {
            shared,
            _dispatcher: token.drop_guard(),
        }
    }

    /// Address of the shared socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.socket.local_addr()
    }

    /// The shared socket, for sending replies to clients
    pub fn socket(&self) -> Arc<dyn PacketSocket> {
        self.shared.socket.clone()
    }

    /// Register an association for datagrams from `expected`
    pub fn register(&self, expected: ExpectedSource) -> (AssociationGuard, mpsc::Receiver<Datagram>) {
        let (tx, rx) = mpsc::channel(UDP_ASSOCIATION_QUEUE);
        let id = self.shared.table().insert(expected, tx);

        debug!("UDP association {} registered for {:?}", id, expected);

        (
            AssociationGuard {
                shared: self.shared.clone(),
                id,
            },
            rx,
        )
    }

    /// Number of live associations
    pub fn associations(&self) -> usize {
        self.shared.table().entries.len()
    }
}

/// Keeps an association registered while alive
#[derive(Debug)]
pub struct AssociationGuard {
    shared: Arc<Shared>,
    id: u64,
}

impl Drop for AssociationGuard {
    fn drop(&mut self) {
        self.shared.table().remove(self.id);
        debug!("UDP association {} removed", self.id);
    }
}

async fn dispatch(shared: Arc<Shared>, token: CancellationToken) {
    let mut buf = vec![0u8; MAX_UDP_PACKET_SIZE];
    let mut backoff = AcceptBackoff::default();

    loop {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = shared.socket.recv_from(&mut buf) => result,
        };

        let (n, src) = match result {
            Ok(received) => {
                backoff.reset();
                received
            }
            // ICMP errors for earlier sends, reported per datagram
            Err(e) if is_icmp_error(&e) => {
                debug!("UDP relay receive error: {}", e);
                continue;
            }
            Err(e) if is_transient_accept_error(&e) => {
                let delay = backoff.next_delay();
                warn!("UDP relay receive error: {}; retrying in {:?}", e, delay);
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
            Err(e) => {
                warn!("UDP relay socket failed: {}", e);
                break;
            }
        };

        let tx = shared.table().route(src);
        let Some(tx) = tx else {
            debug!("Dropping {} byte datagram from unassociated {}", n, src);
            continue;
        };

        match tx.try_send((src, Bytes::copy_from_slice(&buf[..n]))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("UDP association queue for {} full, dropping datagram", src);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("UDP association for {} closed, dropping datagram", src);
            }
        }
    }

    debug!("UDP relay dispatcher stopped");
}

fn is_icmp_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::UdpSocket;

    #[derive(Debug)]
    struct FailingSocket {
        kind: io::ErrorKind,
        calls: AtomicUsize,
    }

    impl FailingSocket {
        fn new(kind: io::ErrorKind) -> Self {
            FailingSocket {
                kind,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PacketSocket for FailingSocket {
        async fn recv_from(&self, _buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::from(self.kind))
        }

        async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok("127.0.0.1:0".parse().unwrap())
        }
    }

    fn shared_with(socket: Arc<FailingSocket>) -> Arc<Shared> {
        Arc::new(Shared {
            socket,
            table: Mutex::new(AssociationTable::default()),
        })
    }

    async fn start_relay() -> (UdpRelay, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (UdpRelay::start(Arc::new(socket)), addr)
    }

    #[test]
    fn test_table_exact_route() {
        let mut table = AssociationTable::default();
        let (tx, _rx) = mpsc::channel(1);
        let src: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        let id = table.insert(ExpectedSource::Exact(src), tx);
        assert!(table.route(src).is_some());
        assert!(table.route("127.0.0.1:5001".parse().unwrap()).is_none());

        table.remove(id);
        assert!(table.route(src).is_none());
        assert!(table.by_source.is_empty());
    }

    #[test]
    fn test_table_pending_pins_first_port() {
        let mut table = AssociationTable::default();
        let (tx, _rx) = mpsc::channel(1);
        let first: SocketAddr = "127.0.0.1:6000".parse().unwrap();
        let second: SocketAddr = "127.0.0.1:6001".parse().unwrap();

        table.insert(ExpectedSource::Ip(first.ip()), tx);
        assert!(table.route(first).is_some());
        assert!(table.route(second).is_none());
        assert!(table.route(first).is_some());
    }

    #[test]
    fn test_table_ambiguous_pending_not_pinned() {
        let mut table = AssociationTable::default();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        let src: SocketAddr = "127.0.0.1:6500".parse().unwrap();

        let first = table.insert(ExpectedSource::Ip(src.ip()), tx1);
        let second = table.insert(ExpectedSource::Ip(src.ip()), tx2);
        assert!(table.route(src).is_none());
        assert!(table.by_source.is_empty());

        table.remove(first);
        assert!(table.route(src).is_some());
        assert_eq!(table.by_source.get(&src), Some(&second));
    }

    #[test]
    fn test_table_pinned_entry_leaves_single_candidate() {
        let mut table = AssociationTable::default();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        let a: SocketAddr = "127.0.0.1:6600".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:6601".parse().unwrap();

        table.insert(ExpectedSource::Exact(a), tx1);
        let pending = table.insert(ExpectedSource::Ip(b.ip()), tx2);

        assert!(table.route(b).is_some());
        assert_eq!(table.by_source.get(&b), Some(&pending));
    }

    #[test]
    fn test_table_remove_keeps_newer_owner() {
        let mut table = AssociationTable::default();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        let src: SocketAddr = "127.0.0.1:7000".parse().unwrap();

        let old = table.insert(ExpectedSource::Exact(src), tx1);
        let new = table.insert(ExpectedSource::Exact(src), tx2);
        table.remove(old);

        assert_eq!(table.by_source.get(&src), Some(&new));
    }

    #[tokio::test]
    async fn test_relay_delivers_to_registered_source() {
        let (relay, relay_addr) = start_relay().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let (_guard, mut rx) = relay.register(ExpectedSource::Exact(client_addr));
        client.send_to(b"ping", relay_addr).await.unwrap();

        let (src, data) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(src, client_addr);
        assert_eq!(&data[..], b"ping");
    }

    #[tokio::test]
    async fn test_relay_drops_after_guard() {
        let (relay, relay_addr) = start_relay().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let (guard, mut rx) = relay.register(ExpectedSource::Exact(client_addr));
        assert_eq!(relay.associations(), 1);
        drop(guard);
        assert_eq!(relay.associations(), 0);

        client.send_to(b"late", relay_addr).await.unwrap();

        // The sender was removed with the entry, so the channel reports closed.
        let received = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(matches!(received, Ok(None)));
    }

    #[tokio::test]
    async fn test_dispatch_stops_on_socket_failure() {
        let socket = Arc::new(FailingSocket::new(io::ErrorKind::InvalidInput));
        let shared = shared_with(socket.clone());

        tokio::time::timeout(
            Duration::from_secs(1),
            dispatch(shared, CancellationToken::new()),
        )
        .await
        .unwrap();
        assert_eq!(socket.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_backs_off_on_transient_errors() {
        let socket = Arc::new(FailingSocket::new(io::ErrorKind::Interrupted));
        let token = CancellationToken::new();
        let task = tokio::spawn(dispatch(shared_with(socket.clone()), token.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        task.await.unwrap();

        // Receives at 0, 5, 15, 35 and 75 ms
        assert_eq!(socket.calls(), 5);
    }
}
