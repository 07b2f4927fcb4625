//! Helper utilities for Socksd
//!
//! Accept-loop backoff and error classification shared by the server.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default wait for the inbound connection of a BIND request, in seconds
pub const DEFAULT_BIND_TIMEOUT_SECS: u64 = 30;

/// Default graceful shutdown deadline in seconds
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// First delay after a transient accept failure
pub const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(5);

/// Upper bound for the accept backoff
pub const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Exponential backoff state for the accept loop
///
/// Each consecutive transient failure doubles the delay, starting at
/// [`ACCEPT_BACKOFF_INITIAL`] and capped at [`ACCEPT_BACKOFF_MAX`].
/// A successful accept resets the sequence.
#[derive(Debug, Clone)]
pub struct AcceptBackoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        AcceptBackoff::new(ACCEPT_BACKOFF_INITIAL, ACCEPT_BACKOFF_MAX)
    }
}

impl AcceptBackoff {
    /// Create a backoff with custom bounds
    pub fn new(initial: Duration, max: Duration) -> Self {
        AcceptBackoff {
            initial,
            max,
            current: None,
        }
    }

    /// Delay to sleep before the next accept attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.initial,
            Some(prev) => std::cmp::min(prev * 2, self.max),
        };
        self.current = Some(delay);
        delay
    }

    /// Forget previous failures
    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Address to report to a client for a socket bound at `bound`
///
/// A wildcard bind is replaced by `local_ip`, the address the client already
/// reached the server on.
pub fn advertised_addr(bound: SocketAddr, local_ip: IpAddr) -> SocketAddr {
    if bound.ip().is_unspecified() {
        SocketAddr::new(local_ip, bound.port())
    } else {
        bound
    }
}

// Descriptor exhaustion has no stable `ErrorKind`.
#[cfg(unix)]
const ENFILE: i32 = 23;
#[cfg(unix)]
const EMFILE: i32 = 24;

/// Whether an accept error is worth retrying
///
/// Aborted handshakes, interrupted calls and descriptor exhaustion clear up on
/// their own. Anything else means the listener is unusable.
pub fn is_transient_accept_error(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        if matches!(err.raw_os_error(), Some(ENFILE) | Some(EMFILE)) {
            return true;
        }
    }

    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::OutOfMemory
    )
}
