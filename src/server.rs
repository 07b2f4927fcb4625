//! SOCKS5 server supervisor
//!
//! Owns the accept loop, spawns one task per connection and coordinates
//! graceful shutdown.

use crate::config::ServerConfig;
use crate::error::SocksdError;
use crate::helper::{is_transient_accept_error, AcceptBackoff, DEFAULT_BIND_TIMEOUT_SECS};
use crate::socks::{
    serve_session, AuthRegistry, Authenticator, NoAuth, PasswordAuth, SessionContext, UdpRelay,
};
use crate::transport::{
    Dialer, DirectTransport, PacketListen, SocketOpts, StreamListen, StreamListener,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Server construction options
///
/// Unset hooks fall back to [`DirectTransport`]; an empty authenticator list
/// falls back to [`NoAuth`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    authenticators: Vec<Arc<dyn Authenticator>>,
    prefer_server_order: bool,
    dialer: Option<Arc<dyn Dialer>>,
    listener: Option<Arc<dyn StreamListen>>,
    packet_listener: Option<Arc<dyn PacketListen>>,
    udp_bind: SocketAddr,
    bind_timeout: Duration,
    allow_bind: bool,
    allow_udp: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            authenticators: Vec::new(),
            prefer_server_order: false,
            dialer: None,
            listener: None,
            packet_listener: None,
            udp_bind: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
            bind_timeout: Duration::from_secs(DEFAULT_BIND_TIMEOUT_SECS),
            allow_bind: true,
            allow_udp: true,
        }
    }
}

impl ServerOptions {
    /// Options with every default installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from the configuration file form
    ///
    /// No-auth is offered first unless authentication is required; configured
    /// users enable username/password.
    pub fn from_config(config: &ServerConfig) -> Result<Self, SocksdError> {
        config.validate()?;

        let transport = Arc::new(
            DirectTransport::with_defaults()
                .with_socket_opts(SocketOpts::from_tcp_config(&config.tcp))
                .with_connect_timeout(config.connect_timeout()),
        );

        let mut options = ServerOptions::new()
            .with_dialer(transport.clone())
            .with_listener(transport.clone())
            .with_packet_listener(transport)
            .with_udp_bind(config.udp_bind_addr()?)
            .with_bind_timeout(config.bind_timeout())
            .with_prefer_server_order(config.socks.prefer_server_order)
            .with_allow_bind(config.socks.allow_bind)
            .with_allow_udp(config.socks.allow_udp);

        if !config.socks.auth_required {
            options = options.with_authenticator(Arc::new(NoAuth));
        }
        if config.socks.has_credentials() {
            let users = config
                .socks
                .users
                .iter()
                .map(|u| (u.username.clone(), u.password.clone()));
            options = options.with_authenticator(Arc::new(PasswordAuth::new(users)));
        }

        Ok(options)
    }

    /// Offer an authentication method; earlier registrations have priority
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    /// Pick methods by registration order instead of the client's order
    pub fn with_prefer_server_order(mut self, prefer: bool) -> Self {
        self.prefer_server_order = prefer;
        self
    }

    /// Set the outbound dial hook
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Set the BIND listen hook
    pub fn with_listener(mut self, listener: Arc<dyn StreamListen>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Set the UDP socket hook
    pub fn with_packet_listener(mut self, packet_listener: Arc<dyn PacketListen>) -> Self {
        self.packet_listener = Some(packet_listener);
        self
    }

    /// Address for the shared UDP socket
    pub fn with_udp_bind(mut self, addr: SocketAddr) -> Self {
        self.udp_bind = addr;
        self
    }

    /// How long BIND waits for its inbound connection
    pub fn with_bind_timeout(mut self, timeout: Duration) -> Self {
        self.bind_timeout = timeout;
        self
    }

    /// Enable or disable BIND
    pub fn with_allow_bind(mut self, allow: bool) -> Self {
        self.allow_bind = allow;
        self
    }

    /// Enable or disable UDP ASSOCIATE
    pub fn with_allow_udp(mut self, allow: bool) -> Self {
        self.allow_udp = allow;
        self
    }
}

/// A SOCKS5 server instance
#[derive(Debug)]
pub struct Server {
    auth: AuthRegistry,
    dialer: Arc<dyn Dialer>,
    listener: Arc<dyn StreamListen>,
    packet_listener: Arc<dyn PacketListen>,
    udp_bind: SocketAddr,
    bind_timeout: Duration,
    allow_bind: bool,
    allow_udp: bool,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Server {
    /// Create a server, installing defaults for unset options
    pub fn new(options: ServerOptions) -> Self {
        let mut auth = AuthRegistry::new().prefer_server_order(options.prefer_server_order);
        if options.authenticators.is_empty() {
            auth.register(Arc::new(NoAuth));
        }
        for authenticator in options.authenticators {
            auth.register(authenticator);
        }

        let direct = Arc::new(DirectTransport::with_defaults());
        let dialer: Arc<dyn Dialer> = match options.dialer {
            Some(dialer) => dialer,
            None => direct.clone(),
        };
        let listener: Arc<dyn StreamListen> = match options.listener {
            Some(listener) => listener,
            None => direct.clone(),
        };
        let packet_listener: Arc<dyn PacketListen> = match options.packet_listener {
            Some(packet_listener) => packet_listener,
            None => direct,
        };

        Server {
            auth,
            dialer,
            listener,
            packet_listener,
            udp_bind: options.udp_bind,
            bind_timeout: options.bind_timeout,
            allow_bind: options.allow_bind,
            allow_udp: options.allow_udp,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Bind `addr` through the listen hook and serve it
    pub async fn listen_and_serve(&self, addr: SocketAddr) -> Result<(), SocksdError> {
        let listener = self.listener.listen(addr).await?;
        self.serve(listener).await
    }

    /// Accept and serve connections until shutdown or a fatal accept error
    ///
    /// Always returns an error; [`SocksdError::ServerClosed`] after
    /// [`Server::shutdown`].
    pub async fn serve<L>(&self, listener: L) -> Result<(), SocksdError>
    where
        L: StreamListener,
    {
        if self.shutdown.is_cancelled() {
            return Err(SocksdError::ServerClosed);
        }

        let socket = self.packet_listener.listen_packet(self.udp_bind).await?;
        let udp = Arc::new(UdpRelay::start(socket));

        match (listener.local_addr(), udp.local_addr()) {
            (Ok(tcp), Ok(udp)) => info!("SOCKS5 server listening on {} (UDP relay {})", tcp, udp),
            _ => info!("SOCKS5 server started"),
        }

        let ctx = Arc::new(SessionContext {
            auth: self.auth.clone(),
            dialer: self.dialer.clone(),
            listener: self.listener.clone(),
            udp,
            bind_timeout: self.bind_timeout,
            allow_bind: self.allow_bind,
            allow_udp: self.allow_udp,
        });

        let mut backoff = AcceptBackoff::default();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(SocksdError::ServerClosed),
                result = listener.accept() => result,
            };

            match accepted {
                Ok((stream, peer)) => {
                    backoff.reset();

                    let local = match stream.local_addr() {
                        Ok(addr) => addr,
                        Err(e) => {
                            debug!("Dropping connection from {}: {}", peer, e);
                            continue;
                        }
                    };

                    debug!("Accepted connection from {}", peer);

                    let ctx = ctx.clone();
                    self.tracker.spawn(async move {
                        if let Err(e) = serve_session(stream, peer, local, &ctx).await {
                            debug!("Session from {} ended: {:#}", peer, e);
                        }
                    });
                }
                Err(e) if is_transient_accept_error(&e) => {
                    let delay = backoff.next_delay();
                    warn!("Accept error: {}; retrying in {:?}", e, delay);

                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return Err(SocksdError::ServerClosed),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    if self.shutdown.is_cancelled() {
                        return Err(SocksdError::ServerClosed);
                    }
                    error!("Accept failed: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    /// Stop accepting and wait up to `deadline` for sessions to finish
    ///
    /// Safe to call more than once; every call waits again. Sessions are never
    /// aborted.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), SocksdError> {
        if !self.shutdown.is_cancelled() {
            info!("Shutting down, {} session(s) in flight", self.tracker.len());
        }
        self.shutdown.cancel();
        self.tracker.close();

        match tokio::time::timeout(deadline, self.tracker.wait()).await {
            Ok(()) => {
                info!("Server stopped");
                Ok(())
            }
            Err(_) => Err(SocksdError::ShutdownTimeout(deadline)),
        }
    }

    /// Number of sessions currently running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Whether shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Default for Server {
    fn default() -> Self {
        Server::new(ServerOptions::default())
    }
}
