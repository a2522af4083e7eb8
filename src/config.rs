//! Server configuration
//!
//! All policy flows through this type: the authenticator map, the outbound
//! dial function, the TCP/UDP listener factories, and the timeout and
//! backoff knobs. The factories are plain async closures so tests can
//! substitute in-memory or failing implementations.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, UdpSocket};

use crate::addr::Address;
use crate::auth::{Authenticator, NoAuth};

/// Boxed future returned by the socket factories.
pub type IoFuture<T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send>>;

/// Outbound TCP dial function; resolves FQDNs itself.
pub type DialFn = Arc<dyn Fn(Address) -> IoFuture<TcpStream> + Send + Sync>;

/// TCP listener factory, used by the BIND handler.
pub type ListenFn = Arc<dyn Fn(SocketAddr) -> IoFuture<TcpListener> + Send + Sync>;

/// UDP socket factory, used by the UDP ASSOCIATE handler.
pub type ListenUdpFn = Arc<dyn Fn(SocketAddr) -> IoFuture<UdpSocket> + Send + Sync>;

/// Configuration for [`Server`](crate::Server).
#[derive(Clone)]
pub struct ServerConfig {
    pub(crate) auth_methods: HashMap<u8, Arc<dyn Authenticator>>,
    pub(crate) dial: DialFn,
    pub(crate) listen: ListenFn,
    pub(crate) listen_udp: ListenUdpFn,
    pub(crate) request_timeout: Duration,
    pub(crate) udp_reply_timeout: Duration,
    pub(crate) accept_backoff_initial: Duration,
    pub(crate) accept_backoff_max: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut auth_methods: HashMap<u8, Arc<dyn Authenticator>> = HashMap::new();
        let no_auth = Arc::new(NoAuth);
        auth_methods.insert(no_auth.method(), no_auth);

        ServerConfig {
            auth_methods,
            dial: Arc::new(|addr: Address| {
                Box::pin(async move {
                    let resolved = addr.resolve().await?;
                    TcpStream::connect(resolved).await
                })
            }),
            listen: Arc::new(|addr: SocketAddr| Box::pin(TcpListener::bind(addr))),
            listen_udp: Arc::new(|addr: SocketAddr| Box::pin(UdpSocket::bind(addr))),
            request_timeout: Duration::from_secs(10),
            udp_reply_timeout: Duration::from_secs(5),
            accept_backoff_initial: Duration::from_millis(5),
            accept_backoff_max: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Create a configuration with the defaults: no-auth only, system
    /// resolver and sockets, 5 s UDP reply deadline, 5 ms–1 s accept
    /// backoff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticator under its method byte.
    pub fn with_auth(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.auth_methods
            .insert(authenticator.method(), authenticator);
        self
    }

    /// Replace the whole authenticator map.
    pub fn with_auth_methods(mut self, methods: HashMap<u8, Arc<dyn Authenticator>>) -> Self {
        self.auth_methods = methods;
        self
    }

    /// Override the outbound TCP dial function.
    pub fn with_dial(mut self, dial: DialFn) -> Self {
        self.dial = dial;
        self
    }

    /// Override the TCP listener factory used by BIND.
    pub fn with_listen(mut self, listen: ListenFn) -> Self {
        self.listen = listen;
        self
    }

    /// Override the UDP socket factory used by UDP ASSOCIATE.
    pub fn with_listen_udp(mut self, listen_udp: ListenUdpFn) -> Self {
        self.listen_udp = listen_udp;
        self
    }

    /// Deadline for the outbound CONNECT dial.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Deadline for one UDP request/response round-trip.
    pub fn with_udp_reply_timeout(mut self, timeout: Duration) -> Self {
        self.udp_reply_timeout = timeout;
        self
    }

    /// Tune the accept-loop backoff on temporary errors.
    pub fn with_accept_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.accept_backoff_initial = initial;
        self.accept_backoff_max = max;
        self
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<u8> = self.auth_methods.keys().copied().collect();
        methods.sort_unstable();
        f.debug_struct("ServerConfig")
            .field("auth_methods", &methods)
            .field("request_timeout", &self.request_timeout)
            .field("udp_reply_timeout", &self.udp_reply_timeout)
            .field("accept_backoff_initial", &self.accept_backoff_initial)
            .field("accept_backoff_max", &self.accept_backoff_max)
            .finish()
    }
}
