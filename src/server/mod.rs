//! SOCKS5 server: accept loop and per-session driver
//!
//! [`Server::serve`] accepts connections and spawns one task per session;
//! each session runs authentication, request decoding, and then one of the
//! CONNECT / BIND / UDP ASSOCIATE handlers. Shutdown cancels the accept
//! loop and drains in-flight sessions under a caller-supplied deadline.

mod bind;
mod connect;
mod udp;

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth;
use crate::config::ServerConfig;
use crate::error::SocksError;
use crate::request::{read_request, send_reply, Command};
use crate::Stream;

/// A SOCKS5 proxy server.
///
/// The configuration is read-only after construction; every accepted
/// session owns its sockets exclusively.
pub struct Server {
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
    sessions: Mutex<Option<mpsc::Sender<()>>>,
    drained: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Server {
    /// Create a server from its configuration.
    pub fn new(config: ServerConfig) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Server {
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
            sessions: Mutex::new(Some(tx)),
            drained: Mutex::new(Some(rx)),
        }
    }

    /// Bind `addr` and serve until a fatal error or shutdown.
    pub async fn listen_and_serve<A>(&self, addr: A) -> Result<(), SocksError>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an existing listener.
    ///
    /// Temporary accept errors back off from
    /// [`accept_backoff_initial`](ServerConfig::with_accept_backoff),
    /// doubling up to the cap and resetting on success. Returns
    /// [`SocksError::ServerClosed`] after a requested shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), SocksError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "socks5 server listening");
        }

        let mut backoff = Duration::ZERO;
        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => return Err(SocksError::ServerClosed),
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) if is_temporary(&err) => {
                        backoff = if backoff.is_zero() {
                            self.config.accept_backoff_initial
                        } else {
                            (backoff * 2).min(self.config.accept_backoff_max)
                        };
                        warn!(%err, ?backoff, "temporary accept error; retrying");
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                },
            };
            backoff = Duration::ZERO;

            let guard = match self.sessions.lock().await.as_ref() {
                Some(tx) => tx.clone(),
                None => return Err(SocksError::ServerClosed),
            };
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                // Held for the session's lifetime; shutdown waits for the
                // channel to close.
                let _guard = guard;
                let local_ip = stream
                    .local_addr()
                    .map(|a| a.ip())
                    .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
                match serve_session(stream, peer, local_ip, config).await {
                    Ok(()) => debug!(%peer, "session finished"),
                    Err(err) => debug!(%peer, %err, "session ended with error"),
                }
            });
        }
    }

    /// Request shutdown and wait for in-flight sessions to drain.
    ///
    /// The accept loop stops immediately; sessions keep running until they
    /// finish on their own or `timeout` elapses, in which case
    /// [`SocksError::ShutdownTimeout`] is returned. Subsequent calls return
    /// immediately.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), SocksError> {
        self.shutdown.cancel();
        // Drop our sender half; the channel closes once the last session
        // task drops its clone.
        self.sessions.lock().await.take();

        let rx = self.drained.lock().await.take();
        match rx {
            Some(mut rx) => match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(_) => Ok(()),
                Err(_) => Err(SocksError::ShutdownTimeout),
            },
            None => Ok(()),
        }
    }
}

/// Whether an accept error is worth a backoff-and-retry rather than
/// tearing the server down.
pub(crate) fn is_temporary(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Drive one session: authentication, request decode, command dispatch.
///
/// Decode failures that still allow a meaningful reply get one (bad RSV,
/// bad ATYP, unknown command); fatal failures (wrong version, truncated
/// reads) close silently. Handlers own their replies after dispatch.
pub(crate) async fn serve_session<S>(
    mut stream: S,
    peer: SocketAddr,
    local_ip: IpAddr,
    config: Arc<ServerConfig>,
) -> Result<(), SocksError>
where
    S: Stream,
{
    auth::negotiate(&mut stream, &config.auth_methods).await?;

    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(err) => {
            if let Some(code) = err.decode_reply_code() {
                let _ = send_reply(&mut stream, code, None).await;
            }
            return Err(err);
        }
    };

    info!(%peer, command = %request.command, dst = %request.dst, "request accepted");

    match request.command {
        Command::Connect => connect::handle(&mut stream, &request.dst, &config).await,
        Command::Bind => bind::handle(&mut stream, local_ip, &config).await,
        Command::UdpAssociate => udp::handle(&mut stream, local_ip, &config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn test_peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_is_temporary() {
        assert!(is_temporary(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
        assert!(is_temporary(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_temporary(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
        assert!(!is_temporary(&io::Error::from(io::ErrorKind::NotFound)));
    }

    #[tokio::test]
    async fn test_session_unknown_command_gets_reply() {
        let (mut client, server) = duplex(1024);
        let config = Arc::new(ServerConfig::default());

        let session = tokio::spawn(serve_session(server, test_peer(), localhost(), config));

        client
            .write_all(&[SOCKS_VERSION, 1, METHOD_NO_AUTH])
            .await
            .unwrap();
        let mut resp = [0u8; 2];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp, [SOCKS_VERSION, METHOD_NO_AUTH]);

        // CMD 0x09 with a well-formed IPv4 address.
        client
            .write_all(&[SOCKS_VERSION, 0x09, RESERVED, ATYP_IPV4, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[0], SOCKS_VERSION);
        assert_eq!(reply[1], 0x07); // command not supported

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, SocksError::CommandNotSupported(0x09)));
    }

    #[tokio::test]
    async fn test_session_unknown_atyp_gets_reply() {
        let (mut client, server) = duplex(1024);
        let config = Arc::new(ServerConfig::default());

        let session = tokio::spawn(serve_session(server, test_peer(), localhost(), config));

        client
            .write_all(&[SOCKS_VERSION, 1, METHOD_NO_AUTH])
            .await
            .unwrap();
        let mut resp = [0u8; 2];
        client.read_exact(&mut resp).await.unwrap();

        client
            .write_all(&[SOCKS_VERSION, 0x01, RESERVED, 0x7F])
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x08); // address type not supported

        assert!(session.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_session_nonzero_rsv_gets_general_failure() {
        let (mut client, server) = duplex(1024);
        let config = Arc::new(ServerConfig::default());

        let session = tokio::spawn(serve_session(server, test_peer(), localhost(), config));

        client
            .write_all(&[SOCKS_VERSION, 1, METHOD_NO_AUTH])
            .await
            .unwrap();
        let mut resp = [0u8; 2];
        client.read_exact(&mut resp).await.unwrap();

        client
            .write_all(&[SOCKS_VERSION, 0x01, 0x01, ATYP_IPV4, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x01); // general failure

        assert!(session.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_session_bad_version_closes_silently() {
        let (mut client, server) = duplex(1024);
        let config = Arc::new(ServerConfig::default());

        let session = tokio::spawn(serve_session(server, test_peer(), localhost(), config));

        client.write_all(&[0x04, 1, METHOD_NO_AUTH]).await.unwrap();

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, SocksError::UnsupportedVersion(4)));

        // Nothing was written back.
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_without_sessions_is_immediate() {
        let server = Server::new(ServerConfig::default());
        server.shutdown(Duration::from_secs(1)).await.unwrap();
        // Second call is a no-op.
        server.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_returns_server_closed_after_shutdown() {
        let server = Arc::new(Server::new(ServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let serve_handle = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(listener).await })
        };

        tokio::task::yield_now().await;
        server.shutdown(Duration::from_secs(1)).await.unwrap();

        let err = serve_handle.await.unwrap().unwrap_err();
        assert!(matches!(err, SocksError::ServerClosed));
    }
}
