//! SOCKS5 client dialer
//!
//! [`Dialer`] opens proxied connections through a SOCKS5 server: it runs
//! the client side of the method negotiation, sends the request for its
//! configured command, and hands back a [`ProxyConn`] ready to relay.

mod conn;

pub use conn::ProxyConn;

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::debug;

use crate::addr::{split_host_port, Address};
use crate::auth::{self, ClientAuthenticator, NoAuthClient};
use crate::consts::{RESERVED, SOCKS_VERSION};
use crate::error::{ReplyCode, SocksError};
use crate::request::{read_reply, Command};

/// A dialer holding SOCKS-specific options.
///
/// The command is fixed at construction; the `Command` enum restricts it
/// to CONNECT, BIND, and UDP ASSOCIATE. The default authenticator set
/// offers only "no authentication required".
#[derive(Clone)]
pub struct Dialer {
    command: Command,
    proxy_addr: String,
    auth: Vec<Arc<dyn ClientAuthenticator>>,
}

impl Dialer {
    /// Create a dialer for `command` through the proxy at `proxy_addr`.
    pub fn new(command: Command, proxy_addr: impl Into<String>) -> Self {
        Dialer {
            command,
            proxy_addr: proxy_addr.into(),
            auth: vec![Arc::new(NoAuthClient)],
        }
    }

    /// Offer an additional authentication method.
    pub fn with_auth(mut self, authenticator: Arc<dyn ClientAuthenticator>) -> Self {
        self.auth.push(authenticator);
        self
    }

    /// Replace the offered authentication methods.
    pub fn with_auth_methods(mut self, auths: Vec<Arc<dyn ClientAuthenticator>>) -> Self {
        self.auth = auths;
        self
    }

    /// Open a proxied connection to `target` (`host:port`).
    pub async fn dial(&self, target: &str) -> Result<ProxyConn, SocksError> {
        self.handshake(target).await
    }

    /// Like [`dial`](Self::dial), bounded by a deadline covering the whole
    /// handshake.
    pub async fn dial_timeout(
        &self,
        target: &str,
        timeout: Duration,
    ) -> Result<ProxyConn, SocksError> {
        match tokio::time::timeout(timeout, self.handshake(target)).await {
            Ok(result) => result,
            Err(_) => Err(SocksError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "socks handshake timed out",
            ))),
        }
    }

    /// Wrap a local listener for BIND workflows: each `accept` first dials
    /// the listener's own address through the proxy, so the proxied leg
    /// triggers the inbound connection being accepted.
    pub async fn listen(&self, local_addr: &str) -> Result<SocksListener, SocksError> {
        let inner = TcpListener::bind(local_addr).await?;
        Ok(SocksListener {
            inner,
            dialer: self.clone(),
        })
    }

    async fn handshake(&self, target: &str) -> Result<ProxyConn, SocksError> {
        let (host, port) = split_host_port(target)?;
        let target_addr = Address::new(host, port)?;

        let mut stream = TcpStream::connect(&self.proxy_addr).await?;
        auth::client_negotiate(&mut stream, &self.auth).await?;

        // Request header and address in one write.
        let mut msg = BytesMut::with_capacity(3 + target_addr.serialized_len());
        msg.extend_from_slice(&[SOCKS_VERSION, self.command as u8, RESERVED]);
        target_addr.write_to_buf(&mut msg);
        stream.write_all(&msg).await?;
        stream.flush().await?;

        let (code, bnd) = read_reply(&mut stream).await?;
        if code != ReplyCode::Succeeded {
            return Err(SocksError::Reply(code));
        }
        debug!(command = %self.command, %target_addr, %bnd, "proxy accepted request");

        match self.command {
            Command::Connect => Ok(ProxyConn::tcp(stream)),
            Command::Bind => Ok(ProxyConn::bind(stream, bnd)),
            Command::UdpAssociate => {
                let relay = self.relay_addr(&bnd).await?;
                let unspec = match relay {
                    SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                    SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
                };
                let socket = UdpSocket::bind(unspec).await?;
                socket.connect(relay).await?;
                Ok(ProxyConn::udp(stream, socket, target_addr))
            }
        }
    }

    /// Concrete relay address from the reply's BND fields, substituting
    /// the proxy host when the server reports an unspecified address.
    async fn relay_addr(&self, bnd: &Address) -> Result<SocketAddr, SocksError> {
        let addr = bnd.resolve().await?;
        if !addr.ip().is_unspecified() {
            return Ok(addr);
        }
        let (proxy_host, _) = split_host_port(&self.proxy_addr)?;
        let substituted = Address::new(proxy_host, addr.port())?.resolve().await?;
        Ok(substituted)
    }
}

/// A local listener whose `accept` dials through the SOCKS server first.
pub struct SocksListener {
    inner: TcpListener,
    dialer: Dialer,
}

impl SocksListener {
    /// The local address of the wrapped listener.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Dial the listener's address through the proxy, then accept the
    /// connection that arrives.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), SocksError> {
        let addr = self.inner.local_addr()?;
        let conn = self.dialer.dial(&addr.to_string()).await?;
        drop(conn);
        Ok(self.inner.accept().await?)
    }
}
