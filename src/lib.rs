//! # socksgate - SOCKS5 proxy server and client dialer
//!
//! socksgate implements both sides of SOCKS version 5 (RFC 1928) with
//! username/password authentication (RFC 1929): a server that accepts
//! client sessions and relays them to upstream targets, and a dialer that
//! opens proxied connections through any standards-compliant server.
//!
//! ## Features
//!
//! - **All three commands**: CONNECT tunnels, two-phase BIND rendezvous,
//!   and UDP ASSOCIATE with per-datagram framing
//! - **Pluggable authentication**: a read-only map from method byte to
//!   authenticator; no-auth and username/password ship in the box
//! - **Injected socket factories**: dial, listen, and UDP bind are plain
//!   async closures, so tests and embedders can substitute their own
//! - **Graceful shutdown**: the accept loop stops immediately while
//!   in-flight sessions drain under a caller-supplied deadline
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socksgate::{Command, Dialer, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), socksgate::SocksError> {
//!     let server = Server::new(ServerConfig::default());
//!     tokio::spawn(async move { server.listen_and_serve("127.0.0.1:1080").await });
//!
//!     let dialer = Dialer::new(Command::Connect, "127.0.0.1:1080");
//!     let conn = dialer.dial("example.com:80").await?;
//!     // conn implements AsyncRead + AsyncWrite
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod addr;
pub mod auth;
pub mod client;
pub mod config;
pub mod consts;
pub mod error;
pub mod relay;
pub mod request;
pub mod server;
pub mod udp_frame;

pub use addr::Address;
pub use auth::{
    Authenticator, ClientAuthenticator, NoAuth, NoAuthClient, PasswordAuth, PasswordClientAuth,
};
pub use client::{Dialer, ProxyConn, SocksListener};
pub use config::ServerConfig;
pub use error::{ReplyCode, SocksError};
pub use request::Command;
pub use server::Server;
pub use udp_frame::UdpFrame;

use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional async byte channel, as handed to authenticators.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized> Stream for T {}

/// Version of the socksgate library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the crate
pub const NAME: &str = env!("CARGO_PKG_NAME");
