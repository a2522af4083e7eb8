//! Test utilities for socksgate integration tests
//!
//! Collaborator servers (HTTP health endpoint, TCP/UDP echo) and helpers
//! for standing up a proxy on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socksgate::{Server, ServerConfig, SocksError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

/// Bind a SOCKS5 server on `addr` and serve it in the background.
///
/// Returns the server handle (for shutdown), the bound address, and the
/// serve task.
pub async fn spawn_proxy_on(
    addr: &str,
    config: ServerConfig,
) -> (
    Arc<Server>,
    SocketAddr,
    JoinHandle<Result<(), SocksError>>,
) {
    let listener = TcpListener::bind(addr).await.unwrap();
    let bound = listener.local_addr().unwrap();
    let server = Arc::new(Server::new(config));
    let serve = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(listener).await })
    };
    (server, bound, serve)
}

/// Bind a SOCKS5 server with default configuration on the IPv4 loopback.
pub async fn spawn_proxy() -> (
    Arc<Server>,
    SocketAddr,
    JoinHandle<Result<(), SocksError>>,
) {
    spawn_proxy_on("127.0.0.1:0", ServerConfig::default()).await
}

/// An HTTP server answering every request on `/health` with "OK".
pub async fn spawn_http_health() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut conn, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let mut request = Vec::new();
                loop {
                    match conn.read(&mut buf).await {
                        Ok(0) => return,
                        Ok(n) => {
                            request.extend_from_slice(&buf[..n]);
                            if request.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                        Err(_) => return,
                    }
                }
                let _ = conn
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK",
                    )
                    .await;
                let _ = conn.shutdown().await;
            });
        }
    });
    addr
}

/// A TCP server echoing one connection's bytes back until EOF.
pub async fn spawn_tcp_echo_once() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut conn, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            while let Ok(n) = conn.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                if conn.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    });
    addr
}

/// A UDP server echoing every datagram back to its sender.
pub async fn spawn_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 65535];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    addr
}

/// The BIND collaborator: accepts one control connection, reads a
/// rendezvous address (`host:port`, `\n`-terminated), dials it, and echoes
/// bytes on that dialed connection.
pub async fn spawn_bind_collaborator() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut control, _) = listener.accept().await.unwrap();

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            control.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        let rendezvous_addr = String::from_utf8(line).unwrap();

        let mut rendezvous = TcpStream::connect(rendezvous_addr.trim()).await.unwrap();
        let mut buf = [0u8; 4096];
        while let Ok(n) = rendezvous.read(&mut buf).await {
            if n == 0 {
                break;
            }
            if rendezvous.write_all(&buf[..n]).await.is_err() {
                break;
            }
        }
    });
    addr
}

/// Poll-free pause for servers spawned just above to start accepting.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
