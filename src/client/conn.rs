//! Client-side proxied connection
//!
//! [`ProxyConn`] carries the TCP stream to the proxy and, for
//! UDP ASSOCIATE, the UDP socket pointed at the relay. Reads and writes on
//! a UDP-mode connection transparently strip and add the SOCKS5 frame
//! header; closing the connection closes both sockets.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};

use crate::addr::Address;
use crate::consts::UDP_BUF_SIZE;
use crate::error::{ReplyCode, SocksError};
use crate::request::read_reply;
use crate::udp_frame::UdpFrame;

/// A connection opened through a SOCKS5 proxy.
///
/// For CONNECT the stream passes bytes through verbatim. For BIND,
/// [`bound_addr`](Self::bound_addr) exposes the rendezvous address and
/// [`accept_peer`](Self::accept_peer) waits for the phase-2 reply. For
/// UDP ASSOCIATE, writes are wrapped into relay frames addressed to the
/// dial target and reads strip the frame header.
#[derive(Debug)]
pub struct ProxyConn {
    stream: TcpStream,
    udp: Option<UdpRelay>,
    bound: Option<Address>,
}

#[derive(Debug)]
struct UdpRelay {
    socket: UdpSocket,
    target: Address,
    // Tail of the last datagram the caller's read buffer could not hold.
    pending: Bytes,
}

impl ProxyConn {
    pub(crate) fn tcp(stream: TcpStream) -> Self {
        ProxyConn {
            stream,
            udp: None,
            bound: None,
        }
    }

    pub(crate) fn bind(stream: TcpStream, bound: Address) -> Self {
        ProxyConn {
            stream,
            udp: None,
            bound: Some(bound),
        }
    }

    pub(crate) fn udp(stream: TcpStream, socket: UdpSocket, target: Address) -> Self {
        ProxyConn {
            stream,
            udp: Some(UdpRelay {
                socket,
                target,
                pending: Bytes::new(),
            }),
            bound: None,
        }
    }

    /// The address the proxy bound for a BIND request; advertise it to the
    /// peer out-of-band.
    pub fn bound_addr(&self) -> Option<&Address> {
        self.bound.as_ref()
    }

    /// Wait for the BIND phase-2 reply and return the connected peer's
    /// address. After this resolves, reads and writes reach the peer.
    pub async fn accept_peer(&mut self) -> Result<Address, SocksError> {
        let (code, peer) = read_reply(&mut self.stream).await?;
        if code != ReplyCode::Succeeded {
            return Err(SocksError::Reply(code));
        }
        Ok(peer)
    }
}

impl AsyncRead for ProxyConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match &mut this.udp {
            Some(udp) => {
                // Drain the tail of the previous datagram before reading a
                // new one off the wire.
                if !udp.pending.is_empty() {
                    let n = udp.pending.len().min(buf.remaining());
                    buf.put_slice(&udp.pending[..n]);
                    udp.pending = udp.pending.slice(n..);
                    return Poll::Ready(Ok(()));
                }
                let mut raw = [0u8; UDP_BUF_SIZE];
                let mut datagram = ReadBuf::new(&mut raw);
                match udp.socket.poll_recv(cx, &mut datagram) {
                    Poll::Ready(Ok(())) => {
                        let frame = UdpFrame::parse(datagram.filled()).map_err(|err| {
                            io::Error::new(io::ErrorKind::InvalidData, err.to_string())
                        })?;
                        let n = frame.data.len().min(buf.remaining());
                        buf.put_slice(&frame.data[..n]);
                        udp.pending = frame.data.slice(n..);
                        Poll::Ready(Ok(()))
                    }
                    Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
                    Poll::Pending => Poll::Pending,
                }
            }
            None => Pin::new(&mut this.stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ProxyConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match &this.udp {
            Some(udp) => {
                let frame = UdpFrame::new(udp.target.clone(), Bytes::copy_from_slice(buf));
                match udp.socket.poll_send(cx, &frame.encode()) {
                    Poll::Ready(Ok(_)) => Poll::Ready(Ok(buf.len())),
                    Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
                    Poll::Pending => Poll::Pending,
                }
            }
            None => Pin::new(&mut this.stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.udp {
            Some(_) => Poll::Ready(Ok(())),
            None => Pin::new(&mut this.stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Shutting down the control stream ends the association; the UDP
        // socket goes with the connection on drop.
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dialed, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (dialed.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_tcp_mode_passes_bytes_through() {
        let (near, mut far) = tcp_pair().await;
        let mut conn = ProxyConn::tcp(near);

        conn.write_all(b"request").await.unwrap();
        let mut buf = [0u8; 7];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"request");

        far.write_all(b"response").await.unwrap();
        let mut buf = [0u8; 8];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"response");

        assert!(conn.bound_addr().is_none());
    }

    #[tokio::test]
    async fn test_udp_mode_wraps_and_strips_frames() {
        let (near, _far) = tcp_pair().await;

        // Stand-in relay: parses the frame and echoes one back.
        let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = relay.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; UDP_BUF_SIZE];
            let (n, from) = relay.recv_from(&mut buf).await.unwrap();
            let frame = UdpFrame::parse(&buf[..n]).unwrap();
            assert_eq!(frame.dst.to_string(), "10.1.2.3:9000");
            assert_eq!(frame.data.as_ref(), b"OK");
            let reply = UdpFrame::new(frame.dst, Bytes::from_static(b"KO"));
            relay.send_to(&reply.encode(), from).await.unwrap();
        });

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(relay_addr).await.unwrap();
        let target = Address::new("10.1.2.3", 9000).unwrap();
        let mut conn = ProxyConn::udp(near, socket, target);

        conn.write_all(b"OK").await.unwrap();

        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"KO");
    }

    #[tokio::test]
    async fn test_udp_mode_resumes_oversized_payload() {
        let (near, _far) = tcp_pair().await;

        // Stand-in relay answering with a payload larger than the caller's
        // read buffer.
        let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = relay.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; UDP_BUF_SIZE];
            let (n, from) = relay.recv_from(&mut buf).await.unwrap();
            let frame = UdpFrame::parse(&buf[..n]).unwrap();
            let reply = UdpFrame::new(frame.dst, Bytes::from_static(b"0123456789"));
            relay.send_to(&reply.encode(), from).await.unwrap();
        });

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(relay_addr).await.unwrap();
        let target = Address::new("10.1.2.3", 9000).unwrap();
        let mut conn = ProxyConn::udp(near, socket, target);

        conn.write_all(b"go").await.unwrap();

        // A 4-byte buffer forces the 10-byte payload across three reads;
        // the tail must survive between polls instead of being dropped.
        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        while out.len() < 10 {
            let n = conn.read(&mut buf).await.unwrap();
            assert!(n > 0);
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"0123456789");
    }

    #[tokio::test]
    async fn test_bind_mode_accept_peer() {
        let (near, mut far) = tcp_pair().await;
        let bound = Address::new("127.0.0.1", 5001).unwrap();
        let mut conn = ProxyConn::bind(near, bound.clone());

        assert_eq!(conn.bound_addr(), Some(&bound));

        // The "proxy" sends the phase-2 reply.
        let peer = Address::new("127.0.0.1", 6001).unwrap();
        let reply_task = tokio::spawn(async move {
            crate::request::send_reply(&mut far, ReplyCode::Succeeded, Some(&peer))
                .await
                .unwrap();
            far
        });

        let announced = conn.accept_peer().await.unwrap();
        assert_eq!(announced.to_string(), "127.0.0.1:6001");
        reply_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_mode_accept_peer_failure_status() {
        let (near, mut far) = tcp_pair().await;
        let mut conn = ProxyConn::bind(near, Address::new("127.0.0.1", 5001).unwrap());

        tokio::spawn(async move {
            crate::request::send_reply(&mut far, ReplyCode::GeneralFailure, None)
                .await
                .unwrap();
            // Keep the stream open long enough for the client to read.
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        });

        let err = conn.accept_peer().await.unwrap_err();
        assert!(matches!(
            err,
            SocksError::Reply(ReplyCode::GeneralFailure)
        ));
    }
}
