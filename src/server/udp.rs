//! UDP ASSOCIATE command handler
//!
//! Owns one relay socket per session. Each inbound datagram names its own
//! destination, so there is no flow table: the payload goes out on a
//! transient socket, one reply is awaited under a deadline, and the
//! response travels back to whichever peer sent the datagram. The relay
//! lives exactly as long as the control TCP connection.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::addr::Address;
use crate::config::ServerConfig;
use crate::consts::UDP_BUF_SIZE;
use crate::error::{ReplyCode, SocksError};
use crate::request::send_reply;
use crate::udp_frame::UdpFrame;
use crate::Stream;

pub(crate) async fn handle<S>(
    stream: &mut S,
    local_ip: IpAddr,
    config: &ServerConfig,
) -> Result<(), SocksError>
where
    S: Stream,
{
    // The request's DST fields only advise us of the client's UDP source;
    // any source is accepted, so they are ignored.
    let socket = match (config.listen_udp)(SocketAddr::new(local_ip, 0)).await {
        Ok(socket) => socket,
        Err(err) => {
            warn!(%err, "udp relay bind failed");
            send_reply(stream, ReplyCode::from(&err), None).await?;
            return Err(err.into());
        }
    };
    let bound = match socket.local_addr() {
        Ok(bound) => bound,
        Err(err) => {
            send_reply(stream, ReplyCode::GeneralFailure, None).await?;
            return Err(err.into());
        }
    };

    send_reply(stream, ReplyCode::Succeeded, Some(&Address::Ip(bound))).await?;
    info!(%bound, "udp relay ready");

    let watch_control = async {
        let mut buf = [0u8; 64];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => return Ok(()),
                Ok(_) => continue, // stray bytes on the control stream are ignored
                Err(err) => return Err(SocksError::Io(err)),
            }
        }
    };

    let result = tokio::select! {
        control = watch_control => {
            debug!("control connection closed; udp relay stopping");
            control
        }
        relay = run_relay(&socket, config) => relay,
    };
    // The relay socket drops here, strictly before the control stream
    // closes.
    result
}

/// Relay datagrams until the socket fails unrecoverably.
async fn run_relay(socket: &UdpSocket, config: &ServerConfig) -> Result<(), SocksError> {
    loop {
        relay_round(socket, config).await?;
    }
}

/// Receive one datagram and relay it; malformed datagrams and failed
/// round-trips are dropped, only a relay-socket read error propagates.
async fn relay_round(socket: &UdpSocket, config: &ServerConfig) -> io::Result<()> {
    let mut buf = [0u8; UDP_BUF_SIZE];
    let (n, client) = socket.recv_from(&mut buf).await?;

    let frame = match UdpFrame::parse(&buf[..n]) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(%client, %err, "dropping datagram");
            return Ok(());
        }
    };

    if let Err(err) = round_trip(socket, client, &frame, config).await {
        debug!(%client, dst = %frame.dst, %err, "udp round-trip failed");
    }
    Ok(())
}

/// Forward one payload to its destination and send the reply back.
async fn round_trip(
    socket: &UdpSocket,
    client: SocketAddr,
    frame: &UdpFrame,
    config: &ServerConfig,
) -> io::Result<()> {
    let dst = frame.dst.resolve().await?;
    let unspec = match dst {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };
    let outbound = (config.listen_udp)(unspec).await?;
    outbound.connect(dst).await?;
    outbound.send(&frame.data).await?;

    let mut resp = [0u8; UDP_BUF_SIZE];
    let n = match tokio::time::timeout(config.udp_reply_timeout, outbound.recv(&mut resp)).await {
        Ok(received) => received?,
        Err(_) => {
            debug!(%dst, "udp reply deadline elapsed");
            return Ok(());
        }
    };

    // The reply frame's DST echoes the original destination.
    let reply = UdpFrame::new(frame.dst.clone(), Bytes::copy_from_slice(&resp[..n]));
    socket.send_to(&reply.encode(), client).await?;
    Ok(())
}
