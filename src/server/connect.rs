//! CONNECT command handler

use std::io;

use tracing::{debug, warn};

use crate::addr::Address;
use crate::config::ServerConfig;
use crate::error::{ReplyCode, SocksError};
use crate::relay::relay;
use crate::request::send_reply;
use crate::Stream;

/// Dial the target through the configured dial function, reply, and relay.
///
/// The success reply carries a zero BND address; a failed dial replies with
/// the mapped status before the error propagates.
pub(crate) async fn handle<S>(
    stream: &mut S,
    dst: &Address,
    config: &ServerConfig,
) -> Result<(), SocksError>
where
    S: Stream,
{
    let dial = (config.dial)(dst.clone());
    let target = match tokio::time::timeout(config.request_timeout, dial).await {
        Ok(Ok(target)) => target,
        Ok(Err(err)) => {
            warn!(%dst, %err, "connect failed");
            send_reply(stream, ReplyCode::from(&err), None).await?;
            return Err(err.into());
        }
        Err(_) => {
            warn!(%dst, "connect timed out");
            let err = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
            send_reply(stream, ReplyCode::from(&err), None).await?;
            return Err(err.into());
        }
    };

    send_reply(stream, ReplyCode::Succeeded, None).await?;
    debug!(%dst, "tunnel established");

    relay(stream, target).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_relays_to_target() {
        // Echo target.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(&buf).await.unwrap();
        });

        let (mut client, mut server) = duplex(1024);
        let config = ServerConfig::default();
        let dst = Address::Ip(target_addr);

        let handler = tokio::spawn(async move { handle(&mut server, &dst, &config).await });

        // Success reply with zero BND.
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x00);
        assert_eq!(&reply[4..8], &[0, 0, 0, 0]);

        client.write_all(b"hello").await.unwrap();
        let mut echoed = [0u8; 5];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello");

        drop(client);
        handler.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_maps_status() {
        let (mut client, mut server) = duplex(1024);
        let config = ServerConfig::default();
        // Reserved port with nothing listening.
        let dst = Address::new("127.0.0.1", 1).unwrap();

        let handler = tokio::spawn(async move { handle(&mut server, &dst, &config).await });

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x05); // connection refused

        assert!(handler.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_connect_timeout_maps_to_ttl_expired() {
        let (mut client, mut server) = duplex(1024);
        let config = ServerConfig::default()
            .with_request_timeout(Duration::from_millis(50))
            .with_dial(Arc::new(|_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(std::io::Error::new(std::io::ErrorKind::Other, "unreachable"))
                })
            }));
        let dst = Address::new("10.255.255.1", 80).unwrap();

        let handler = tokio::spawn(async move { handle(&mut server, &dst, &config).await });

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x06); // TTL expired

        assert!(handler.await.unwrap().is_err());
    }
}
