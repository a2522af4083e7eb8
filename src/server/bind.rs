//! BIND command handler
//!
//! Two-phase rendezvous: bind a listener and announce it, accept exactly
//! one inbound connection and announce the peer, then relay. The FTP
//! active-mode primitive: the client learns the rendezvous address from
//! phase 1 and passes it to its peer out-of-band.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::addr::Address;
use crate::config::ServerConfig;
use crate::error::{ReplyCode, SocksError};
use crate::relay::relay;
use crate::request::send_reply;
use crate::server::is_temporary;
use crate::Stream;

pub(crate) async fn handle<S>(
    stream: &mut S,
    local_ip: IpAddr,
    config: &ServerConfig,
) -> Result<(), SocksError>
where
    S: Stream,
{
    // Bind on the control connection's interface with an OS-assigned port.
    let listener = match (config.listen)(SocketAddr::new(local_ip, 0)).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!(%err, "bind listener failed");
            send_reply(stream, ReplyCode::from(&err), None).await?;
            return Err(err.into());
        }
    };
    let bound = match listener.local_addr() {
        Ok(bound) => bound,
        Err(err) => {
            send_reply(stream, ReplyCode::GeneralFailure, None).await?;
            return Err(err.into());
        }
    };

    // Phase 1: announce the rendezvous address.
    send_reply(stream, ReplyCode::Succeeded, Some(&Address::Ip(bound))).await?;
    debug!(%bound, "bind listener ready");

    // Phase 2: accept exactly one inbound connection.
    let mut backoff = Duration::ZERO;
    let (inbound, peer) = loop {
        match listener.accept().await {
            Ok(pair) => break pair,
            Err(err) if is_temporary(&err) => {
                backoff = if backoff.is_zero() {
                    config.accept_backoff_initial
                } else {
                    (backoff * 2).min(config.accept_backoff_max)
                };
                debug!(%err, ?backoff, "temporary bind accept error; retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                warn!(%err, "bind accept failed");
                send_reply(stream, ReplyCode::from(&err), None).await?;
                return Err(err.into());
            }
        }
    };
    drop(listener);

    send_reply(stream, ReplyCode::Succeeded, Some(&Address::Ip(peer))).await?;
    info!(%peer, "bind rendezvous complete");

    relay(stream, inbound).await?;
    Ok(())
}
