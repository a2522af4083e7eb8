//! Authentication method negotiation
//!
//! The server holds a read-only map from method byte to [`Authenticator`];
//! negotiation scans the client's offer in the order received and picks the
//! first configured method, answering `[5, 0xFF]` when nothing matches. The
//! client mirror offers its configured methods and then runs whichever the
//! server selected.
//!
//! GSSAPI (method 0x01) keeps its reserved slot but is not implemented.

mod none;
mod password;

pub use none::{NoAuth, NoAuthClient};
pub use password::{PasswordAuth, PasswordClientAuth};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::consts::*;
use crate::error::SocksError;
use crate::Stream;

/// Server-side authentication capability.
///
/// `authenticate` receives the channel right after `[5, method]` has been
/// written, and drives the method's sub-protocol to completion.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// The method byte this authenticator negotiates for.
    fn method(&self) -> u8;

    /// Run the sub-protocol on the half-negotiated channel.
    async fn authenticate(&self, stream: &mut dyn Stream) -> Result<(), SocksError>;
}

/// Client-side mirror of [`Authenticator`].
#[async_trait]
pub trait ClientAuthenticator: Send + Sync {
    /// The method byte to offer.
    fn method(&self) -> u8;

    /// Run the sub-protocol after the server has selected this method.
    async fn authenticate(&self, stream: &mut dyn Stream) -> Result<(), SocksError>;
}

/// Server side of the method negotiation (RFC 1928 section 3).
pub(crate) async fn negotiate<S>(
    stream: &mut S,
    methods: &HashMap<u8, Arc<dyn Authenticator>>,
) -> Result<u8, SocksError>
where
    S: Stream,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS_VERSION {
        return Err(SocksError::UnsupportedVersion(header[0]));
    }

    let mut offered = vec![0u8; header[1] as usize];
    stream.read_exact(&mut offered).await?;

    // First offered method that the server is configured for wins.
    let chosen = offered
        .iter()
        .find_map(|m| methods.get(m).map(|a| (*m, Arc::clone(a))));

    let (method, authenticator) = match chosen {
        Some(found) => found,
        None => {
            stream
                .write_all(&[SOCKS_VERSION, METHOD_NO_ACCEPTABLE])
                .await?;
            stream.flush().await?;
            return Err(SocksError::NoAcceptableMethod);
        }
    };

    stream.write_all(&[SOCKS_VERSION, method]).await?;
    stream.flush().await?;

    authenticator.authenticate(stream).await?;
    debug!(method, "authentication complete");
    Ok(method)
}

/// Client side of the method negotiation.
pub(crate) async fn client_negotiate<S>(
    stream: &mut S,
    auths: &[Arc<dyn ClientAuthenticator>],
) -> Result<u8, SocksError>
where
    S: Stream,
{
    if auths.len() > 255 {
        return Err(SocksError::TooManyMethods(auths.len()));
    }

    let mut offer = Vec::with_capacity(2 + auths.len());
    offer.push(SOCKS_VERSION);
    offer.push(auths.len() as u8);
    offer.extend(auths.iter().map(|a| a.method()));
    stream.write_all(&offer).await?;
    stream.flush().await?;

    let mut resp = [0u8; 2];
    stream.read_exact(&mut resp).await?;
    if resp[0] != SOCKS_VERSION {
        return Err(SocksError::UnsupportedVersion(resp[0]));
    }
    if resp[1] == METHOD_NO_ACCEPTABLE {
        return Err(SocksError::NoAcceptableMethod);
    }

    let authenticator = auths
        .iter()
        .find(|a| a.method() == resp[1])
        .ok_or_else(|| {
            SocksError::AuthFailed(format!("server selected unoffered method {}", resp[1]))
        })?;
    authenticator.authenticate(stream).await?;
    Ok(resp[1])
}
