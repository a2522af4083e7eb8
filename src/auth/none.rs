//! "No authentication required" method (0x00)

use async_trait::async_trait;

use crate::auth::{Authenticator, ClientAuthenticator};
use crate::consts::METHOD_NO_AUTH;
use crate::error::SocksError;
use crate::Stream;

/// Server-side no-auth method; the sub-protocol is empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    fn method(&self) -> u8 {
        METHOD_NO_AUTH
    }

    async fn authenticate(&self, _stream: &mut dyn Stream) -> Result<(), SocksError> {
        Ok(())
    }
}

/// Client-side no-auth method.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuthClient;

#[async_trait]
impl ClientAuthenticator for NoAuthClient {
    fn method(&self) -> u8 {
        METHOD_NO_AUTH
    }

    async fn authenticate(&self, _stream: &mut dyn Stream) -> Result<(), SocksError> {
        Ok(())
    }
}
