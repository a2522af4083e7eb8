//! Username/password authentication (RFC 1929)
//!
//! Sub-negotiation, run after method 0x02 has been selected:
//!
//! ```text
//! client:  +----+------+----------+------+----------+
//!          |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
//!          | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
//!          +----+------+----------+------+----------+
//! server:  +----+--------+
//!          |VER | STATUS |
//!          | 1  |   1    |
//!          +----+--------+
//! ```

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::auth::{Authenticator, ClientAuthenticator};
use crate::consts::{AUTH_SUBNEG_VERSION, METHOD_USERNAME_PASSWORD};
use crate::error::SocksError;
use crate::Stream;

const STATUS_SUCCESS: u8 = 0x00;
const STATUS_FAILURE: u8 = 0x01;

/// Server-side username/password check against one fixed credential pair.
#[derive(Debug, Clone)]
pub struct PasswordAuth {
    username: String,
    password: String,
}

impl PasswordAuth {
    /// Create an authenticator accepting exactly this credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        PasswordAuth {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl Authenticator for PasswordAuth {
    fn method(&self) -> u8 {
        METHOD_USERNAME_PASSWORD
    }

    async fn authenticate(&self, stream: &mut dyn Stream) -> Result<(), SocksError> {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await?;

        if header[0] != AUTH_SUBNEG_VERSION {
            send_status(stream, STATUS_FAILURE).await?;
            return Err(SocksError::AuthFailed(format!(
                "invalid sub-negotiation version: {}",
                header[0]
            )));
        }

        let username_len = header[1] as usize;
        if username_len == 0 {
            send_status(stream, STATUS_FAILURE).await?;
            return Err(SocksError::AuthFailed("empty username".into()));
        }
        let mut username = vec![0u8; username_len];
        stream.read_exact(&mut username).await?;

        let password_len = stream.read_u8().await? as usize;
        if password_len == 0 {
            send_status(stream, STATUS_FAILURE).await?;
            return Err(SocksError::AuthFailed("empty password".into()));
        }
        let mut password = vec![0u8; password_len];
        stream.read_exact(&mut password).await?;

        if username == self.username.as_bytes() && password == self.password.as_bytes() {
            send_status(stream, STATUS_SUCCESS).await?;
            debug!("username/password authentication succeeded");
            Ok(())
        } else {
            send_status(stream, STATUS_FAILURE).await?;
            Err(SocksError::AuthFailed(format!(
                "bad credentials for user {}",
                String::from_utf8_lossy(&username)
            )))
        }
    }
}

async fn send_status(stream: &mut dyn Stream, status: u8) -> Result<(), SocksError> {
    stream.write_all(&[AUTH_SUBNEG_VERSION, status]).await?;
    stream.flush().await?;
    Ok(())
}

/// Client-side username/password sub-negotiation.
#[derive(Debug, Clone)]
pub struct PasswordClientAuth {
    username: String,
    password: String,
}

impl PasswordClientAuth {
    /// Create a client authenticator sending this credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        PasswordClientAuth {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl ClientAuthenticator for PasswordClientAuth {
    fn method(&self) -> u8 {
        METHOD_USERNAME_PASSWORD
    }

    async fn authenticate(&self, stream: &mut dyn Stream) -> Result<(), SocksError> {
        if self.username.is_empty() || self.username.len() > 255 {
            return Err(SocksError::AuthFailed("username length out of range".into()));
        }
        if self.password.is_empty() || self.password.len() > 255 {
            return Err(SocksError::AuthFailed("password length out of range".into()));
        }

        let mut msg = Vec::with_capacity(3 + self.username.len() + self.password.len());
        msg.push(AUTH_SUBNEG_VERSION);
        msg.push(self.username.len() as u8);
        msg.extend_from_slice(self.username.as_bytes());
        msg.push(self.password.len() as u8);
        msg.extend_from_slice(self.password.as_bytes());
        stream.write_all(&msg).await?;
        stream.flush().await?;

        let mut resp = [0u8; 2];
        stream.read_exact(&mut resp).await?;
        if resp[0] != AUTH_SUBNEG_VERSION {
            return Err(SocksError::AuthFailed(format!(
                "invalid sub-negotiation version: {}",
                resp[0]
            )));
        }
        if resp[1] != STATUS_SUCCESS {
            return Err(SocksError::AuthFailed("server rejected credentials".into()));
        }
        Ok(())
    }
}
