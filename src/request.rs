//! SOCKS5 request and reply codec
//!
//! ```text
//! request:  +----+-----+-------+------+----------+----------+
//!           |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
//!           | 1  |  1  | X'00' |  1   | variable |    2     |
//!           +----+-----+-------+------+----------+----------+
//! reply:    +----+-----+-------+------+----------+----------+
//!           |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
//!           +----+-----+-------+------+----------+----------+
//! ```
//!
//! A reply is always assembled into one buffer and sent with a single
//! write, so it can never interleave with relay bytes.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::addr::Address;
use crate::consts::{RESERVED, SOCKS_VERSION};
use crate::error::{ReplyCode, SocksError};

/// SOCKS5 request commands (RFC 1928 section 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Open a TCP tunnel to the target
    Connect = 0x01,
    /// Listen on the proxy for one inbound TCP connection
    Bind = 0x02,
    /// Establish a UDP relay bound to this control connection
    UdpAssociate = 0x03,
}

impl Command {
    /// Parse a command byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Command::Connect),
            0x02 => Some(Command::Bind),
            0x03 => Some(Command::UdpAssociate),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Connect => "connect",
            Command::Bind => "bind",
            Command::UdpAssociate => "udp associate",
        };
        f.write_str(s)
    }
}

/// A decoded client request.
#[derive(Debug, Clone)]
pub struct Request {
    /// The requested operation
    pub command: Command,
    /// The destination the client names
    pub dst: Address,
}

/// Decode a request header from the stream.
///
/// The whole header, address included, is consumed before the command byte
/// is validated, so an unknown command still leaves the stream positioned
/// for the `command not supported` reply.
pub async fn read_request<S>(stream: &mut S) -> Result<Request, SocksError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 3];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS_VERSION {
        return Err(SocksError::UnsupportedVersion(header[0]));
    }
    if header[2] != RESERVED {
        return Err(SocksError::NonZeroReserved(header[2]));
    }

    let dst = Address::read_from(stream).await?;

    let command = Command::from_byte(header[1])
        .ok_or(SocksError::CommandNotSupported(header[1]))?;

    Ok(Request { command, dst })
}

/// Encode and send one reply.
///
/// `bnd` is the bound address to echo; `None` emits the zero-filled IPv4
/// `0.0.0.0:0` form.
pub async fn send_reply<S>(
    stream: &mut S,
    code: ReplyCode,
    bnd: Option<&Address>,
) -> Result<(), SocksError>
where
    S: AsyncWrite + Unpin,
{
    let zero = Address::Ip(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)));
    let bnd = bnd.unwrap_or(&zero);

    let mut buf = BytesMut::with_capacity(3 + bnd.serialized_len());
    buf.extend_from_slice(&[SOCKS_VERSION, code.into(), RESERVED]);
    bnd.write_to_buf(&mut buf);

    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Decode a reply, returning the status and bound address. Client side.
pub(crate) async fn read_reply<S>(stream: &mut S) -> Result<(ReplyCode, Address), SocksError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 3];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS_VERSION {
        return Err(SocksError::UnsupportedVersion(header[0]));
    }
    if header[2] != RESERVED {
        return Err(SocksError::NonZeroReserved(header[2]));
    }

    let code = ReplyCode::try_from(header[1])?;
    let bnd = Address::read_from(stream).await?;
    Ok((code, bnd))
}
