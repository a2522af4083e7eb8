//! SOCKS5 address codec
//!
//! Wire layout of an address field: one ATYP byte, a variable-length host
//! (4 raw octets, a length-prefixed FQDN, or 16 raw octets), then a
//! big-endian port. The same encoding is shared by requests, replies, and
//! UDP relay frames.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::consts::*;
use crate::error::SocksError;

/// A SOCKS5 destination or bound address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// A literal IPv4 or IPv6 socket address
    Ip(SocketAddr),
    /// A fully qualified domain name plus port, resolved by the proxy
    Domain(String, u16),
}

impl Address {
    /// Classify a textual host into the narrowest wire representation.
    ///
    /// Parses `host` as an IP literal first; an IPv4-mapped IPv6 address
    /// collapses to IPv4. Anything that is not an IP literal becomes an
    /// FQDN, rejecting empty names and names longer than 255 bytes.
    pub fn new(host: &str, port: u16) -> Result<Self, SocksError> {
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
                Some(v4) => Ok(Address::Ip(SocketAddr::new(IpAddr::V4(v4), port))),
                None => Ok(Address::Ip(SocketAddr::new(IpAddr::V6(v6), port))),
            },
            Ok(ip) => Ok(Address::Ip(SocketAddr::new(ip, port))),
            Err(_) => {
                if host.is_empty() {
                    return Err(SocksError::InvalidAddress("empty host".into()));
                }
                if host.len() > MAX_DOMAIN_LEN {
                    return Err(SocksError::DomainTooLong(host.len()));
                }
                Ok(Address::Domain(host.to_string(), port))
            }
        }
    }

    /// The port component.
    pub fn port(&self) -> u16 {
        match self {
            Address::Ip(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }

    /// Decode an address field from a stream.
    ///
    /// Reads the ATYP byte first and then exactly the host length it
    /// implies; never over-reads.
    pub async fn read_from<R>(stream: &mut R) -> Result<Self, SocksError>
    where
        R: AsyncRead + Unpin,
    {
        let atyp = stream.read_u8().await?;
        match atyp {
            ATYP_IPV4 => {
                let mut octets = [0u8; 4];
                stream.read_exact(&mut octets).await?;
                let port = stream.read_u16().await?;
                Ok(Address::Ip(SocketAddr::new(
                    IpAddr::V4(Ipv4Addr::from(octets)),
                    port,
                )))
            }
            ATYP_DOMAIN => {
                let len = stream.read_u8().await? as usize;
                if len == 0 {
                    return Err(SocksError::InvalidAddress("empty FQDN".into()));
                }
                let mut name = vec![0u8; len];
                stream.read_exact(&mut name).await?;
                let port = stream.read_u16().await?;
                let name = String::from_utf8(name)
                    .map_err(|_| SocksError::InvalidAddress("FQDN is not valid UTF-8".into()))?;
                Ok(Address::Domain(name, port))
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; 16];
                stream.read_exact(&mut octets).await?;
                let port = stream.read_u16().await?;
                Ok(Address::Ip(SocketAddr::new(
                    IpAddr::V6(Ipv6Addr::from(octets)),
                    port,
                )))
            }
            other => Err(SocksError::UnrecognizedAddressType(other)),
        }
    }

    /// Decode an address field from a byte slice, returning the address and
    /// the number of bytes consumed. Used by the UDP frame codec.
    pub fn parse_from_buf(buf: &[u8]) -> Result<(Self, usize), SocksError> {
        let (&atyp, rest) = buf
            .split_first()
            .ok_or(SocksError::MalformedDatagram("missing address type"))?;
        match atyp {
            ATYP_IPV4 => {
                if rest.len() < 6 {
                    return Err(SocksError::MalformedDatagram("short IPv4 address"));
                }
                let ip = Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
                let port = u16::from_be_bytes([rest[4], rest[5]]);
                Ok((Address::Ip(SocketAddr::new(IpAddr::V4(ip), port)), 7))
            }
            ATYP_DOMAIN => {
                let len = *rest
                    .first()
                    .ok_or(SocksError::MalformedDatagram("missing FQDN length"))?
                    as usize;
                if len == 0 {
                    return Err(SocksError::MalformedDatagram("empty FQDN"));
                }
                if rest.len() < 1 + len + 2 {
                    return Err(SocksError::MalformedDatagram("short FQDN"));
                }
                let name = String::from_utf8(rest[1..1 + len].to_vec())
                    .map_err(|_| SocksError::MalformedDatagram("FQDN is not valid UTF-8"))?;
                let port = u16::from_be_bytes([rest[1 + len], rest[2 + len]]);
                Ok((Address::Domain(name, port), 1 + 1 + len + 2))
            }
            ATYP_IPV6 => {
                if rest.len() < 18 {
                    return Err(SocksError::MalformedDatagram("short IPv6 address"));
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&rest[..16]);
                let port = u16::from_be_bytes([rest[16], rest[17]]);
                let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port);
                Ok((Address::Ip(addr), 19))
            }
            other => Err(SocksError::UnrecognizedAddressType(other)),
        }
    }

    /// Append the wire encoding (ATYP + host + port) to `buf`.
    pub fn write_to_buf<B: BufMut>(&self, buf: &mut B) {
        match self {
            Address::Ip(SocketAddr::V4(addr)) => {
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Address::Ip(SocketAddr::V6(addr)) => {
                buf.put_u8(ATYP_IPV6);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Address::Domain(name, port) => {
                buf.put_u8(ATYP_DOMAIN);
                buf.put_u8(name.len() as u8);
                buf.put_slice(name.as_bytes());
                buf.put_u16(*port);
            }
        }
    }

    /// Length of the wire encoding in bytes.
    pub fn serialized_len(&self) -> usize {
        match self {
            Address::Ip(SocketAddr::V4(_)) => 1 + 4 + 2,
            Address::Ip(SocketAddr::V6(_)) => 1 + 16 + 2,
            Address::Domain(name, _) => 1 + 1 + name.len() + 2,
        }
    }

    /// Resolve to a socket address, performing a DNS lookup for FQDNs.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        match self {
            Address::Ip(addr) => Ok(*addr),
            Address::Domain(name, port) => tokio::net::lookup_host((name.as_str(), *port))
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {name}"))
                }),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Ip(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ip(addr) => addr.fmt(f),
            Address::Domain(name, port) => write!(f, "{name}:{port}"),
        }
    }
}

/// Split `host:port` / `[ipv6]:port` and validate the port range.
pub fn split_host_port(addr: &str) -> Result<(&str, u16), SocksError> {
    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| SocksError::InvalidAddress(addr.to_string()))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| SocksError::InvalidAddress(addr.to_string()))?;
        (host, port)
    } else {
        addr.rsplit_once(':')
            .ok_or_else(|| SocksError::InvalidAddress(addr.to_string()))?
    };
    let port: u16 = port
        .parse()
        .map_err(|_| SocksError::InvalidAddress(addr.to_string()))?;
    if port == 0 {
        return Err(SocksError::InvalidAddress(format!(
            "port number out of range: {addr}"
        )));
    }
    Ok((host, port))
}
