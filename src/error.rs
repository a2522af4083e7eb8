//! Error types for socksgate
//!
//! `SocksError` covers protocol, negotiation, and IO failures; `ReplyCode`
//! is the RFC 1928 reply status with its mapping from OS-level errors.

use std::fmt;
use std::io;

use thiserror::Error;

/// Main error type for SOCKS5 operations.
#[derive(Error, Debug)]
pub enum SocksError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Unsupported SOCKS version byte
    #[error("unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// The reserved field was not zero
    #[error("non-zero reserved field: {0:#04x}")]
    NonZeroReserved(u8),

    /// Unrecognized address type tag
    #[error("unrecognized address type: {0}")]
    UnrecognizedAddressType(u8),

    /// Request carried a command outside CONNECT/BIND/UDP ASSOCIATE
    #[error("command not supported: {0}")]
    CommandNotSupported(u8),

    /// Invalid target address supplied by the caller
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// FQDN does not fit the one-byte length prefix
    #[error("FQDN too long: {0} bytes")]
    DomainTooLong(usize),

    /// No offered authentication method matched the configured set
    #[error("no acceptable authentication methods")]
    NoAcceptableMethod,

    /// More methods configured than the one-byte count can carry
    #[error("too many authentication methods: {0}")]
    TooManyMethods(usize),

    /// The authentication sub-protocol failed
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A relayed UDP datagram did not parse as a SOCKS5 frame
    #[error("malformed UDP datagram: {0}")]
    MalformedDatagram(&'static str),

    /// Fragmented UDP datagram (FRAG != 0), which this implementation drops
    #[error("unsupported fragmentation: {0}")]
    Fragmented(u8),

    /// The server answered the request with a non-success status
    #[error("server replied: {0}")]
    Reply(ReplyCode),

    /// Sentinel returned by `serve` after a requested shutdown
    #[error("server closed")]
    ServerClosed,

    /// Shutdown deadline elapsed before all sessions drained
    #[error("shutdown deadline elapsed")]
    ShutdownTimeout,
}

impl SocksError {
    /// Reply status to emit for a failure that reached the reply stage.
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            SocksError::Io(err) => ReplyCode::from(err),
            SocksError::CommandNotSupported(_) => ReplyCode::CommandNotSupported,
            SocksError::UnrecognizedAddressType(_) | SocksError::DomainTooLong(_) => {
                ReplyCode::AddrTypeNotSupported
            }
            _ => ReplyCode::GeneralFailure,
        }
    }

    /// Reply status for a request-decode failure, or `None` when the
    /// failure is fatal and the session must close silently.
    pub(crate) fn decode_reply_code(&self) -> Option<ReplyCode> {
        match self {
            SocksError::NonZeroReserved(_) => Some(ReplyCode::GeneralFailure),
            SocksError::UnrecognizedAddressType(_) => Some(ReplyCode::AddrTypeNotSupported),
            SocksError::CommandNotSupported(_) => Some(ReplyCode::CommandNotSupported),
            _ => None,
        }
    }
}

/// SOCKS5 reply status codes (RFC 1928 section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReplyCode {
    /// Request granted
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    NotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddrTypeNotSupported = 0x08,
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplyCode::Succeeded => "succeeded",
            ReplyCode::GeneralFailure => "general SOCKS server failure",
            ReplyCode::NotAllowed => "connection not allowed by ruleset",
            ReplyCode::NetworkUnreachable => "network unreachable",
            ReplyCode::HostUnreachable => "host unreachable",
            ReplyCode::ConnectionRefused => "connection refused",
            ReplyCode::TtlExpired => "TTL expired",
            ReplyCode::CommandNotSupported => "command not supported",
            ReplyCode::AddrTypeNotSupported => "address type not supported",
        };
        f.write_str(s)
    }
}

impl From<ReplyCode> for u8 {
    fn from(code: ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for ReplyCode {
    type Error = SocksError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ReplyCode::Succeeded),
            0x01 => Ok(ReplyCode::GeneralFailure),
            0x02 => Ok(ReplyCode::NotAllowed),
            0x03 => Ok(ReplyCode::NetworkUnreachable),
            0x04 => Ok(ReplyCode::HostUnreachable),
            0x05 => Ok(ReplyCode::ConnectionRefused),
            0x06 => Ok(ReplyCode::TtlExpired),
            0x07 => Ok(ReplyCode::CommandNotSupported),
            0x08 => Ok(ReplyCode::AddrTypeNotSupported),
            _ => Err(SocksError::MalformedDatagram("unknown reply code")),
        }
    }
}

impl From<&io::Error> for ReplyCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => ReplyCode::TtlExpired,
            io::ErrorKind::Unsupported => ReplyCode::AddrTypeNotSupported,
            io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
            io::ErrorKind::NetworkDown | io::ErrorKind::NetworkUnreachable => {
                ReplyCode::NetworkUnreachable
            }
            io::ErrorKind::HostUnreachable | io::ErrorKind::AddrNotAvailable => {
                ReplyCode::HostUnreachable
            }
            _ => ReplyCode::GeneralFailure,
        }
    }
}
