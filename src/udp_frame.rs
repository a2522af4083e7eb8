//! SOCKS5 UDP relay frame codec
//!
//! Every datagram crossing a UDP ASSOCIATE relay carries this prefix:
//!
//! ```text
//! +------+------+------+----------+----------+------+
//! | RSV  | FRAG | ATYP | DST.ADDR | DST.PORT | DATA |
//! |  2   |  1   |  1   | variable |    2     |  N   |
//! +------+------+------+----------+----------+------+
//! ```
//!
//! Fragmentation is not supported: a non-zero FRAG parses as an error so
//! the relay can drop the datagram.

use bytes::{BufMut, Bytes, BytesMut};

use crate::addr::Address;
use crate::error::SocksError;

/// One UDP datagram with its SOCKS5 relay header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpFrame {
    /// Destination (client→proxy) or source (proxy→client) of the payload
    pub dst: Address,
    /// Opaque payload
    pub data: Bytes,
}

impl UdpFrame {
    /// Create a frame for `data` addressed to `dst`.
    pub fn new(dst: Address, data: Bytes) -> Self {
        UdpFrame { dst, data }
    }

    /// Encode the header and payload into a single buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.dst.serialized_len() + self.data.len());
        buf.put_u16(0); // RSV
        buf.put_u8(0); // FRAG
        self.dst.write_to_buf(&mut buf);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Parse a datagram.
    ///
    /// Rejects short prefixes, non-zero FRAG, and unknown address types;
    /// callers treat any error as "drop and continue". The RSV bytes are
    /// skipped without inspection.
    pub fn parse(datagram: &[u8]) -> Result<Self, SocksError> {
        if datagram.len() < 4 {
            return Err(SocksError::MalformedDatagram("short header"));
        }
        let frag = datagram[2];
        if frag != 0 {
            return Err(SocksError::Fragmented(frag));
        }
        let (dst, consumed) = Address::parse_from_buf(&datagram[3..])?;
        let data = Bytes::copy_from_slice(&datagram[3 + consumed..]);
        Ok(UdpFrame { dst, data })
    }
}
