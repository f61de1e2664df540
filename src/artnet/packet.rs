//! ArtDmx wire format
//!
//! ```text
//! 0      8        10        12   13   14      15   16       18
//! ┌──────┬────────┬─────────┬────┬────┬───────┬────┬────────┬──────────┐
//! │ID    │OpCode  │ProtVer  │Seq │Phys│SubUni │Net │Length  │Data      │
//! │8 B   │u16 LE  │u16 BE   │u8  │u8  │u8     │u8  │u16 BE  │2..=512 B │
//! └──────┴────────┴─────────┴────┴────┴───────┴────┴────────┴──────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::universe::{PortAddress, UniverseUpdate, UNIVERSE_SIZE};

/// Packet identifier, including the trailing NUL
pub const ARTNET_ID: &[u8; 8] = b"Art-Net\0";
pub const OP_DMX: u16 = 0x5000;
pub const OP_SYNC: u16 = 0x5200;
pub const PROTOCOL_VERSION: u16 = 14;
/// Default Art-Net UDP port
pub const ARTNET_PORT: u16 = 6454;

const HEADER_LEN: usize = 18;
const SYNC_LEN: usize = 14;

/// An ArtDmx packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtDmx {
    /// 0 disables sequencing
    pub sequence: u8,
    pub physical: u8,
    pub address: PortAddress,
    pub data: Bytes,
}

/// Packets this server understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtPacket {
    Dmx(ArtDmx),
    /// ArtSync carries no payload
    Sync,
}

impl ArtDmx {
    pub fn new(address: PortAddress, sequence: u8, data: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            physical: 0,
            address,
            data: data.into(),
        }
    }

    /// Serialize to a datagram
    ///
    /// Data is truncated to 512 bytes and zero-padded to an even length of
    /// at least 2, as receivers expect.
    pub fn encode(&self) -> Bytes {
        let mut len = self.data.len().min(UNIVERSE_SIZE);
        let payload = &self.data[..len];
        len = len.max(2);
        len += len % 2;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + len);
        buf.put_slice(ARTNET_ID);
        buf.put_u16_le(OP_DMX);
        buf.put_u16(PROTOCOL_VERSION);
        buf.put_u8(self.sequence);
        buf.put_u8(self.physical);
        buf.put_u8(self.address.sub_uni());
        buf.put_u8(self.address.net);
        buf.put_u16(len as u16);
        buf.put_slice(payload);
        buf.put_bytes(0, len - payload.len());
        buf.freeze()
    }

    pub fn into_update(self) -> UniverseUpdate {
        UniverseUpdate {
            address: self.address,
            sequence: self.sequence,
            data: self.data.to_vec(),
        }
    }
}

/// Encode an ArtSync packet
pub fn encode_sync() -> Bytes {
    let mut buf = BytesMut::with_capacity(SYNC_LEN);
    buf.put_slice(ARTNET_ID);
    buf.put_u16_le(OP_SYNC);
    buf.put_u16(PROTOCOL_VERSION);
    buf.put_u16(0);
    buf.freeze()
}

/// Parse a datagram
///
/// Protocol versions from 14 upwards are accepted; trailing bytes past the
/// declared length are ignored.
pub fn decode(datagram: &[u8]) -> Result<ArtPacket, ProtocolError> {
    if datagram.len() < 12 {
        return Err(ProtocolError::TooShort(datagram.len()));
    }
    if &datagram[..8] != ARTNET_ID {
        return Err(ProtocolError::BadIdentifier);
    }

    let mut buf = &datagram[8..];
    let opcode = buf.get_u16_le();
    let version = buf.get_u16();
    if version < PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    match opcode {
        OP_DMX => {}
        OP_SYNC => return Ok(ArtPacket::Sync),
        other => return Err(ProtocolError::UnsupportedOpcode(other)),
    }

    if datagram.len() < HEADER_LEN {
        return Err(ProtocolError::TooShort(datagram.len()));
    }

    let sequence = buf.get_u8();
    let physical = buf.get_u8();
    let sub_uni = buf.get_u8();
    let net = buf.get_u8();
    let length = buf.get_u16() as usize;

    if !(2..=UNIVERSE_SIZE).contains(&length) {
        return Err(ProtocolError::InvalidLength(length));
    }
    if buf.remaining() < length {
        return Err(ProtocolError::LengthMismatch {
            declared: length,
            available: buf.remaining(),
        });
    }

    let address = PortAddress::new(net, sub_uni >> 4, sub_uni & 0x0F);
    Ok(ArtPacket::Dmx(ArtDmx {
        sequence,
        physical,
        address,
        data: Bytes::copy_from_slice(&buf[..length]),
    }))
}
