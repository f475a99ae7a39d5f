//! Grrrr wire format: the datagram frame used by the history transfer protocol.
//!
//! One frame per datagram. Every frame starts with a fixed 10-byte header
//! whose first field is the length of everything that follows it, so a frame
//! is self-delimiting even if the transport hands us a larger buffer.
//!
//! All multi-byte integers are big-endian. The header is a zerocopy struct;
//! there is no unsafe code in this module.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Packet Header ────────────────────────────────────────────────────────────

/// Fixed frame header.
///
/// Every field is byte-aligned, so `repr(C)` has no padding and the struct
/// can be read straight from an unaligned receive buffer.
///
/// Wire size: 10 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct PacketHeader {
    /// Bytes following this field: the rest of the header plus the payload.
    pub length: U16<BigEndian>,

    /// Wire format version. Currently 0x01.
    /// A receiver seeing an unknown version drops the frame.
    pub version: u8,

    /// Packet kind (see [`PacketKind`]).
    pub kind: u8,

    /// 1-based sequence number for ACK and DATA. Zero for REQUEST.
    pub seq_no: U32<BigEndian>,

    /// Bit flags:
    ///   bit 0: last DATA packet of the transfer
    ///   bits 1-7: reserved, must be zero
    pub flags: u8,

    /// Reserved, must be zero.
    pub reserved: u8,
}

assert_eq_size!(PacketHeader, [u8; 10]);

/// Size of the `length` field that prefixes every frame.
pub const LENGTH_FIELD_LEN: usize = 2;

/// Size of the full header, including the length prefix.
pub const HEADER_LEN: usize = 10;

/// Current frame version.
pub const WIRE_VERSION: u8 = 0x01;

/// Largest DATA payload a frame may carry.
pub const MAX_PAYLOAD: usize = 8 * 1024;

/// Largest frame the receiver needs to buffer.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD;

const FLAG_IS_LAST: u8 = 0x01;

// ── Packet Kind ──────────────────────────────────────────────────────────────

/// What a packet asks the receiver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PacketKind {
    /// Ask the peer to stream its history to us. Carries nothing else.
    Request = 0x01,
    /// Acknowledge one DATA packet by sequence number.
    Ack = 0x02,
    /// One segment of a history blob.
    Data = 0x03,
}

impl TryFrom<u8> for PacketKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketKind::Request),
            0x02 => Ok(PacketKind::Ack),
            0x03 => Ok(PacketKind::Data),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<PacketKind> for u8 {
    fn from(k: PacketKind) -> u8 {
        k as u8
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketKind::Request => f.write_str("REQUEST"),
            PacketKind::Ack => f.write_str("ACK"),
            PacketKind::Data => f.write_str("DATA"),
        }
    }
}

// ── Packet ───────────────────────────────────────────────────────────────────

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub seq_no: u32,
    pub payload: Bytes,
    pub is_last: bool,
}

impl Packet {
    pub fn request() -> Self {
        Self {
            kind: PacketKind::Request,
            seq_no: 0,
            payload: Bytes::new(),
            is_last: false,
        }
    }

    pub fn ack(seq_no: u32) -> Self {
        Self {
            kind: PacketKind::Ack,
            seq_no,
            payload: Bytes::new(),
            is_last: false,
        }
    }

    pub fn data(seq_no: u32, payload: Bytes, is_last: bool) -> Self {
        Self {
            kind: PacketKind::Data,
            seq_no,
            payload,
            is_last,
        }
    }

    /// Encode into a single frame.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }

        let header = PacketHeader {
            length: U16::new((HEADER_LEN - LENGTH_FIELD_LEN + self.payload.len()) as u16),
            version: WIRE_VERSION,
            kind: self.kind.into(),
            seq_no: U32::new(self.seq_no),
            flags: if self.is_last { FLAG_IS_LAST } else { 0 },
            reserved: 0,
        };

        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Decode exactly one frame from `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let header = PacketHeader::read_from_prefix(buf).ok_or(WireError::Truncated(buf.len()))?;

        let declared = header.length.get() as usize;
        if declared < HEADER_LEN - LENGTH_FIELD_LEN || LENGTH_FIELD_LEN + declared != buf.len() {
            return Err(WireError::LengthMismatch {
                declared,
                actual: buf.len().saturating_sub(LENGTH_FIELD_LEN),
            });
        }

        if header.version != WIRE_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }

        let kind = PacketKind::try_from(header.kind)?;
        let seq_no = header.seq_no.get();
        let payload = &buf[HEADER_LEN..];

        if payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload.len()));
        }
        if header.reserved != 0 || header.flags & !FLAG_IS_LAST != 0 {
            return Err(WireError::ReservedBits);
        }

        match kind {
            PacketKind::Request => {
                if !payload.is_empty() || header.flags != 0 {
                    return Err(WireError::UnexpectedBody(kind));
                }
            }
            PacketKind::Ack => {
                if !payload.is_empty() || header.flags != 0 {
                    return Err(WireError::UnexpectedBody(kind));
                }
                if seq_no == 0 {
                    return Err(WireError::ZeroSequence(kind));
                }
            }
            PacketKind::Data => {
                if seq_no == 0 {
                    return Err(WireError::ZeroSequence(kind));
                }
            }
        }

        Ok(Self {
            kind,
            seq_no,
            payload: Bytes::copy_from_slice(payload),
            is_last: header.flags & FLAG_IS_LAST != 0,
        })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame truncated: {0} bytes is shorter than the header")]
    Truncated(usize),

    #[error("frame length mismatch: header says {declared}, datagram has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("unknown frame version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown packet kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),

    #[error("reserved header bits set")]
    ReservedBits,

    #[error("{0} packet must not carry a payload or flags")]
    UnexpectedBody(PacketKind),

    #[error("{0} packet has sequence number zero")]
    ZeroSequence(PacketKind),
}
