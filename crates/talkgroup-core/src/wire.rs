//! Talkgroup wire format — the frame every engine-to-engine unit travels in.
//!
//! These types ARE the protocol. Every field, every size, every reserved byte
//! is part of the wire format. A frame is a fixed 64-byte [`FrameHeader`]
//! followed by `length` payload bytes. All integers are network byte order.
//!
//! Types derive zerocopy traits for allocation-free parsing; there is no
//! unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{NetworkEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::group::{BlobInfo, RtpHeader};

// ── Frame Header ──────────────────────────────────────────────────────────────

/// Header preceding every frame payload.
///
/// Wire size: 64 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    /// Always [`FRAME_MAGIC`].
    pub magic: U32<NetworkEndian>,

    /// Wire format version. Currently [`FRAME_VERSION`].
    pub version: u8,

    /// [`FrameKind`] discriminant.
    pub kind: u8,

    /// Bit flags:
    ///   bit 0: payload is sealed with the group key
    ///   bits 1-7: reserved, must be zero
    pub flags: u8,

    /// Transmit priority. Only meaningful on floor claims.
    pub priority: u8,

    /// BLAKE3 hash of the group id. Receivers route on this, never on the id.
    pub group_hash: [u8; 32],

    /// Sending node id.
    pub sender: [u8; 8],

    /// Cipher nonce for sealed payloads, zero otherwise.
    pub nonce: U64<NetworkEndian>,

    /// Payload length in bytes, not including this header.
    pub length: U32<NetworkEndian>,

    /// Reserved, must be zero.
    pub reserved: U32<NetworkEndian>,
}

assert_eq_size!(FrameHeader, [u8; 64]);

/// Frame header size on the wire.
pub const FRAME_HEADER_LEN: usize = 64;

/// "TGF1".
pub const FRAME_MAGIC: u32 = 0x5447_4631;

/// Current frame format version.
pub const FRAME_VERSION: u8 = 0x01;

/// Flag bit: payload is sealed.
pub const FLAG_SEALED: u8 = 0x01;

/// Largest payload a frame may carry (fits one UDP datagram with the header).
pub const MAX_PAYLOAD: usize = 65_000;

/// Node identifier: 8 random bytes, shown as 16 hex chars.
pub type NodeId = [u8; 8];

/// Group routing hash.
pub type GroupHash = [u8; 32];

/// Compute the routing hash of a group id.
pub fn group_hash(group_id: &str) -> GroupHash {
    *blake3::hash(group_id.as_bytes()).as_bytes()
}

// ── Frame kinds ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Presence descriptor JSON.
    Presence = 1,
    /// Sender is leaving the group. Empty payload.
    Depart = 2,
    /// Sender claims the floor; payload is the talker JSON.
    FloorClaim = 3,
    /// Sender released the floor; payload is the talker JSON.
    FloorRelease = 4,
    /// Blob: u16 info length, BlobInfo JSON, bytes.
    Blob = 5,
    /// RTP: 12-byte RTP header, bytes.
    Rtp = 6,
    /// Raw bytes.
    Raw = 7,
    /// Rallypoint keepalive. Payload is an 8-byte send timestamp (ms).
    Ping = 8,
    /// Rallypoint keepalive reply, echoing the ping payload.
    Pong = 9,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FrameKind::Presence),
            2 => Ok(FrameKind::Depart),
            3 => Ok(FrameKind::FloorClaim),
            4 => Ok(FrameKind::FloorRelease),
            5 => Ok(FrameKind::Blob),
            6 => Ok(FrameKind::Rtp),
            7 => Ok(FrameKind::Raw),
            8 => Ok(FrameKind::Ping),
            9 => Ok(FrameKind::Pong),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// A parsed frame: validated header fields plus the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub flags: u8,
    pub priority: u8,
    pub group_hash: GroupHash,
    pub sender: NodeId,
    pub nonce: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: FrameKind, group_hash: GroupHash, sender: NodeId, payload: Vec<u8>) -> Self {
        Self {
            kind,
            flags: 0,
            priority: 0,
            group_hash,
            sender,
            nonce: 0,
            payload,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_sealed(&self) -> bool {
        self.flags & FLAG_SEALED != 0
    }

    /// Header for this frame. Also used as associated data when sealing.
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            magic: U32::new(FRAME_MAGIC),
            version: FRAME_VERSION,
            kind: self.kind as u8,
            flags: self.flags,
            priority: self.priority,
            group_hash: self.group_hash,
            sender: self.sender,
            nonce: U64::new(self.nonce),
            length: U32::new(self.payload.len() as u32),
            reserved: U32::new(0),
        }
    }

    /// Serialize header and payload into one buffer.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        out.extend_from_slice(self.header().as_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Parse one complete frame. Trailing bytes beyond `length` are an error.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let header = FrameHeader::read_from_prefix(buf).ok_or(WireError::Truncated)?;
        let (kind, length) = validate_header(&header)?;

        let payload = &buf[FRAME_HEADER_LEN..];
        if payload.len() != length {
            return Err(WireError::LengthMismatch {
                declared: length,
                actual: payload.len(),
            });
        }

        Ok(Self {
            kind,
            flags: header.flags,
            priority: header.priority,
            group_hash: header.group_hash,
            sender: header.sender,
            nonce: header.nonce.get(),
            payload: payload.to_vec(),
        })
    }
}

/// Check a header and return its kind and declared payload length.
///
/// Stream transports read the header first and then exactly `length` bytes.
pub fn validate_header(header: &FrameHeader) -> Result<(FrameKind, usize), WireError> {
    if header.magic.get() != FRAME_MAGIC {
        return Err(WireError::BadMagic(header.magic.get()));
    }
    if header.version != FRAME_VERSION {
        return Err(WireError::UnknownVersion(header.version));
    }
    if header.flags & !FLAG_SEALED != 0 {
        return Err(WireError::ReservedFlagsSet(header.flags));
    }
    let length = header.length.get() as usize;
    if length > MAX_PAYLOAD {
        return Err(WireError::PayloadTooLarge(length));
    }
    Ok((FrameKind::try_from(header.kind)?, length))
}

// ── RTP header ────────────────────────────────────────────────────────────────

/// RTP fields carried ahead of an RTP frame's media bytes.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct RtpWireHeader {
    /// Payload type (0..=127).
    pub pt: u8,
    /// 1 if the marker bit is set.
    pub marker: u8,
    pub seq: U16<NetworkEndian>,
    pub ssrc: U32<NetworkEndian>,
    pub ts: U32<NetworkEndian>,
}

assert_eq_size!(RtpWireHeader, [u8; 12]);

pub const RTP_HEADER_LEN: usize = 12;

/// Build the payload of an RTP frame.
pub fn encode_rtp(header: &RtpHeader, media: &[u8]) -> Vec<u8> {
    let wire = RtpWireHeader {
        pt: header.pt,
        marker: u8::from(header.marker),
        seq: U16::new(header.seq),
        ssrc: U32::new(header.ssrc),
        ts: U32::new(header.ts),
    };
    let mut out = Vec::with_capacity(RTP_HEADER_LEN + media.len());
    out.extend_from_slice(wire.as_bytes());
    out.extend_from_slice(media);
    out
}

/// Split an RTP frame payload into header and media bytes.
pub fn decode_rtp(payload: &[u8]) -> Result<(RtpHeader, &[u8]), WireError> {
    let wire = RtpWireHeader::read_from_prefix(payload).ok_or(WireError::Truncated)?;
    let header = RtpHeader {
        pt: wire.pt,
        marker: wire.marker != 0,
        seq: wire.seq.get(),
        ssrc: wire.ssrc.get(),
        ts: wire.ts.get(),
    };
    Ok((header, &payload[RTP_HEADER_LEN..]))
}

// ── Blob payload ──────────────────────────────────────────────────────────────

/// Build the payload of a blob frame: `u16` info length, info JSON, bytes.
pub fn encode_blob(info: &BlobInfo, blob: &[u8]) -> Result<Vec<u8>, WireError> {
    let json = serde_json::to_vec(info).map_err(|e| WireError::BadBlobInfo(e.to_string()))?;
    let json_len = u16::try_from(json.len()).map_err(|_| WireError::PayloadTooLarge(json.len()))?;
    let mut out = Vec::with_capacity(2 + json.len() + blob.len());
    out.extend_from_slice(&json_len.to_be_bytes());
    out.extend_from_slice(&json);
    out.extend_from_slice(blob);
    Ok(out)
}

/// Split a blob frame payload into its info and bytes.
pub fn decode_blob(payload: &[u8]) -> Result<(BlobInfo, &[u8]), WireError> {
    let len_bytes: [u8; 2] = payload
        .get(..2)
        .and_then(|b| b.try_into().ok())
        .ok_or(WireError::Truncated)?;
    let json_len = u16::from_be_bytes(len_bytes) as usize;
    let json = payload.get(2..2 + json_len).ok_or(WireError::Truncated)?;
    let info: BlobInfo =
        serde_json::from_slice(json).map_err(|e| WireError::BadBlobInfo(e.to_string()))?;
    Ok((info, &payload[2 + json_len..]))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame shorter than its header")]
    Truncated,

    #[error("bad frame magic: 0x{0:08x}")]
    BadMagic(u32),

    #[error("unknown frame version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("declared payload length {declared}, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("invalid blob info: {0}")]
    BadBlobInfo(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
