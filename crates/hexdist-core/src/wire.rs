//! hexdist wire format: framing for the scheduler ↔ peer socket.
//!
//! Every message is a fixed 16-byte [`FrameHeader`] followed by exactly
//! `length` bytes of JSON payload. The length prefix is the only framing
//! signal: payload bytes are never scanned for delimiters, so a payload can
//! never be mistaken for the start of the next frame.
//!
//! Multi-byte header fields are big-endian and carried in zerocopy byteorder
//! wrappers, so the header has no padding and no alignment requirement.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::task::JobResult;

// ── Frame Header ─────────────────────────────────────────────────────────────

/// Header preceding every payload on a peer connection.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    /// Always [`MAGIC`]. Anything else means the stream is desynchronised.
    pub magic: [u8; 2],

    /// Wire format version. Currently [`FRAME_VERSION`].
    pub version: u8,

    /// Message type, see [`FrameKind`]. Unknown kinds are skipped by readers.
    pub kind: u8,

    /// Payload length in bytes, not including this header.
    pub length: U32<BigEndian>,

    /// Correlation token. Matches a `job_result` to the `job` it answers.
    /// Zero for messages that do not take part in a dispatch.
    pub token: U64<BigEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; 16]);

// ── Frame Kind ────────────────────────────────────────────────────────────────

/// Message types carried in [`FrameHeader::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// scheduler → peer. Payload: task JSON.
    Job = 0x01,

    /// peer → scheduler. Payload: [`JobResult`] JSON.
    JobResult = 0x02,

    /// peer → scheduler. Payload: JSON bool.
    SetSecondary = 0x03,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Job),
            0x02 => Ok(FrameKind::JobResult),
            0x03 => Ok(FrameKind::SetSecondary),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<FrameKind> for u8 {
    fn from(k: FrameKind) -> u8 {
        k as u8
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// First two bytes of every frame.
pub const MAGIC: [u8; 2] = *b"HX";

/// Current frame format version.
pub const FRAME_VERSION: u8 = 0x01;

/// Size of [`FrameHeader`] on the wire.
pub const HEADER_LEN: usize = std::mem::size_of::<FrameHeader>();

/// Default cap on payload size. Configurable per listener.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

// ── Frame ─────────────────────────────────────────────────────────────────────

/// A decoded frame. `kind` is kept raw so that unknown kinds survive decoding
/// and can be logged and skipped by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u8,
    pub token: u64,
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame with a JSON-encoded payload.
    pub fn json<T: Serialize + ?Sized>(
        kind: FrameKind,
        token: u64,
        value: &T,
    ) -> Result<Self, WireError> {
        let payload = serde_json::to_vec(value).map_err(|e| WireError::Json(e.to_string()))?;
        if payload.len() > u32::MAX as usize {
            return Err(WireError::PayloadTooLarge(payload.len(), u32::MAX));
        }
        Ok(Self {
            kind: kind.into(),
            token,
            payload: Bytes::from(payload),
        })
    }

    /// `job` frame carrying an opaque task.
    pub fn job<T: Serialize + ?Sized>(token: u64, task: &T) -> Result<Self, WireError> {
        Self::json(FrameKind::Job, token, task)
    }

    /// Interpret the raw kind byte.
    pub fn frame_kind(&self) -> Result<FrameKind, WireError> {
        FrameKind::try_from(self.kind)
    }

    /// Deserialize the payload as JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        serde_json::from_slice(&self.payload).map_err(|e| WireError::Json(e.to_string()))
    }

    /// Append header and payload to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let header = FrameHeader {
            magic: MAGIC,
            version: FRAME_VERSION,
            kind: self.kind,
            length: U32::new(self.payload.len() as u32),
            token: U64::new(self.token),
        };
        dst.reserve(HEADER_LEN + self.payload.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&self.payload);
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Try to split one complete frame off the front of `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A bad header is an
    /// error: the stream cannot be resynchronised and must be closed.
    pub fn decode(src: &mut BytesMut, max_payload: u32) -> Result<Option<Self>, WireError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = FrameHeader::read_from_prefix(&src[..]).ok_or(WireError::Truncated)?;
        if header.magic != MAGIC {
            return Err(WireError::BadMagic(header.magic));
        }
        if header.version != FRAME_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }

        let length = header.length.get();
        if length > max_payload {
            return Err(WireError::PayloadTooLarge(length as usize, max_payload));
        }

        let total = HEADER_LEN + length as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let payload = src.split_to(total).freeze().slice(HEADER_LEN..);
        Ok(Some(Self {
            kind: header.kind,
            token: header.token.get(),
            payload,
        }))
    }
}

// ── Peer → scheduler messages ─────────────────────────────────────────────────

/// Messages a peer sends to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// Result of the dispatch identified by `token`.
    JobResult { token: u64, result: JobResult },

    /// Tier change request. `true` asks to be used only when no primary
    /// peer is connected.
    SetSecondary(bool),
}

impl PeerMessage {
    pub fn from_frame(frame: &Frame) -> Result<Self, WireError> {
        match frame.frame_kind()? {
            FrameKind::JobResult => Ok(PeerMessage::JobResult {
                token: frame.token,
                result: frame.decode_json()?,
            }),
            FrameKind::SetSecondary => Ok(PeerMessage::SetSecondary(frame.decode_json()?)),
            FrameKind::Job => Err(WireError::UnexpectedKind(FrameKind::Job)),
        }
    }

    pub fn to_frame(&self) -> Result<Frame, WireError> {
        match self {
            PeerMessage::JobResult { token, result } => {
                Frame::json(FrameKind::JobResult, *token, result)
            }
            PeerMessage::SetSecondary(secondary) => {
                Frame::json(FrameKind::SetSecondary, 0, secondary)
            }
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("bad frame magic: {0:02x?}")]
    BadMagic([u8; 2]),

    #[error("unknown frame version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("unexpected frame kind in this direction: {0:?}")]
    UnexpectedKind(FrameKind),

    #[error("payload length {0} exceeds maximum {1}")]
    PayloadTooLarge(usize, u32),

    #[error("truncated frame header")]
    Truncated,

    #[error("invalid JSON payload: {0}")]
    Json(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
