//! EPMD wire format: the byte-level building blocks of every message.
//!
//! These values ARE the protocol. The opcodes, the code bytes, and the field
//! widths below are inherited from the historical port mapper and are shared
//! with every runtime that talks to it. Changing anything here breaks
//! interoperability.
//!
//! All multi-byte integers are big-endian. Node names and listing text are
//! Latin-1. Requests are framed as `[u16 length][u8 tag][body]` where `length`
//! counts the tag byte plus the body. Responses are NOT framed uniformly; each
//! response type in [`crate::message`] knows its own shape.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

// ── Tag ───────────────────────────────────────────────────────────────────────

/// One-byte opcode identifying a message on the wire.
///
/// Decoding never fails: an unrecognised byte becomes [`Tag::Unknown`] and the
/// caller decides whether to reject or ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Node registration, keeps the connection open on success.
    Alive2Request,
    Alive2Response,
    /// Lookup of a single node by name.
    PortPlease2Request,
    Port2Response,
    NamesRequest,
    DumpRequest,
    KillRequest,
    StopRequest,
    Unknown(u8),
}

impl From<u8> for Tag {
    fn from(value: u8) -> Self {
        match value {
            120 => Tag::Alive2Request,
            121 => Tag::Alive2Response,
            122 => Tag::PortPlease2Request,
            119 => Tag::Port2Response,
            110 => Tag::NamesRequest,
            100 => Tag::DumpRequest,
            107 => Tag::KillRequest,
            115 => Tag::StopRequest,
            other => Tag::Unknown(other),
        }
    }
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> u8 {
        match tag {
            Tag::Alive2Request => 120,
            Tag::Alive2Response => 121,
            Tag::PortPlease2Request => 122,
            Tag::Port2Response => 119,
            Tag::NamesRequest => 110,
            Tag::DumpRequest => 100,
            Tag::KillRequest => 107,
            Tag::StopRequest => 115,
            Tag::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::Alive2Request => "ALIVE2_REQUEST",
            Tag::Alive2Response => "ALIVE2_RESPONSE",
            Tag::PortPlease2Request => "PORT_PLEASE2_REQUEST",
            Tag::Port2Response => "PORT2_RESPONSE",
            Tag::NamesRequest => "NAMES_REQUEST",
            Tag::DumpRequest => "DUMP_REQUEST",
            Tag::KillRequest => "KILL_REQUEST",
            Tag::StopRequest => "STOP_REQUEST",
            Tag::Unknown(_) => "UNKNOWN",
        };
        write!(f, "{}({})", name, u8::from(*self))
    }
}

// ── Node type ─────────────────────────────────────────────────────────────────

/// Node flavor byte carried by a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    R3Hidden,
    R3Erlang,
    R4Hidden,
    R4Erlang,
    R6Erlang,
    Unknown(u8),
}

impl From<u8> for NodeType {
    fn from(value: u8) -> Self {
        match value {
            72 => NodeType::R3Hidden,
            77 => NodeType::R3Erlang,
            104 => NodeType::R4Hidden,
            109 => NodeType::R4Erlang,
            110 => NodeType::R6Erlang,
            other => NodeType::Unknown(other),
        }
    }
}

impl From<NodeType> for u8 {
    fn from(t: NodeType) -> u8 {
        match t {
            NodeType::R3Hidden => 72,
            NodeType::R3Erlang => 77,
            NodeType::R4Hidden => 104,
            NodeType::R4Erlang => 109,
            NodeType::R6Erlang => 110,
            NodeType::Unknown(raw) => raw,
        }
    }
}

// ── Protocol ──────────────────────────────────────────────────────────────────

/// Transport hint byte. Every runtime in practice registers `Tcp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
    Unknown(u8),
}

impl From<u8> for Protocol {
    fn from(value: u8) -> Self {
        match value {
            0 => Protocol::Tcp,
            1 => Protocol::Udp,
            2 => Protocol::Sctp,
            other => Protocol::Unknown(other),
        }
    }
}

impl From<Protocol> for u8 {
    fn from(p: Protocol) -> u8 {
        match p {
            Protocol::Tcp => 0,
            Protocol::Udp => 1,
            Protocol::Sctp => 2,
            Protocol::Unknown(raw) => raw,
        }
    }
}

// ── Distribution version ──────────────────────────────────────────────────────

/// Distribution protocol version, sent as a `u16`.
///
/// A registration carries a `high` and a `low` bound. `low <= high` is
/// expected but never enforced on the wire. Values this enum does not name
/// (newer runtimes announce 6) are kept in `Unknown` and echoed back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistributionVersion {
    /// OTP-R3, erts-4.6.x
    R3,
    /// OTP-R4, erts-4.7.x
    R4,
    R5C,
    R5,
    /// OTP-R6 and every release that speaks the same handshake.
    R6,
    Unknown(u16),
}

impl From<u16> for DistributionVersion {
    fn from(value: u16) -> Self {
        match value {
            0 => DistributionVersion::R3,
            1 => DistributionVersion::R4,
            2 => DistributionVersion::R5C,
            3 => DistributionVersion::R5,
            5 => DistributionVersion::R6,
            other => DistributionVersion::Unknown(other),
        }
    }
}

impl From<DistributionVersion> for u16 {
    fn from(v: DistributionVersion) -> u16 {
        match v {
            DistributionVersion::R3 => 0,
            DistributionVersion::R4 => 1,
            DistributionVersion::R5C => 2,
            DistributionVersion::R5 => 3,
            DistributionVersion::R6 => 5,
            DistributionVersion::Unknown(raw) => raw,
        }
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Port the daemon listens on unless configured otherwise.
pub const DEFAULT_EPMD_PORT: u16 = 4369;

/// Environment variable overriding [`DEFAULT_EPMD_PORT`] for daemon and client.
pub const EPMD_PORT_ENV: &str = "ERL_EPMD_PORT";

/// Size of the request length prefix.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Largest value a `u16` length field can describe.
pub const MAX_SHORT_FIELD: usize = u16::MAX as usize;

/// Timeout for the outbound connect that checks a registered node is alive.
pub const LIVENESS_PROBE_TIMEOUT_SECS: u64 = 2;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when producing or interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unexpected tag: expected {expected}, found {found}")]
    UnexpectedTag { expected: Tag, found: Tag },

    #[error("unsupported request tag {0}")]
    UnsupportedTag(Tag),

    #[error("length mismatch: declared {declared} bytes, {available} available")]
    LengthMismatch { declared: usize, available: usize },

    #[error("truncated {field}: needed {needed} bytes, {available} available")]
    TruncatedField {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("{field} is {len} bytes, the wire allows at most {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} contains {ch:?}, which is not Latin-1")]
    NotLatin1 { field: &'static str, ch: char },

    #[error("malformed {what} line: {line:?}")]
    MalformedText { what: &'static str, line: String },

    #[error("unknown {what} status {status:?}")]
    UnknownStatus { what: &'static str, status: String },
}

// ── Reading ───────────────────────────────────────────────────────────────────

/// Cursor over a received buffer that names the field it failed on.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, field: &'static str, needed: usize) -> Result<(), WireError> {
        if self.buf.len() < needed {
            return Err(WireError::TruncatedField {
                field,
                needed,
                available: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, WireError> {
        self.need(field, 1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self, field: &'static str) -> Result<u16, WireError> {
        self.need(field, 2)?;
        Ok(self.buf.get_u16())
    }

    pub fn u32(&mut self, field: &'static str) -> Result<u32, WireError> {
        self.need(field, 4)?;
        Ok(self.buf.get_u32())
    }

    pub fn bytes(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], WireError> {
        self.need(field, len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// `[u16 length][bytes]`
    pub fn short_binary(&mut self, field: &'static str) -> Result<&'a [u8], WireError> {
        let len = self.u16(field)? as usize;
        self.bytes(field, len)
    }

    /// Everything left, used by bodies whose last field fills the frame.
    pub fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    /// Fails when bytes are left over; `consumed` is what the shape accounted for.
    pub fn finish(self, consumed: usize) -> Result<(), WireError> {
        if !self.buf.is_empty() {
            return Err(WireError::LengthMismatch {
                declared: consumed,
                available: consumed + self.buf.len(),
            });
        }
        Ok(())
    }
}

// ── Writing ───────────────────────────────────────────────────────────────────

/// Append `[u16 length][bytes]`.
pub fn put_short_binary(
    buf: &mut BytesMut,
    field: &'static str,
    bytes: &[u8],
) -> Result<(), WireError> {
    if bytes.len() > MAX_SHORT_FIELD {
        return Err(WireError::FieldTooLong {
            field,
            len: bytes.len(),
            max: MAX_SHORT_FIELD,
        });
    }
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
    Ok(())
}

// ── Latin-1 ───────────────────────────────────────────────────────────────────

/// Encode text as ISO-8859-1. Characters above U+00FF have no representation.
pub fn encode_latin1(field: &'static str, text: &str) -> Result<Vec<u8>, WireError> {
    text.chars()
        .map(|ch| u8::try_from(u32::from(ch)).map_err(|_| WireError::NotLatin1 { field, ch }))
        .collect()
}

/// Decode ISO-8859-1. Every byte maps to the code point of the same value.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

// ── Request framing ───────────────────────────────────────────────────────────

/// Wrap a request body as `[u16 length][u8 tag][body]`.
pub fn frame_request(tag: Tag, body: &[u8]) -> Result<Bytes, WireError> {
    let len = body.len() + 1;
    if len > MAX_SHORT_FIELD {
        return Err(WireError::FieldTooLong {
            field: "request",
            len,
            max: MAX_SHORT_FIELD,
        });
    }
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + len);
    buf.put_u16(len as u16);
    buf.put_u8(tag.into());
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Split a complete request frame into its tag and body.
///
/// The declared length must match the bytes present exactly.
pub fn split_request_frame(frame: &[u8]) -> Result<(Tag, &[u8]), WireError> {
    let mut reader = WireReader::new(frame);
    let declared = reader.u16("length")? as usize;
    if declared != reader.remaining() {
        return Err(WireError::LengthMismatch {
            declared,
            available: reader.remaining(),
        });
    }
    let tag = Tag::from(reader.u8("tag")?);
    Ok((tag, reader.rest()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
