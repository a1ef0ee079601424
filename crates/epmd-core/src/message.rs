//! Typed EPMD requests and responses.
//!
//! Every message has one explicit encoder and one explicit decoder. Requests
//! share the `[u16 length][u8 tag][body]` envelope and implement
//! [`RequestMessage`]. Responses do not share a shape:
//!
//! - `RegistrationResult` and `NodeInfo` start with a tag but have no length.
//! - `EpmdInfo` and `EpmdDump` are `[u32 port][text]` with no tag.
//! - `KillResult` and `StopResult` are a bare ASCII word.
//!
//! The response decoders therefore expect the whole response as read from
//! the socket.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::wire::{
    decode_latin1, encode_latin1, frame_request, put_short_binary, split_request_frame,
    DistributionVersion, NodeType, Protocol, Tag, WireError, WireReader,
};

// ── Traits ────────────────────────────────────────────────────────────────────

/// A client → daemon message carried in the length-prefixed envelope.
pub trait RequestMessage: Sized {
    const TAG: Tag;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError>;

    fn decode_body(body: &[u8]) -> Result<Self, WireError>;

    /// Full frame, length prefix included.
    fn encode(&self) -> Result<Bytes, WireError> {
        let mut body = BytesMut::new();
        self.encode_body(&mut body)?;
        frame_request(Self::TAG, &body)
    }

    /// Decode a full frame, length prefix included.
    fn decode(frame: &[u8]) -> Result<Self, WireError> {
        let (found, body) = split_request_frame(frame)?;
        if found != Self::TAG {
            return Err(WireError::UnexpectedTag {
                expected: Self::TAG,
                found,
            });
        }
        Self::decode_body(body)
    }
}

/// A daemon → client message. Each type owns its byte layout entirely.
pub trait ResponseMessage: Sized {
    fn encode(&self) -> Result<Bytes, WireError>;

    fn decode(bytes: &[u8]) -> Result<Self, WireError>;
}

fn expect_tag(reader: &mut WireReader<'_>, expected: Tag) -> Result<(), WireError> {
    let found = Tag::from(reader.u8("tag")?);
    if found != expected {
        return Err(WireError::UnexpectedTag { expected, found });
    }
    Ok(())
}

fn expect_empty(body: &[u8]) -> Result<(), WireError> {
    WireReader::new(body).finish(0)
}

// ── Node description ──────────────────────────────────────────────────────────

/// Everything a node announces about itself when registering, and everything
/// a lookup returns about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescription {
    /// Port the node accepts distribution connections on.
    pub port: u16,
    pub node_type: NodeType,
    pub protocol: Protocol,
    pub high: DistributionVersion,
    pub low: DistributionVersion,
    /// Short node name, without the `@host` part.
    pub name: String,
    /// Opaque bytes the node wants handed to peers.
    pub extra: Bytes,
}

impl NodeDescription {
    /// A normal TCP node speaking the R6 distribution protocol.
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            port,
            node_type: NodeType::R6Erlang,
            protocol: Protocol::Tcp,
            high: DistributionVersion::R6,
            low: DistributionVersion::R6,
            name: name.into(),
            extra: Bytes::new(),
        }
    }

    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_versions(mut self, low: DistributionVersion, high: DistributionVersion) -> Self {
        self.low = low;
        self.high = high;
        self
    }

    pub fn with_extra(mut self, extra: impl Into<Bytes>) -> Self {
        self.extra = extra.into();
        self
    }

    /// `u16 port | u8 type | u8 protocol | u16 high | u16 low | name | extra`
    fn encode_into(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        let name = encode_latin1("name", &self.name)?;
        buf.put_u16(self.port);
        buf.put_u8(self.node_type.into());
        buf.put_u8(self.protocol.into());
        buf.put_u16(self.high.into());
        buf.put_u16(self.low.into());
        put_short_binary(buf, "name", &name)?;
        put_short_binary(buf, "extra", &self.extra)
    }

    fn decode_from(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let port = reader.u16("port")?;
        let node_type = NodeType::from(reader.u8("node type")?);
        let protocol = Protocol::from(reader.u8("protocol")?);
        let high = DistributionVersion::from(reader.u16("highest version")?);
        let low = DistributionVersion::from(reader.u16("lowest version")?);
        let name = decode_latin1(reader.short_binary("name")?);
        let extra = Bytes::copy_from_slice(reader.short_binary("extra")?);
        Ok(Self {
            port,
            node_type,
            protocol,
            high,
            low,
            name,
            extra,
        })
    }

    /// Bytes this description occupies on the wire.
    fn wire_len(&self) -> usize {
        // port, type, protocol, high, low, two length prefixes
        2 + 1 + 1 + 2 + 2 + 2 + self.name.chars().count() + 2 + self.extra.len()
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// `ALIVE2_REQUEST`: register a node. The connection it arrives on becomes
/// the node's liveness channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub node: NodeDescription,
}

impl From<NodeDescription> for Registration {
    fn from(node: NodeDescription) -> Self {
        Self { node }
    }
}

impl RequestMessage for Registration {
    const TAG: Tag = Tag::Alive2Request;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        self.node.encode_into(buf)
    }

    fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = WireReader::new(body);
        let node = NodeDescription::decode_from(&mut reader)?;
        reader.finish(node.wire_len())?;
        Ok(Self { node })
    }
}

/// `PORT_PLEASE2_REQUEST`: look up one node. The name fills the rest of the
/// frame, there is no inner length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetNodeInfo {
    pub name: String,
}

impl GetNodeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl RequestMessage for GetNodeInfo {
    const TAG: Tag = Tag::PortPlease2Request;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_slice(&encode_latin1("name", &self.name)?);
        Ok(())
    }

    fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            name: decode_latin1(body),
        })
    }
}

/// `NAMES_REQUEST`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetEpmdInfo;

impl RequestMessage for GetEpmdInfo {
    const TAG: Tag = Tag::NamesRequest;

    fn encode_body(&self, _buf: &mut BytesMut) -> Result<(), WireError> {
        Ok(())
    }

    fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        expect_empty(body)?;
        Ok(Self)
    }
}

/// `DUMP_REQUEST`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetEpmdDump;

impl RequestMessage for GetEpmdDump {
    const TAG: Tag = Tag::DumpRequest;

    fn encode_body(&self, _buf: &mut BytesMut) -> Result<(), WireError> {
        Ok(())
    }

    fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        expect_empty(body)?;
        Ok(Self)
    }
}

/// `KILL_REQUEST`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Kill;

impl RequestMessage for Kill {
    const TAG: Tag = Tag::KillRequest;

    fn encode_body(&self, _buf: &mut BytesMut) -> Result<(), WireError> {
        Ok(())
    }

    fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        expect_empty(body)?;
        Ok(Self)
    }
}

/// `STOP_REQUEST`: unregister a node by name. Bare name, like `GetNodeInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stop {
    pub name: String,
}

impl Stop {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl RequestMessage for Stop {
    const TAG: Tag = Tag::StopRequest;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_slice(&encode_latin1("name", &self.name)?);
        Ok(())
    }

    fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            name: decode_latin1(body),
        })
    }
}

/// Any request the daemon understands, decoded from its envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Registration(Registration),
    GetNodeInfo(GetNodeInfo),
    GetEpmdInfo(GetEpmdInfo),
    GetEpmdDump(GetEpmdDump),
    Kill(Kill),
    Stop(Stop),
}

impl Request {
    pub fn tag(&self) -> Tag {
        match self {
            Request::Registration(_) => Registration::TAG,
            Request::GetNodeInfo(_) => GetNodeInfo::TAG,
            Request::GetEpmdInfo(_) => GetEpmdInfo::TAG,
            Request::GetEpmdDump(_) => GetEpmdDump::TAG,
            Request::Kill(_) => Kill::TAG,
            Request::Stop(_) => Stop::TAG,
        }
    }

    pub fn encode(&self) -> Result<Bytes, WireError> {
        match self {
            Request::Registration(m) => m.encode(),
            Request::GetNodeInfo(m) => m.encode(),
            Request::GetEpmdInfo(m) => m.encode(),
            Request::GetEpmdDump(m) => m.encode(),
            Request::Kill(m) => m.encode(),
            Request::Stop(m) => m.encode(),
        }
    }

    /// Decode a full frame: length, tag, then the body decoder for that tag.
    /// A tag with no request type behind it is `UnsupportedTag`.
    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        let (tag, body) = split_request_frame(frame)?;
        Self::decode_body(tag, body)
    }

    pub fn decode_body(tag: Tag, body: &[u8]) -> Result<Self, WireError> {
        match tag {
            Tag::Alive2Request => Registration::decode_body(body).map(Request::Registration),
            Tag::PortPlease2Request => GetNodeInfo::decode_body(body).map(Request::GetNodeInfo),
            Tag::NamesRequest => GetEpmdInfo::decode_body(body).map(Request::GetEpmdInfo),
            Tag::DumpRequest => GetEpmdDump::decode_body(body).map(Request::GetEpmdDump),
            Tag::KillRequest => Kill::decode_body(body).map(Request::Kill),
            Tag::StopRequest => Stop::decode_body(body).map(Request::Stop),
            other => Err(WireError::UnsupportedTag(other)),
        }
    }
}

// ── Registration result ───────────────────────────────────────────────────────

/// `ALIVE2_RESPONSE`: `u8 tag | u8 status | u16 creation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationResult {
    pub ok: bool,
    /// Zero whenever `ok` is false.
    pub creation: u16,
}

impl RegistrationResult {
    pub fn accepted(creation: u16) -> Self {
        Self { ok: true, creation }
    }

    pub fn refused() -> Self {
        Self {
            ok: false,
            creation: 0,
        }
    }

    pub const WIRE_LEN: usize = 4;
}

impl ResponseMessage for RegistrationResult {
    fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u8(Tag::Alive2Response.into());
        buf.put_u8(if self.ok { 0 } else { 1 });
        buf.put_u16(self.creation);
        Ok(buf.freeze())
    }

    /// The creation field is always written, but a refusal without one is
    /// still accepted.
    fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = WireReader::new(bytes);
        expect_tag(&mut reader, Tag::Alive2Response)?;
        let ok = reader.u8("status")? == 0;
        if !ok && reader.remaining() == 0 {
            return Ok(Self::refused());
        }
        let creation = reader.u16("creation")?;
        reader.finish(Self::WIRE_LEN)?;
        Ok(Self { ok, creation })
    }
}

// ── Node info ─────────────────────────────────────────────────────────────────

/// `PORT2_RESPONSE`: `u8 tag | u8 status` and, when status is 0, the full
/// node description.
///
/// Accessors on `NotFound` report absence instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeInfo {
    Found(NodeDescription),
    NotFound,
}

impl NodeInfo {
    pub fn is_ok(&self) -> bool {
        matches!(self, NodeInfo::Found(_))
    }

    pub fn description(&self) -> Option<&NodeDescription> {
        match self {
            NodeInfo::Found(node) => Some(node),
            NodeInfo::NotFound => None,
        }
    }

    pub fn into_description(self) -> Option<NodeDescription> {
        match self {
            NodeInfo::Found(node) => Some(node),
            NodeInfo::NotFound => None,
        }
    }

    pub fn port(&self) -> Option<u16> {
        self.description().map(|n| n.port)
    }

    pub fn node_type(&self) -> Option<NodeType> {
        self.description().map(|n| n.node_type)
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.description().map(|n| n.protocol)
    }

    pub fn high(&self) -> Option<DistributionVersion> {
        self.description().map(|n| n.high)
    }

    pub fn low(&self) -> Option<DistributionVersion> {
        self.description().map(|n| n.low)
    }

    pub fn name(&self) -> Option<&str> {
        self.description().map(|n| n.name.as_str())
    }

    pub fn extra(&self) -> Option<&[u8]> {
        self.description().map(|n| &n.extra[..])
    }
}

impl ResponseMessage for NodeInfo {
    fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::new();
        buf.put_u8(Tag::Port2Response.into());
        match self {
            NodeInfo::Found(node) => {
                buf.put_u8(0);
                node.encode_into(&mut buf)?;
            }
            NodeInfo::NotFound => buf.put_u8(1),
        }
        Ok(buf.freeze())
    }

    fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = WireReader::new(bytes);
        expect_tag(&mut reader, Tag::Port2Response)?;
        if reader.u8("status")? != 0 {
            return Ok(NodeInfo::NotFound);
        }
        let node = NodeDescription::decode_from(&mut reader)?;
        reader.finish(2 + node.wire_len())?;
        Ok(NodeInfo::Found(node))
    }
}

// ── Names listing ─────────────────────────────────────────────────────────────

/// One line of a names listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedPort {
    pub name: String,
    pub port: u16,
}

impl fmt::Display for NamedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "name {} at port {}", self.name, self.port)
    }
}

impl NamedPort {
    fn parse(line: &str) -> Result<Self, WireError> {
        let malformed = || WireError::MalformedText {
            what: "names",
            line: line.to_string(),
        };
        let rest = line.strip_prefix("name ").ok_or_else(malformed)?;
        let (name, port) = rest.rsplit_once(" at port ").ok_or_else(malformed)?;
        let port = port.trim().parse().map_err(|_| malformed())?;
        Ok(Self {
            name: name.to_string(),
            port,
        })
    }
}

/// Response to `NAMES_REQUEST`: `u32 daemon port | text`, no tag.
///
/// Text lines are `name <NAME> at port <PORT>` joined by `\n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpmdInfo {
    /// Port the daemon itself listens on.
    pub port: u32,
    pub nodes: Vec<NamedPort>,
}

impl EpmdInfo {
    pub fn text(&self) -> String {
        join_lines(&self.nodes)
    }
}

impl ResponseMessage for EpmdInfo {
    fn encode(&self) -> Result<Bytes, WireError> {
        encode_port_and_text(self.port, &self.text())
    }

    fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let (port, text) = decode_port_and_text(bytes)?;
        let nodes = text
            .lines()
            .filter(|line| !line.is_empty())
            .map(NamedPort::parse)
            .collect::<Result<_, _>>()?;
        Ok(Self { port, nodes })
    }
}

// ── Dump ──────────────────────────────────────────────────────────────────────

/// Whether a dump line describes a live registration or a retired one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpState {
    Active,
    OldUnused,
}

impl DumpState {
    fn label(self) -> &'static str {
        match self {
            DumpState::Active => "active",
            DumpState::OldUnused => "old/unused",
        }
    }
}

/// One line of a dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpEntry {
    pub state: DumpState,
    pub name: String,
    pub port: u16,
    /// Identifier of the connection that registered the node.
    pub fd: u64,
}

impl fmt::Display for DumpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} name\t{} at port {}, fd = {}",
            self.state.label(),
            self.name,
            self.port,
            self.fd
        )
    }
}

impl DumpEntry {
    fn parse(line: &str) -> Result<Self, WireError> {
        let malformed = || WireError::MalformedText {
            what: "dump",
            line: line.to_string(),
        };
        let (state, rest) = if let Some(rest) = line.strip_prefix("active name\t") {
            (DumpState::Active, rest)
        } else if let Some(rest) = line.strip_prefix("old/unused name\t") {
            (DumpState::OldUnused, rest)
        } else {
            return Err(malformed());
        };
        let (rest, fd) = rest.rsplit_once(", fd = ").ok_or_else(malformed)?;
        let (name, port) = rest.rsplit_once(" at port ").ok_or_else(malformed)?;
        Ok(Self {
            state,
            name: name.to_string(),
            port: port.parse().map_err(|_| malformed())?,
            fd: fd.trim().parse().map_err(|_| malformed())?,
        })
    }
}

/// Response to `DUMP_REQUEST`: `u32 daemon port | text`, no tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpmdDump {
    pub port: u32,
    pub entries: Vec<DumpEntry>,
}

impl EpmdDump {
    pub fn text(&self) -> String {
        join_lines(&self.entries)
    }
}

impl ResponseMessage for EpmdDump {
    fn encode(&self) -> Result<Bytes, WireError> {
        encode_port_and_text(self.port, &self.text())
    }

    fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let (port, text) = decode_port_and_text(bytes)?;
        let entries = text
            .lines()
            .filter(|line| !line.is_empty())
            .map(DumpEntry::parse)
            .collect::<Result<_, _>>()?;
        Ok(Self { port, entries })
    }
}

fn join_lines<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn encode_port_and_text(port: u32, text: &str) -> Result<Bytes, WireError> {
    let text = encode_latin1("listing", text)?;
    let mut buf = BytesMut::with_capacity(4 + text.len());
    buf.put_u32(port);
    buf.put_slice(&text);
    Ok(buf.freeze())
}

fn decode_port_and_text(bytes: &[u8]) -> Result<(u32, String), WireError> {
    let mut reader = WireReader::new(bytes);
    let port = reader.u32("daemon port")?;
    Ok((port, decode_latin1(reader.rest())))
}

// ── Kill / Stop results ───────────────────────────────────────────────────────

/// Bare ASCII answer to `KILL_REQUEST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillResult {
    Ok,
    Nok,
}

impl KillResult {
    pub fn as_str(self) -> &'static str {
        match self {
            KillResult::Ok => "OK",
            KillResult::Nok => "NOK",
        }
    }
}

impl ResponseMessage for KillResult {
    fn encode(&self) -> Result<Bytes, WireError> {
        Ok(Bytes::from_static(self.as_str().as_bytes()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        match bytes {
            b"OK" => Ok(KillResult::Ok),
            b"NOK" => Ok(KillResult::Nok),
            other => Err(WireError::UnknownStatus {
                what: "kill",
                status: decode_latin1(other),
            }),
        }
    }
}

/// Bare ASCII answer to `STOP_REQUEST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopResult {
    Stopped,
    NoExist,
}

impl StopResult {
    pub fn as_str(self) -> &'static str {
        match self {
            StopResult::Stopped => "STOPPED",
            StopResult::NoExist => "NOEXIST",
        }
    }
}

impl ResponseMessage for StopResult {
    fn encode(&self) -> Result<Bytes, WireError> {
        Ok(Bytes::from_static(self.as_str().as_bytes()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        match bytes {
            b"STOPPED" => Ok(StopResult::Stopped),
            b"NOEXIST" => Ok(StopResult::NoExist),
            other => Err(WireError::UnknownStatus {
                what: "stop",
                status: decode_latin1(other),
            }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
