//! dnstap envelope
//!
//! Protobuf view of the dnstap schema, limited to the fields the relay
//! needs to build a structured envelope. Payloads are still relayed as
//! opaque bytes; this view is only consulted by sinks that re-encode.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use prost::Message as _;

/// Top-level dnstap frame payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct Dnstap {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub identity: Option<Vec<u8>>,

    #[prost(bytes = "vec", optional, tag = "2")]
    pub version: Option<Vec<u8>>,

    #[prost(bytes = "vec", optional, tag = "3")]
    pub extra: Option<Vec<u8>>,

    #[prost(message, optional, tag = "14")]
    pub message: Option<Message>,

    #[prost(enumeration = "DnstapType", required, tag = "15")]
    pub r#type: i32,
}

/// dnstap `Message`: one DNS transaction observation
#[derive(Clone, PartialEq, prost::Message)]
pub struct Message {
    #[prost(enumeration = "MessageType", required, tag = "1")]
    pub r#type: i32,

    #[prost(enumeration = "SocketFamily", optional, tag = "2")]
    pub socket_family: Option<i32>,

    #[prost(enumeration = "SocketProtocol", optional, tag = "3")]
    pub socket_protocol: Option<i32>,

    #[prost(bytes = "vec", optional, tag = "4")]
    pub query_address: Option<Vec<u8>>,

    #[prost(bytes = "vec", optional, tag = "5")]
    pub response_address: Option<Vec<u8>>,

    #[prost(uint32, optional, tag = "6")]
    pub query_port: Option<u32>,

    #[prost(uint32, optional, tag = "7")]
    pub response_port: Option<u32>,

    #[prost(uint64, optional, tag = "8")]
    pub query_time_sec: Option<u64>,

    #[prost(fixed32, optional, tag = "9")]
    pub query_time_nsec: Option<u32>,

    #[prost(bytes = "vec", optional, tag = "10")]
    pub query_message: Option<Vec<u8>>,

    #[prost(bytes = "vec", optional, tag = "11")]
    pub query_zone: Option<Vec<u8>>,

    #[prost(uint64, optional, tag = "12")]
    pub response_time_sec: Option<u64>,

    #[prost(fixed32, optional, tag = "13")]
    pub response_time_nsec: Option<u32>,

    #[prost(bytes = "vec", optional, tag = "14")]
    pub response_message: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DnstapType {
    Message = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SocketFamily {
    Inet = 1,
    Inet6 = 2,
}

impl SocketFamily {
    pub fn name(self) -> &'static str {
        match self {
            Self::Inet => "INET",
            Self::Inet6 => "INET6",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SocketProtocol {
    Udp = 1,
    Tcp = 2,
    Dot = 3,
    Doh = 4,
    DnsCryptUdp = 5,
    DnsCryptTcp = 6,
    Doq = 7,
}

impl SocketProtocol {
    pub fn name(self) -> &'static str {
        match self {
            Self::Udp => "UDP",
            Self::Tcp => "TCP",
            Self::Dot => "DOT",
            Self::Doh => "DOH",
            Self::DnsCryptUdp => "DNSCryptUDP",
            Self::DnsCryptTcp => "DNSCryptTCP",
            Self::Doq => "DOQ",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    AuthQuery = 1,
    AuthResponse = 2,
    ResolverQuery = 3,
    ResolverResponse = 4,
    ClientQuery = 5,
    ClientResponse = 6,
    ForwarderQuery = 7,
    ForwarderResponse = 8,
    StubQuery = 9,
    StubResponse = 10,
    ToolQuery = 11,
    ToolResponse = 12,
    UpdateQuery = 13,
    UpdateResponse = 14,
}

impl MessageType {
    pub fn name(self) -> &'static str {
        match self {
            Self::AuthQuery => "AUTH_QUERY",
            Self::AuthResponse => "AUTH_RESPONSE",
            Self::ResolverQuery => "RESOLVER_QUERY",
            Self::ResolverResponse => "RESOLVER_RESPONSE",
            Self::ClientQuery => "CLIENT_QUERY",
            Self::ClientResponse => "CLIENT_RESPONSE",
            Self::ForwarderQuery => "FORWARDER_QUERY",
            Self::ForwarderResponse => "FORWARDER_RESPONSE",
            Self::StubQuery => "STUB_QUERY",
            Self::StubResponse => "STUB_RESPONSE",
            Self::ToolQuery => "TOOL_QUERY",
            Self::ToolResponse => "TOOL_RESPONSE",
            Self::UpdateQuery => "UPDATE_QUERY",
            Self::UpdateResponse => "UPDATE_RESPONSE",
        }
    }

    /// Response types carry even discriminants
    pub fn is_response(self) -> bool {
        (self as i32) % 2 == 0
    }
}

/// Structured fields extracted from a dnstap payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DnstapEnvelope {
    pub identity: Option<String>,
    pub version: Option<String>,
    pub message_type: Option<MessageType>,
    pub socket_family: Option<SocketFamily>,
    pub socket_protocol: Option<SocketProtocol>,
    pub query_address: Option<IpAddr>,
    pub response_address: Option<IpAddr>,
    pub query_port: Option<u16>,
    pub response_port: Option<u16>,
    pub query_time: Option<DateTime<Utc>>,
    pub response_time: Option<DateTime<Utc>>,
    pub query_message: Option<Bytes>,
    pub response_message: Option<Bytes>,
}

impl DnstapEnvelope {
    /// Decode the envelope from a raw dnstap payload
    pub fn decode(payload: &[u8]) -> Result<Self, prost::DecodeError> {
        let frame = Dnstap::decode(payload)?;
        let mut envelope = Self {
            identity: frame.identity.as_deref().map(lossy),
            version: frame.version.as_deref().map(lossy),
            ..Default::default()
        };

        let Some(msg) = frame.message else {
            return Ok(envelope);
        };

        envelope.message_type = MessageType::try_from(msg.r#type).ok();
        envelope.socket_family = msg.socket_family.and_then(|v| SocketFamily::try_from(v).ok());
        envelope.socket_protocol = msg
            .socket_protocol
            .and_then(|v| SocketProtocol::try_from(v).ok());
        envelope.query_address = msg.query_address.as_deref().and_then(ip_from_bytes);
        envelope.response_address = msg.response_address.as_deref().and_then(ip_from_bytes);
        envelope.query_port = msg.query_port.and_then(|p| u16::try_from(p).ok());
        envelope.response_port = msg.response_port.and_then(|p| u16::try_from(p).ok());
        envelope.query_time = timestamp(msg.query_time_sec, msg.query_time_nsec);
        envelope.response_time = timestamp(msg.response_time_sec, msg.response_time_nsec);
        envelope.query_message = msg.query_message.map(Bytes::from);
        envelope.response_message = msg.response_message.map(Bytes::from);

        Ok(envelope)
    }

    /// Time of the observed event: response time for responses, else query time
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        match self.message_type {
            Some(t) if t.is_response() => self.response_time.or(self.query_time),
            _ => self.query_time.or(self.response_time),
        }
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

fn timestamp(secs: Option<u64>, nsecs: Option<u32>) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs?).ok()?;
    DateTime::from_timestamp(secs, nsecs.unwrap_or(0))
}
