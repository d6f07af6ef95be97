//! Traffic events for the DDoS mitigation service.
//!
//! An [`Event`] is one observed packet or request. Events are produced by an
//! external capture/ingest collaborator, usually as loosely-typed
//! [`RawEvent`] records, and are validated into the typed form before the
//! engine sees them.

use std::collections::hash_map::DefaultHasher;
use std::convert::TryFrom;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while validating inbound events
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

/// Transport or application protocol of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Http,
    Other,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Http => "http",
            Protocol::Other => "other",
        }
    }
}

impl From<&str> for Protocol {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "tcp" | "syn" => Protocol::Tcp,
            "udp" | "dns" => Protocol::Udp,
            "icmp" => Protocol::Icmp,
            "http" | "https" => Protocol::Http,
            _ => Protocol::Other,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TCP control bits carried by an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
    pub urg: bool,
}

impl TcpFlags {
    /// A bare SYN, the opening packet of a handshake
    pub fn syn() -> Self {
        Self { syn: true, ..Self::default() }
    }

    /// Parse a flag string such as `"SYN"`, `"SYN,ACK"`, `"SYN|ACK"` or `"XMAS"`
    ///
    /// Unknown tokens are ignored; an empty string yields no flags.
    pub fn parse(raw: &str) -> Self {
        let mut flags = Self::default();
        for token in raw
            .split(|c: char| c == ',' || c == '|' || c == '+' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            match token.to_ascii_uppercase().as_str() {
                "SYN" => flags.syn = true,
                "ACK" => flags.ack = true,
                "FIN" => flags.fin = true,
                "RST" => flags.rst = true,
                "PSH" => flags.psh = true,
                "URG" => flags.urg = true,
                "XMAS" => {
                    flags.fin = true;
                    flags.psh = true;
                    flags.urg = true;
                }
                _ => {}
            }
        }
        flags
    }

    /// SYN set without ACK: a half-open connection attempt
    pub fn is_syn_without_ack(&self) -> bool {
        self.syn && !self.ack
    }
}

/// One observed packet or request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Identifier assigned by the ingest collaborator
    pub id: Option<String>,
    /// Network-layer origin address
    pub source: IpAddr,
    /// Destination address
    pub destination: Option<IpAddr>,
    /// Destination port
    pub destination_port: Option<u16>,
    /// Protocol
    pub protocol: Protocol,
    /// Size in bytes
    pub size: u64,
    /// TCP control bits
    pub flags: TcpFlags,
    /// Arrival timestamp
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(source: IpAddr, protocol: Protocol, size: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            source,
            destination: None,
            destination_port: None,
            protocol,
            size,
            flags: TcpFlags::default(),
            timestamp,
        }
    }

    pub fn with_destination(mut self, destination: IpAddr, port: u16) -> Self {
        self.destination = Some(destination);
        self.destination_port = Some(port);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.destination_port = Some(port);
        self
    }

    pub fn with_flags(mut self, flags: TcpFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Whether this event is a TCP SYN without ACK
    pub fn is_half_open_syn(&self) -> bool {
        self.protocol == Protocol::Tcp && self.flags.is_syn_without_ack()
    }

    /// Hash of the normalized feature set (size, protocol, destination port)
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.size.hash(&mut hasher);
        self.protocol.hash(&mut hasher);
        self.destination_port.unwrap_or(0).hash(&mut hasher);
        hasher.finish()
    }
}

/// Loosely-typed event record as delivered by capture and ingest collaborators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: Option<String>,
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub dst_port: Option<u16>,
    pub protocol: Option<String>,
    pub size: Option<u64>,
    pub flags: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl TryFrom<RawEvent> for Event {
    type Error = EventError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let source = raw
            .src_ip
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EventError::InvalidEvent("missing source address".to_string()))?
            .parse::<IpAddr>()
            .map_err(|e| EventError::InvalidEvent(format!("bad source address: {}", e)))?;

        let size = raw
            .size
            .ok_or_else(|| EventError::InvalidEvent("missing size".to_string()))?;

        let destination = match raw.dst_ip.as_deref().map(str::trim) {
            Some(ip) if !ip.is_empty() => Some(
                ip.parse::<IpAddr>()
                    .map_err(|e| EventError::InvalidEvent(format!("bad destination address: {}", e)))?,
            ),
            _ => None,
        };

        Ok(Event {
            id: raw.id,
            source,
            destination,
            destination_port: raw.dst_port,
            protocol: raw.protocol.as_deref().map(Protocol::from).unwrap_or(Protocol::Other),
            size,
            flags: raw.flags.as_deref().map(TcpFlags::parse).unwrap_or_default(),
            timestamp: raw.timestamp.unwrap_or_else(Utc::now),
        })
    }
}
