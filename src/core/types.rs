use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind, Result};

/// Event identifier. ID 0 is reserved and never denotes a valid event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl EventId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for EventId {
    fn from(id: u64) -> Self {
        EventId(id)
    }
}

/// Transport-layer protocol of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortProto {
    Tcp,
    Udp,
    Icmp,
    Unknown,
}

/// A transport-layer port: 16-bit number plus protocol tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    pub number: u16,
    pub proto: PortProto,
}

impl Port {
    pub fn new(number: u16, proto: PortProto) -> Self {
        Port { number, proto }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let proto = match self.proto {
            PortProto::Tcp => "tcp",
            PortProto::Udp => "udp",
            PortProto::Icmp => "icmp",
            PortProto::Unknown => "?",
        };
        write!(f, "{}/{}", self.number, proto)
    }
}

/// A 128-bit IP address. IPv4 addresses are stored in v4-mapped form
/// (::ffff:a.b.c.d), so the top 12 bytes distinguish the families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    bytes: [u8; 16],
}

impl Address {
    /// Top 96 bits of a v4-mapped address.
    const V4_MAPPED_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];

    pub fn v4(octets: [u8; 4]) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..12].copy_from_slice(&Self::V4_MAPPED_PREFIX);
        bytes[12..].copy_from_slice(&octets);
        Address { bytes }
    }

    pub fn v6(bytes: [u8; 16]) -> Self {
        Address { bytes }
    }

    pub fn is_v4(&self) -> bool {
        self.bytes[..12] == Self::V4_MAPPED_PREFIX
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }
}

impl From<std::net::IpAddr> for Address {
    fn from(ip: std::net::IpAddr) -> Self {
        match ip {
            std::net::IpAddr::V4(v4) => Address::v4(v4.octets()),
            std::net::IpAddr::V6(v6) => Address::v6(v6.octets()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_v4() {
            let o = &self.bytes[12..];
            write!(f, "{}.{}.{}.{}", o[0], o[1], o[2], o[3])
        } else {
            write!(f, "{}", std::net::Ipv6Addr::from(self.bytes))
        }
    }
}

/// Type tag of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Bool,
    Int,
    UInt,
    Real,
    Timestamp,
    Duration,
    Str,
    Addr,
    Port,
    Set,
    Vector,
    Table,
    Record,
}

impl TypeKind {
    pub fn is_container(&self) -> bool {
        matches!(self, TypeKind::Set | TypeKind::Vector | TypeKind::Table)
    }
}

/// A tagged event value. Timestamps and durations are nanoseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Real(f64),
    Timestamp(i64),
    Duration(i64),
    Str(String),
    Addr(Address),
    Port(Port),
    Set(Vec<Value>),
    Vector(Vec<Value>),
    Table(Vec<(Value, Value)>),
    Record(Record),
}

impl Value {
    pub fn kind(&self) -> TypeKind {
        match self {
            Value::Bool(_) => TypeKind::Bool,
            Value::Int(_) => TypeKind::Int,
            Value::UInt(_) => TypeKind::UInt,
            Value::Real(_) => TypeKind::Real,
            Value::Timestamp(_) => TypeKind::Timestamp,
            Value::Duration(_) => TypeKind::Duration,
            Value::Str(_) => TypeKind::Str,
            Value::Addr(_) => TypeKind::Addr,
            Value::Port(_) => TypeKind::Port,
            Value::Set(_) => TypeKind::Set,
            Value::Vector(_) => TypeKind::Vector,
            Value::Table(_) => TypeKind::Table,
            Value::Record(_) => TypeKind::Record,
        }
    }
}

/// An ordered sequence of field values; field names live in the record type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record(pub Vec<Value>);

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Record(values)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Field type: either a leaf kind or a nested record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Kind(TypeKind),
    Record(RecordType),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordField {
    pub name: String,
    pub ty: FieldType,
}

/// A named record type. The type name doubles as the event name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordType {
    pub name: String,
    pub fields: Vec<RecordField>,
}

impl RecordType {
    pub fn new(name: impl Into<String>, fields: Vec<RecordField>) -> Self {
        RecordType {
            name: name.into(),
            fields,
        }
    }
}

/// A fully-typed event: identifier, timestamp, record type, and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub ty: Arc<RecordType>,
    pub data: Record,
}

impl Event {
    pub fn new(ty: Arc<RecordType>, data: Record, timestamp: i64) -> Self {
        Event {
            id: EventId(0),
            timestamp,
            ty,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.ty.name
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.timestamp)
    }
}

/// A path addressing a field inside a (possibly nested) record.
/// Renders as the decimal dot-joined form, e.g. `1.0.2`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Offset(pub Vec<usize>);

impl Offset {
    pub fn new(components: Vec<usize>) -> Self {
        Offset(components)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, component: usize) {
        self.0.push(component);
    }

    pub fn pop(&mut self) {
        self.0.pop();
    }

    pub fn bump(&mut self) {
        if let Some(last) = self.0.last_mut() {
            *last += 1;
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl FromStr for Offset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut components = Vec::new();
        for part in s.split('.') {
            let c = part
                .parse::<usize>()
                .map_err(|_| Error::new(ErrorKind::Parse, format!("invalid offset: {}", s)))?;
            components.push(c);
        }
        Ok(Offset(components))
    }
}
