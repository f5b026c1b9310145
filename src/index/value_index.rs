use serde::{Deserialize, Serialize};

use crate::bitmap::{
    BinaryCoder, Binner, Bitmap, BoolBitmap, EqualityCoder, PrecisionBinner, RangeCoder, RelOp,
};
use crate::bitstream::Bitstream;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Address, Port, PortProto, TypeKind, Value};

/// Caps applied while indexing, taken from the store configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub max_string_size: usize,
    pub max_container_elements: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            max_string_size: 1024,
            max_container_elements: 256,
        }
    }
}

/// Order-preserving key for range coding over floats: the sign-folded bit
/// pattern, monotone with respect to the IEEE-754 total order.
fn real_key(x: f64) -> i64 {
    let bits = x.to_bits() as i64;
    bits ^ (((bits >> 63) as u64) >> 1) as i64
}

/// Range-coded index over precision-binned reals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealIndex {
    binner: PrecisionBinner,
    map: Bitmap<RangeCoder<i64>>,
}

impl RealIndex {
    pub fn new() -> Self {
        RealIndex {
            binner: PrecisionBinner::new(-2),
            map: Bitmap::new(),
        }
    }

    fn push_back(&mut self, x: f64) -> bool {
        self.map.push_back(real_key(self.binner.bin(x)))
    }

    fn lookup(&self, op: RelOp, x: f64) -> Result<Option<Bitstream>> {
        match op {
            // Strictly-less has no meaning on a binned continuous domain.
            RelOp::Lt | RelOp::Ge => Err(Error::new(
                ErrorKind::UnsupportedQuery,
                format!("operator {} requires an integral type", op.symbol()),
            )),
            _ => self.map.lookup(op, real_key(self.binner.bin(x))),
        }
    }
}

impl Default for RealIndex {
    fn default() -> Self {
        RealIndex::new()
    }
}

/// Equality-coded index over length-capped strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringIndex {
    max_size: usize,
    map: Bitmap<EqualityCoder<String>>,
}

impl StringIndex {
    pub fn new(max_size: usize) -> Self {
        StringIndex {
            max_size,
            map: Bitmap::new(),
        }
    }

    fn truncate(&self, s: &str) -> String {
        if s.len() <= self.max_size {
            return s.to_string();
        }
        let mut end = self.max_size;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }

    fn push_back(&mut self, s: &str) -> bool {
        let key = self.truncate(s);
        self.map.push_back(key)
    }

    fn lookup(&self, op: RelOp, s: &str) -> Result<Option<Bitstream>> {
        self.map.lookup(op, self.truncate(s))
    }
}

/// Sixteen per-byte bit-sliced bitmaps over the 128-bit address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressIndex {
    bytes: Vec<Bitmap<BinaryCoder<u8>>>,
}

impl AddressIndex {
    pub fn new() -> Self {
        AddressIndex {
            bytes: (0..16).map(|_| Bitmap::new()).collect(),
        }
    }

    fn push_back(&mut self, addr: &Address) -> bool {
        let octets = addr.as_bytes();
        self.bytes
            .iter_mut()
            .zip(octets.iter())
            .all(|(bm, &b)| bm.push_back(b))
    }

    fn append(&mut self, n: u64, bit: bool) -> bool {
        self.bytes.iter_mut().all(|bm| bm.append(n, bit))
    }

    fn size(&self) -> u64 {
        self.bytes[0].size()
    }

    fn lookup(&self, op: RelOp, addr: &Address) -> Result<Option<Bitstream>> {
        match op {
            RelOp::Eq | RelOp::Ne => {}
            _ => {
                return Err(Error::new(
                    ErrorKind::UnsupportedQuery,
                    format!("address index does not support operator {}", op.symbol()),
                ))
            }
        }
        let octets = addr.as_bytes();
        let mut result: Option<Bitstream> = None;
        for (bm, &b) in self.bytes.iter().zip(octets.iter()) {
            match bm.lookup(RelOp::Eq, b)? {
                Some(bs) => {
                    result = Some(match result {
                        Some(acc) => &acc & &bs,
                        None => bs,
                    });
                }
                None => {
                    result = None;
                    break;
                }
            }
        }
        match op {
            RelOp::Eq => Ok(result),
            RelOp::Ne => {
                let valid = self.bytes[0].valid();
                match result {
                    Some(mut bs) => {
                        bs.flip();
                        Ok(Some(&bs & valid))
                    }
                    None => Ok(Some(valid.clone())),
                }
            }
            _ => unreachable!(),
        }
    }
}

impl Default for AddressIndex {
    fn default() -> Self {
        AddressIndex::new()
    }
}

/// Range-coded port number plus equality-coded transport protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortIndex {
    num: Bitmap<RangeCoder<u16>>,
    proto: Bitmap<EqualityCoder<PortProto>>,
}

impl PortIndex {
    pub fn new() -> Self {
        PortIndex::default()
    }

    fn push_back(&mut self, port: &Port) -> bool {
        self.num.push_back(port.number) && self.proto.push_back(port.proto)
    }

    fn lookup(&self, op: RelOp, port: &Port) -> Result<Option<Bitstream>> {
        let result = match self.num.lookup(op, port.number)? {
            Some(bs) => bs,
            None => return Ok(None),
        };
        if port.proto == PortProto::Unknown {
            return Ok(Some(result));
        }
        match self.proto.lookup(RelOp::Eq, port.proto)? {
            Some(mask) => Ok(Some(&result & &mask)),
            None => Ok(None),
        }
    }
}

/// Per-element-position child indexes over set/vector values. A lookup
/// matches when the value matches at any indexed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerIndex {
    kind: TypeKind,
    opts: IndexOptions,
    /// One slot per element position; positions holding nested
    /// containers or records stay unindexed.
    elements: Vec<Option<ValueIndex>>,
    rows: u64,
}

impl ContainerIndex {
    pub fn new(kind: TypeKind, opts: IndexOptions) -> Self {
        ContainerIndex {
            kind,
            opts,
            elements: Vec::new(),
            rows: 0,
        }
    }

    fn push_back(&mut self, elements: &[Value]) -> Result<bool> {
        let row = self.rows;
        for (i, elem) in elements
            .iter()
            .enumerate()
            .take(self.opts.max_container_elements)
        {
            if elem.kind().is_container() || elem.kind() == TypeKind::Record {
                continue;
            }
            if self.elements.len() <= i {
                self.elements.resize_with(i + 1, || None);
            }
            if self.elements[i].is_none() {
                self.elements[i] = Some(ValueIndex::for_kind(elem.kind(), self.opts)?);
            }
            if let Some(child) = self.elements[i].as_mut() {
                if child.kind() == elem.kind() {
                    child.push(elem, row)?;
                }
            }
        }
        self.rows += 1;
        Ok(true)
    }

    fn append(&mut self, n: u64, _bit: bool) -> bool {
        // Children are gap-filled lazily on the next push.
        match self.rows.checked_add(n) {
            Some(r) => {
                self.rows = r;
                true
            }
            None => false,
        }
    }

    fn lookup(&self, op: RelOp, x: &Value) -> Result<Option<Bitstream>> {
        let mut result: Option<Bitstream> = None;
        for child in self.elements.iter().flatten() {
            if child.kind() != x.kind() {
                continue;
            }
            if let Some(mut bs) = child.lookup(op, x)? {
                bs.append(self.rows - bs.len(), false);
                result = Some(match result {
                    Some(acc) => &acc | &bs,
                    None => bs,
                });
            }
        }
        Ok(result)
    }
}

/// A per-column bitmap index, specialized by value type. Dispatch is a
/// plain match over the sealed variant set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueIndex {
    Bool(BoolBitmap),
    Int(Bitmap<RangeCoder<i64>>),
    UInt(Bitmap<RangeCoder<u64>>),
    Real(RealIndex),
    Timestamp(Bitmap<RangeCoder<i64>, PrecisionBinner>),
    Duration(Bitmap<RangeCoder<i64>>),
    Str(StringIndex),
    Addr(AddressIndex),
    Port(PortIndex),
    Container(ContainerIndex),
}

impl ValueIndex {
    /// Creates the index variant for a value kind, seeded with one
    /// invalid slot so the identifier space stays 1-based.
    pub fn for_kind(kind: TypeKind, opts: IndexOptions) -> Result<Self> {
        let mut index = match kind {
            TypeKind::Bool => ValueIndex::Bool(BoolBitmap::new()),
            TypeKind::Int => ValueIndex::Int(Bitmap::new()),
            TypeKind::UInt => ValueIndex::UInt(Bitmap::new()),
            TypeKind::Real => ValueIndex::Real(RealIndex::new()),
            TypeKind::Timestamp => {
                ValueIndex::Timestamp(Bitmap::with_binner(PrecisionBinner::seconds()))
            }
            TypeKind::Duration => ValueIndex::Duration(Bitmap::new()),
            TypeKind::Str => ValueIndex::Str(StringIndex::new(opts.max_string_size)),
            TypeKind::Addr => ValueIndex::Addr(AddressIndex::new()),
            TypeKind::Port => ValueIndex::Port(PortIndex::new()),
            TypeKind::Set | TypeKind::Vector => {
                ValueIndex::Container(ContainerIndex::new(kind, opts))
            }
            TypeKind::Table | TypeKind::Record => {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("no value index for type kind {:?}", kind),
                ))
            }
        };
        index.append(1, false);
        Ok(index)
    }

    pub fn kind(&self) -> TypeKind {
        match self {
            ValueIndex::Bool(_) => TypeKind::Bool,
            ValueIndex::Int(_) => TypeKind::Int,
            ValueIndex::UInt(_) => TypeKind::UInt,
            ValueIndex::Real(_) => TypeKind::Real,
            ValueIndex::Timestamp(_) => TypeKind::Timestamp,
            ValueIndex::Duration(_) => TypeKind::Duration,
            ValueIndex::Str(_) => TypeKind::Str,
            ValueIndex::Addr(_) => TypeKind::Addr,
            ValueIndex::Port(_) => TypeKind::Port,
            ValueIndex::Container(c) => c.kind,
        }
    }

    /// Number of rows covered, including gap rows.
    pub fn size(&self) -> u64 {
        match self {
            ValueIndex::Bool(bm) => bm.size(),
            ValueIndex::Int(bm) => bm.size(),
            ValueIndex::UInt(bm) => bm.size(),
            ValueIndex::Real(idx) => idx.map.size(),
            ValueIndex::Timestamp(bm) => bm.size(),
            ValueIndex::Duration(bm) => bm.size(),
            ValueIndex::Str(idx) => idx.map.size(),
            ValueIndex::Addr(idx) => idx.size(),
            ValueIndex::Port(idx) => idx.num.size(),
            ValueIndex::Container(idx) => idx.rows,
        }
    }

    pub fn append(&mut self, n: u64, bit: bool) -> bool {
        match self {
            ValueIndex::Bool(bm) => bm.append(n, bit),
            ValueIndex::Int(bm) => bm.append(n, bit),
            ValueIndex::UInt(bm) => bm.append(n, bit),
            ValueIndex::Real(idx) => idx.map.append(n, bit),
            ValueIndex::Timestamp(bm) => bm.append(n, bit),
            ValueIndex::Duration(bm) => bm.append(n, bit),
            ValueIndex::Str(idx) => idx.map.append(n, bit),
            ValueIndex::Addr(idx) => idx.append(n, bit),
            ValueIndex::Port(idx) => idx.num.append(n, bit) && idx.proto.append(n, bit),
            ValueIndex::Container(idx) => idx.append(n, bit),
        }
    }

    /// Writes `value` at position `id`, gap-filling the rows in between.
    /// IDs must arrive in ascending order.
    pub fn push(&mut self, value: &Value, id: u64) -> Result<bool> {
        let size = self.size();
        if id < size {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("id {} below index size {}", id, size),
            ));
        }
        if !self.append(id - size, false) {
            return Ok(false);
        }
        self.push_value(value)
    }

    fn push_value(&mut self, value: &Value) -> Result<bool> {
        let ok = match (self, value) {
            (ValueIndex::Bool(bm), Value::Bool(x)) => bm.push_back(*x),
            (ValueIndex::Int(bm), Value::Int(x)) => bm.push_back(*x),
            (ValueIndex::UInt(bm), Value::UInt(x)) => bm.push_back(*x),
            (ValueIndex::Real(idx), Value::Real(x)) => idx.push_back(*x),
            (ValueIndex::Timestamp(bm), Value::Timestamp(x)) => bm.push_back(*x),
            (ValueIndex::Duration(bm), Value::Duration(x)) => bm.push_back(*x),
            (ValueIndex::Str(idx), Value::Str(x)) => idx.push_back(x),
            (ValueIndex::Addr(idx), Value::Addr(x)) => idx.push_back(x),
            (ValueIndex::Port(idx), Value::Port(x)) => idx.push_back(x),
            (ValueIndex::Container(idx), Value::Set(xs))
            | (ValueIndex::Container(idx), Value::Vector(xs)) => {
                return idx.push_back(xs);
            }
            (index, value) => {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!(
                        "value of kind {:?} does not fit index of kind {:?}",
                        value.kind(),
                        index.kind()
                    ),
                ))
            }
        };
        Ok(ok)
    }

    /// The bitstream of valid rows whose value satisfies `op value`.
    pub fn lookup(&self, op: RelOp, value: &Value) -> Result<Option<Bitstream>> {
        match (self, value) {
            (ValueIndex::Bool(bm), Value::Bool(x)) => bm.lookup(op, *x),
            (ValueIndex::Int(bm), Value::Int(x)) => bm.lookup(op, *x),
            (ValueIndex::UInt(bm), Value::UInt(x)) => bm.lookup(op, *x),
            (ValueIndex::Real(idx), Value::Real(x)) => idx.lookup(op, *x),
            (ValueIndex::Timestamp(bm), Value::Timestamp(x)) => bm.lookup(op, *x),
            (ValueIndex::Duration(bm), Value::Duration(x)) => bm.lookup(op, *x),
            (ValueIndex::Str(idx), Value::Str(x)) => idx.lookup(op, x),
            (ValueIndex::Addr(idx), Value::Addr(x)) => idx.lookup(op, x),
            (ValueIndex::Port(idx), Value::Port(x)) => idx.lookup(op, x),
            (ValueIndex::Container(idx), x) => idx.lookup(op, x),
            (index, value) => Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "cannot look up value of kind {:?} in index of kind {:?}",
                    value.kind(),
                    index.kind()
                ),
            )),
        }
    }
}
