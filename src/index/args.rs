use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::bitmap::RelOp;
use crate::bitstream::Bitstream;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Event, Offset, Record, TypeKind, Value};
use crate::index::value_index::{IndexOptions, ValueIndex};

/// A value index shared between the offset table and the by-type table.
/// The owning partition is the only writer.
pub type SharedValueIndex = Arc<RwLock<ValueIndex>>;

const FILE_PREFIX: &str = "@";
const FILE_SUFFIX: &str = ".idx";

/// Per-partition index over record-field values, keyed by field offset
/// and grouped by type kind. Nested records are expanded recursively;
/// table-typed fields are not indexed.
pub struct ArgIndex {
    opts: IndexOptions,
    args: BTreeMap<Offset, SharedValueIndex>,
    types: HashMap<TypeKind, Vec<SharedValueIndex>>,
}

impl ArgIndex {
    pub fn new(opts: IndexOptions) -> Self {
        ArgIndex {
            opts,
            args: BTreeMap::new(),
            types: HashMap::new(),
        }
    }

    pub fn num_offsets(&self) -> usize {
        self.args.len()
    }

    /// Indexes every leaf field of the event's record at the event's ID.
    pub fn index(&mut self, event: &Event) -> Result<bool> {
        if event.data.is_empty() {
            return Ok(true);
        }
        let mut offset = Offset::new(vec![0]);
        self.index_record(&event.data, event.id.0, &mut offset)
    }

    fn index_record(&mut self, record: &Record, id: u64, offset: &mut Offset) -> Result<bool> {
        if offset.is_empty() {
            return Ok(true);
        }
        for value in &record.0 {
            if let Value::Record(inner) = value {
                if !inner.is_empty() {
                    offset.push(0);
                    if !self.index_record(inner, id, offset)? {
                        return Ok(false);
                    }
                    offset.pop();
                }
            } else if value.kind() != TypeKind::Table {
                let handle = match self.args.get(offset) {
                    Some(handle) => handle.clone(),
                    None => {
                        let index = ValueIndex::for_kind(value.kind(), self.opts)?;
                        let handle = Arc::new(RwLock::new(index));
                        self.args.insert(offset.clone(), handle.clone());
                        self.types
                            .entry(value.kind())
                            .or_default()
                            .push(handle.clone());
                        handle
                    }
                };
                if !handle.write().push(value, id)? {
                    return Ok(false);
                }
            }
            offset.bump();
        }
        Ok(true)
    }

    /// Looks up `op value` in the index at `offset`. An unknown offset
    /// yields no result.
    pub fn lookup_offset(
        &self,
        offset: &Offset,
        op: RelOp,
        value: &Value,
    ) -> Result<Option<Bitstream>> {
        match self.args.get(offset) {
            Some(handle) => handle.read().lookup(op, value),
            None => Ok(None),
        }
    }

    /// Looks up `op value` across every index of the value's kind: the
    /// union answers "the value appears at any offset of this type".
    pub fn lookup_type(&self, kind: TypeKind, op: RelOp, value: &Value) -> Result<Option<Bitstream>> {
        let indexes = match self.types.get(&kind) {
            Some(indexes) => indexes,
            None => return Ok(None),
        };
        let mut result: Option<Bitstream> = None;
        for handle in indexes {
            if let Some(mut bs) = handle.read().lookup(op, value)? {
                result = Some(match result {
                    Some(acc) => {
                        // Offsets grow at different rates; pad before OR.
                        let len = acc.len().max(bs.len());
                        let mut acc = acc;
                        acc.append(len - acc.len(), false);
                        bs.append(len - bs.len(), false);
                        &acc | &bs
                    }
                    None => bs,
                });
            }
        }
        Ok(result)
    }

    /// Writes one `@<offset>.idx` file per non-empty offset index.
    /// Rewrites in place, so a partially completed store can be replayed.
    pub fn store(&self, dir: &Path) -> Result<()> {
        for (offset, handle) in &self.args {
            let index = handle.read();
            if index.size() <= 1 {
                continue;
            }
            let filename = dir.join(format!("{}{}{}", FILE_PREFIX, offset, FILE_SUFFIX));
            let writer = BufWriter::new(File::create(&filename)?);
            bincode::serialize_into(writer, &(index.kind(), &*index))?;
            debug!(
                offset = %offset,
                events = index.size() - 1,
                "stored argument index"
            );
        }
        Ok(())
    }

    /// Loads every `@<offset>.idx` file in `dir`, rebuilding the by-type
    /// table by grouping the loaded indexes.
    pub fn load(dir: &Path, opts: IndexOptions) -> Result<Self> {
        let mut index = ArgIndex::new(opts);
        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .collect();
        entries.sort();
        for path in entries {
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            let stem = match name
                .strip_prefix(FILE_PREFIX)
                .and_then(|s| s.strip_suffix(FILE_SUFFIX))
            {
                Some(stem) => stem,
                None => continue,
            };
            let offset: Offset = stem.parse().map_err(|_| {
                error!(file = name, "invalid offset in argument index filename");
                Error::new(ErrorKind::Corruption, format!("invalid offset: {}", name))
            })?;
            let reader = BufReader::new(File::open(&path)?);
            let (kind, value_index): (TypeKind, ValueIndex) = bincode::deserialize_from(reader)
                .map_err(|e| {
                    error!(file = name, "corrupt argument index");
                    Error::new(ErrorKind::Corruption, format!("index {}: {}", name, e))
                })?;
            debug!(
                offset = %offset,
                events = value_index.size().saturating_sub(1),
                "loaded argument index"
            );
            let handle = Arc::new(RwLock::new(value_index));
            index.args.insert(offset, handle.clone());
            index.types.entry(kind).or_default().push(handle);
        }
        Ok(index)
    }
}
