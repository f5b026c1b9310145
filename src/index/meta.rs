use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bitmap::{Bitmap, EqualityCoder, PrecisionBinner, RangeCoder, RelOp};
use crate::bitstream::Bitstream;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Event;

pub const TIMESTAMP_FILE: &str = "timestamp.idx";
pub const NAME_FILE: &str = "name.idx";

/// Per-partition index over event-level attributes: a range-coded,
/// second-binned timestamp bitmap and an equality-coded name bitmap.
/// Both share the partition's identifier space and carry the invalid
/// slot for ID 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaIndex {
    timestamp: Bitmap<RangeCoder<i64>, PrecisionBinner>,
    name: Bitmap<EqualityCoder<String>>,
}

impl MetaIndex {
    pub fn new() -> Self {
        let mut timestamp = Bitmap::with_binner(PrecisionBinner::seconds());
        let mut name = Bitmap::new();
        // ID 0 is not a valid event.
        timestamp.append(1, false);
        name.append(1, false);
        MetaIndex { timestamp, name }
    }

    /// Rows covered, including the invalid slot and gap rows.
    pub fn size(&self) -> u64 {
        self.timestamp.size()
    }

    /// Indexes one event at its externally assigned ID. IDs must arrive
    /// in ascending order; holes are gap-filled.
    pub fn index(&mut self, event: &Event) -> Result<bool> {
        let id = event.id.0;
        let size = self.size();
        if id < size {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("event id {} below meta index size {}", id, size),
            ));
        }
        if !self.timestamp.append(id - size, false) || !self.name.append(id - size, false) {
            return Ok(false);
        }
        Ok(self.timestamp.push_back(event.timestamp)
            && self.name.push_back(event.name().to_string()))
    }

    pub fn lookup_timestamp(&self, op: RelOp, ts: i64) -> Result<Option<Bitstream>> {
        self.timestamp.lookup(op, ts)
    }

    pub fn lookup_name(&self, op: RelOp, name: &str) -> Result<Option<Bitstream>> {
        self.name.lookup(op, name.to_string())
    }

    pub fn store(&self, dir: &Path) -> Result<()> {
        let ts = BufWriter::new(File::create(dir.join(TIMESTAMP_FILE))?);
        bincode::serialize_into(ts, &self.timestamp)?;
        let name = BufWriter::new(File::create(dir.join(NAME_FILE))?);
        bincode::serialize_into(name, &self.name)?;
        debug!(
            events = self.size().saturating_sub(1),
            "stored timestamp/name index"
        );
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let ts = BufReader::new(File::open(dir.join(TIMESTAMP_FILE))?);
        let timestamp = bincode::deserialize_from(ts)
            .map_err(|e| Error::new(ErrorKind::Corruption, format!("timestamp index: {}", e)))?;
        let name = BufReader::new(File::open(dir.join(NAME_FILE))?);
        let name = bincode::deserialize_from(name)
            .map_err(|e| Error::new(ErrorKind::Corruption, format!("name index: {}", e)))?;
        let index = MetaIndex { timestamp, name };
        debug!(
            events = index.size().saturating_sub(1),
            "loaded timestamp/name index"
        );
        Ok(index)
    }
}

impl Default for MetaIndex {
    fn default() -> Self {
        MetaIndex::new()
    }
}
