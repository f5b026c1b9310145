use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compression::compress::CompressedBlock;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Event, RecordType};

/// Unique segment identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub Uuid);

impl SegmentId {
    pub fn new() -> Self {
        SegmentId(Uuid::new_v4())
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        SegmentId::new()
    }
}

/// The set of distinct record types seen by a segment. Interning returns
/// the canonical handle, so equal types also compare equal by pointer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    types: Vec<Arc<RecordType>>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn intern(&mut self, ty: &Arc<RecordType>) -> Arc<RecordType> {
        if let Some(existing) = self.types.iter().find(|t| ***t == **ty) {
            return existing.clone();
        }
        self.types.push(ty.clone());
        ty.clone()
    }

    /// The canonical handle for an equal type, if the schema knows one.
    pub fn canonical(&self, ty: &RecordType) -> Option<Arc<RecordType>> {
        self.types.iter().find(|t| ***t == *ty).cloned()
    }

    pub fn find_type(&self, name: &str) -> Option<Arc<RecordType>> {
        self.types.iter().find(|t| t.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.types.len() == other.types.len()
            && self
                .types
                .iter()
                .zip(other.types.iter())
                .all(|(a, b)| **a == **b)
    }
}

/// One serialized, compressed batch of events. The chunk records the ID
/// of its first event, so identifier gaps between chunks are tolerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub base: u64,
    pub events: u32,
    pub block: CompressedBlock,
}

impl Chunk {
    /// Decompresses the chunk and re-interns event types against the
    /// segment schema, restoring pointer identity.
    pub fn decode(&self, schema: &Schema) -> Result<Vec<Event>> {
        let bytes = self.block.decompress()?;
        let mut events: Vec<Event> = bincode::deserialize(&bytes)?;
        for event in &mut events {
            if let Some(canonical) = schema.canonical(&event.ty) {
                event.ty = canonical;
            }
        }
        Ok(events)
    }
}

/// Byte placement of one chunk in a segment file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkEntry {
    base: u64,
    events: u32,
    offset: u64,
    len: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentFileHeader {
    id: SegmentId,
    base: u64,
    events_total: u64,
    schema: Schema,
    chunks: Vec<ChunkEntry>,
}

/// An immutable, chunked container of events.
///
/// Events appear in insertion order; each chunk knows the ID of its
/// first event and its event count, which gives random access by ID via
/// a binary search over the chunk table.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: SegmentId,
    base: u64,
    events_total: u64,
    schema: Schema,
    chunks: Vec<Chunk>,
}

const MAGIC: u32 = 0x4556_5347; // "EVSG"
const VERSION: u32 = 1;

impl Segment {
    pub fn new(base: u64) -> Self {
        Segment {
            id: SegmentId::new(),
            base,
            events_total: 0,
            schema: Schema::new(),
            chunks: Vec::new(),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn events(&self) -> u64 {
        self.events_total
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// One past the highest ID any chunk covers.
    pub fn id_end(&self) -> u64 {
        self.chunks
            .last()
            .map(|c| c.base + c.events as u64)
            .unwrap_or(self.base)
    }

    pub(crate) fn push_chunk(&mut self, chunk: Chunk) {
        self.events_total += chunk.events as u64;
        self.chunks.push(chunk);
    }

    /// Index of the chunk containing `id`, by binary search over the
    /// per-chunk ID bases.
    pub fn chunk_for(&self, id: u64) -> Option<usize> {
        let idx = match self.chunks.binary_search_by_key(&id, |c| c.base) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let chunk = &self.chunks[idx];
        if id < chunk.base + chunk.events as u64 {
            Some(idx)
        } else {
            None
        }
    }

    /// One-shot read of the event with the given ID.
    pub fn load(&self, id: u64) -> Result<Option<Event>> {
        let mut reader = crate::storage::segment_reader::SegmentReader::new(self);
        reader.read_at(id)
    }

    /// Approximate compressed payload size in bytes.
    pub fn bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.block.data.len() as u64).sum()
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let mut region = Vec::new();
        let mut entries = Vec::with_capacity(self.chunks.len());
        for chunk in &self.chunks {
            let offset = region.len() as u64;
            let bytes = bincode::serialize(&chunk.block)?;
            region.extend_from_slice(&bytes);
            entries.push(ChunkEntry {
                base: chunk.base,
                events: chunk.events,
                offset,
                len: bytes.len() as u64,
            });
        }

        let mut hasher = Hasher::new();
        hasher.update(&region);
        let checksum = hasher.finalize();

        let header = SegmentFileHeader {
            id: self.id,
            base: self.base,
            events_total: self.events_total,
            schema: self.schema.clone(),
            chunks: entries,
        };
        let header_bytes = bincode::serialize(&header)?;

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&MAGIC.to_le_bytes())?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&checksum.to_le_bytes())?;
        writer.write_all(&(header_bytes.len() as u32).to_le_bytes())?;
        writer.write_all(&header_bytes)?;
        writer.write_all(&region)?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        Ok(())
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;

        let mut word = [0u8; 4];
        file.read_exact(&mut word)?;
        if u32::from_le_bytes(word) != MAGIC {
            return Err(Error::new(
                ErrorKind::Corruption,
                format!("not a segment file: {}", path.display()),
            ));
        }
        file.read_exact(&mut word)?;
        if u32::from_le_bytes(word) != VERSION {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "incompatible segment version",
            ));
        }
        file.read_exact(&mut word)?;
        let checksum = u32::from_le_bytes(word);
        file.read_exact(&mut word)?;
        let header_len = u32::from_le_bytes(word) as usize;

        let mut header_bytes = vec![0u8; header_len];
        file.read_exact(&mut header_bytes)?;
        let header: SegmentFileHeader = bincode::deserialize(&header_bytes)
            .map_err(|e| Error::new(ErrorKind::Corruption, format!("segment header: {}", e)))?;

        let mut region = Vec::new();
        file.read_to_end(&mut region)?;
        let mut hasher = Hasher::new();
        hasher.update(&region);
        if hasher.finalize() != checksum {
            return Err(Error::new(
                ErrorKind::Corruption,
                format!("segment checksum mismatch: {}", path.display()),
            ));
        }

        let mut chunks = Vec::with_capacity(header.chunks.len());
        for entry in &header.chunks {
            let start = entry.offset as usize;
            let end = start + entry.len as usize;
            let slice = region.get(start..end).ok_or_else(|| {
                Error::new(ErrorKind::Corruption, "chunk table points past region end")
            })?;
            let block: CompressedBlock = bincode::deserialize(slice)?;
            chunks.push(Chunk {
                base: entry.base,
                events: entry.events,
                block,
            });
        }

        Ok(Segment {
            id: header.id,
            base: header.base,
            events_total: header.events_total,
            schema: header.schema,
            chunks,
        })
    }
}
