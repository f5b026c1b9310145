use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::bitstream::Bitstream;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Event;
use crate::storage::layout::StorageLayout;
use crate::storage::segment::{Segment, SegmentId};

/// Placement of one sealed segment in the identifier space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub base: u64,
    pub id_end: u64,
    pub events: u64,
    pub segment: SegmentId,
}

/// The archive: owns sealed segments on disk, an LRU of open segments,
/// and an LRU of decompressed chunks for mask-driven extraction.
pub struct SegmentStore {
    layout: Arc<StorageLayout>,
    manifest: RwLock<Vec<ManifestEntry>>,
    segments: Mutex<LruCache<SegmentId, Arc<Segment>>>,
    chunks: Mutex<LruCache<(SegmentId, usize), Arc<Vec<Event>>>>,
}

impl SegmentStore {
    pub fn open(layout: Arc<StorageLayout>, cache_size: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(cache_size.max(1)).expect("non-zero cache size");
        let manifest_path = layout.segment_manifest_path();
        let manifest = if manifest_path.exists() {
            let reader = BufReader::new(File::open(&manifest_path)?);
            bincode::deserialize_from(reader).map_err(|e| {
                error!("corrupt segment manifest: {}", e);
                Error::new(ErrorKind::Corruption, format!("segment manifest: {}", e))
            })?
        } else {
            Vec::new()
        };
        Ok(SegmentStore {
            layout,
            manifest: RwLock::new(manifest),
            segments: Mutex::new(LruCache::new(capacity)),
            chunks: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn num_segments(&self) -> usize {
        self.manifest.read().len()
    }

    /// Seals a segment: writes it to disk, registers it in the manifest,
    /// and keeps it warm in the cache.
    pub fn add(&self, segment: Segment) -> Result<()> {
        let path = self.layout.segment_path(&segment.id);
        segment.store(&path)?;
        debug!(
            segment = %segment.id.0,
            events = segment.events(),
            "sealed segment"
        );
        let entry = ManifestEntry {
            base: segment.base(),
            id_end: segment.id_end(),
            events: segment.events(),
            segment: segment.id,
        };
        {
            let mut manifest = self.manifest.write();
            manifest.push(entry);
            manifest.sort_by_key(|e| e.base);
            let writer = BufWriter::new(File::create(self.layout.segment_manifest_path())?);
            bincode::serialize_into(writer, &*manifest)?;
        }
        self.segments
            .lock()
            .put(segment.id, Arc::new(segment));
        Ok(())
    }

    /// The manifest entry whose ID range covers `id`.
    fn entry_for(&self, id: u64) -> Option<ManifestEntry> {
        let manifest = self.manifest.read();
        let idx = match manifest.binary_search_by_key(&id, |e| e.base) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let entry = manifest[idx];
        (id < entry.id_end).then_some(entry)
    }

    /// Fetches a sealed segment through the cache.
    pub fn get(&self, id: SegmentId) -> Result<Arc<Segment>> {
        if let Some(segment) = self.segments.lock().get(&id) {
            return Ok(segment.clone());
        }
        let segment = Arc::new(Segment::load_file(&self.layout.segment_path(&id))?);
        self.segments.lock().put(id, segment.clone());
        Ok(segment)
    }

    /// Decompresses a chunk through the chunk cache.
    fn chunk_events(&self, segment: &Arc<Segment>, chunk_idx: usize) -> Result<Arc<Vec<Event>>> {
        let key = (segment.id, chunk_idx);
        if let Some(events) = self.chunks.lock().get(&key) {
            return Ok(events.clone());
        }
        let events = Arc::new(segment.chunks()[chunk_idx].decode(segment.schema())?);
        self.chunks.lock().put(key, events.clone());
        Ok(events)
    }

    /// One-shot read of the event with the given ID from the archive.
    pub fn load_event(&self, id: u64) -> Result<Option<Event>> {
        let entry = match self.entry_for(id) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let segment = self.get(entry.segment)?;
        let chunk_idx = match segment.chunk_for(id) {
            Some(idx) => idx,
            None => return Ok(None),
        };
        let events = self.chunk_events(&segment, chunk_idx)?;
        let offset = (id - segment.chunks()[chunk_idx].base) as usize;
        Ok(events.get(offset).cloned())
    }

    /// Streams exactly the events whose IDs are set in `mask`, in
    /// ascending ID order. IDs outside every sealed segment are skipped.
    pub fn extract(&self, mask: &Bitstream) -> Result<Vec<Event>> {
        let mut result = Vec::new();
        for id in mask.ones() {
            if let Some(event) = self.load_event(id)? {
                result.push(event);
            }
        }
        Ok(result)
    }
}
