use std::mem;

use crate::compression::compress::{CompressedBlock, CompressionType};
use crate::core::error::Result;
use crate::core::types::Event;
use crate::storage::segment::{Chunk, Segment};

/// Writes events into exactly one segment at a time.
///
/// Events accumulate in an in-memory buffer; every `chunk_size` events
/// the buffer is serialized, compressed, and pushed onto the segment as
/// one chunk. A size-capped segment refuses further writes; the caller
/// rotates by attaching the writer to a fresh segment, which keeps any
/// pending events.
pub struct SegmentWriter {
    chunk_size: usize,
    max_bytes: Option<u64>,
    compression: CompressionType,
    segment: Segment,
    buffer: Vec<Event>,
}

impl SegmentWriter {
    pub fn new(segment: Segment, chunk_size: usize, compression: CompressionType) -> Self {
        SegmentWriter {
            chunk_size: chunk_size.max(1),
            max_bytes: None,
            compression,
            segment,
            buffer: Vec::new(),
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Events written but not yet emitted as a chunk.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `Ok(false)` when the segment has reached its size cap;
    /// the event is not consumed and the caller must attach a fresh
    /// segment.
    pub fn write(&mut self, event: &Event) -> Result<bool> {
        if let Some(cap) = self.max_bytes {
            if self.segment.bytes() >= cap {
                return Ok(false);
            }
        }
        let mut event = event.clone();
        event.ty = self.segment.schema_mut().intern(&event.ty);
        self.buffer.push(event);
        if self.buffer.len() >= self.chunk_size {
            self.emit()?;
        }
        Ok(true)
    }

    /// ID of the oldest pending event, if any.
    pub fn pending_first_id(&self) -> Option<u64> {
        self.buffer.first().map(|e| e.id.0)
    }

    /// Forces emission of a partial chunk.
    pub fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.emit()?;
        }
        Ok(())
    }

    /// Re-targets the writer to `other`; pending events stay in the
    /// writer and flush into the new segment. Returns the previous
    /// segment.
    pub fn attach_to(&mut self, other: Segment) -> Segment {
        mem::replace(&mut self.segment, other)
    }

    pub fn finish(mut self) -> Result<Segment> {
        self.flush()?;
        Ok(self.segment)
    }

    fn emit(&mut self) -> Result<()> {
        let base = self.buffer[0].id.0;
        let events = self.buffer.len() as u32;
        let bytes = bincode::serialize(&self.buffer)?;
        let block = CompressedBlock::compress(&bytes, self.compression)?;
        self.segment.push_chunk(Chunk {
            base,
            events,
            block,
        });
        self.buffer.clear();
        Ok(())
    }
}
