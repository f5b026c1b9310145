use crate::core::error::Result;
use crate::core::types::Event;
use crate::storage::segment::Segment;

/// Sequential and random-access reads over one segment.
///
/// The cursor is a `(chunk, offset)` pair; at most one chunk is held
/// decompressed at a time.
pub struct SegmentReader<'a> {
    segment: &'a Segment,
    chunk_idx: usize,
    pos: usize,
    current: Option<(usize, Vec<Event>)>,
}

impl<'a> SegmentReader<'a> {
    pub fn new(segment: &'a Segment) -> Self {
        SegmentReader {
            segment,
            chunk_idx: 0,
            pos: 0,
            current: None,
        }
    }

    /// Reads the next event in insertion order, or `None` at the end.
    pub fn read(&mut self) -> Result<Option<Event>> {
        loop {
            let chunks = self.segment.chunks();
            if self.chunk_idx >= chunks.len() {
                return Ok(None);
            }
            if self.pos >= chunks[self.chunk_idx].events as usize {
                self.chunk_idx += 1;
                self.pos = 0;
                continue;
            }
            let (chunk_idx, pos) = (self.chunk_idx, self.pos);
            let event = self.chunk_events(chunk_idx)?[pos].clone();
            self.pos += 1;
            return Ok(Some(event));
        }
    }

    /// Positions the cursor on `id`. Fails without moving the cursor if
    /// no chunk covers the ID.
    pub fn seek(&mut self, id: u64) -> bool {
        match self.segment.chunk_for(id) {
            Some(chunk_idx) => {
                let base = self.segment.chunks()[chunk_idx].base;
                self.chunk_idx = chunk_idx;
                self.pos = (id - base) as usize;
                true
            }
            None => false,
        }
    }

    /// Reads the event with exactly the given ID, or `None` when the
    /// segment does not cover it.
    pub fn read_at(&mut self, id: u64) -> Result<Option<Event>> {
        if !self.seek(id) {
            return Ok(None);
        }
        self.read()
    }

    /// Decompresses the chunk on demand, keeping only the current one.
    fn chunk_events(&mut self, chunk_idx: usize) -> Result<&Vec<Event>> {
        let stale = match &self.current {
            Some((idx, _)) => *idx != chunk_idx,
            None => true,
        };
        if stale {
            let events = self.segment.chunks()[chunk_idx].decode(self.segment.schema())?;
            self.current = Some((chunk_idx, events));
        }
        Ok(&self.current.as_ref().expect("current chunk").1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::compress::CompressionType;
    use crate::core::types::{Event, EventId, Record, RecordType, Value};
    use crate::storage::segment_writer::SegmentWriter;
    use std::sync::Arc;

    fn test_type() -> Arc<RecordType> {
        Arc::new(RecordType::new("test", vec![]))
    }

    fn event(ty: &Arc<RecordType>, id: u64, payload: u64) -> Event {
        let mut e = Event::new(
            ty.clone(),
            Record::new(vec![Value::UInt(payload)]),
            payload as i64,
        );
        e.id = EventId(id);
        e
    }

    fn build_segment(base: u64, count: u64, chunk_size: usize) -> Segment {
        let ty = test_type();
        let mut writer = SegmentWriter::new(Segment::new(base), chunk_size, CompressionType::Lz4);
        for i in 0..count {
            assert!(writer.write(&event(&ty, base + i, i)).unwrap());
        }
        writer.finish().unwrap()
    }

    #[test]
    fn sequential_read_round_trip() {
        // 1124 events over 256-event chunks leaves a 100-event tail.
        let segment = build_segment(0, 1124, 256);
        assert_eq!(segment.events(), 1124);
        assert_eq!(segment.chunks().len(), 5);

        let mut reader = SegmentReader::new(&segment);
        let mut n = 0u64;
        while let Some(e) = reader.read().unwrap() {
            assert_eq!(e.data.0[0], Value::UInt(n));
            n += 1;
        }
        assert_eq!(n, 1124);
    }

    #[test]
    fn seek_across_chunks() {
        let segment = build_segment(1000, 1024, 256);
        let mut reader = SegmentReader::new(&segment);

        assert!(reader.seek(1042));
        assert_eq!(reader.read().unwrap().unwrap().id, EventId(1042));

        assert!(reader.seek(1010));
        assert_eq!(reader.read().unwrap().unwrap().id, EventId(1010));

        assert!(!reader.seek(10));
        assert!(!reader.seek(999));
        assert!(!reader.seek(2024));

        assert!(reader.seek(1720));
        assert_eq!(reader.read().unwrap().unwrap().id, EventId(1720));

        assert!(reader.seek(2023));
        assert_eq!(reader.read().unwrap().unwrap().id, EventId(2023));
    }

    #[test]
    fn failed_seek_leaves_cursor_unchanged() {
        let segment = build_segment(1000, 512, 128);
        let mut reader = SegmentReader::new(&segment);
        assert!(reader.seek(1100));
        assert!(!reader.seek(5000));
        // The next read continues from the successful seek.
        assert_eq!(reader.read().unwrap().unwrap().id, EventId(1100));
    }

    #[test]
    fn one_shot_load() {
        let segment = build_segment(42, 256, 10);
        let first = segment.load(42).unwrap().unwrap();
        assert_eq!(first.id, EventId(42));
        assert_eq!(first.data.0[0], Value::UInt(0));

        let mid = segment.load(42 + 100).unwrap().unwrap();
        assert_eq!(mid.data.0[0], Value::UInt(100));

        assert!(segment.load(41).unwrap().is_none());
        assert!(segment.load(42 + 256).unwrap().is_none());
    }

    #[test]
    fn schema_interning_survives_round_trip() {
        let segment = build_segment(0, 100, 10);
        assert_eq!(segment.schema().len(), 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.seg");
        segment.store(&path).unwrap();
        let loaded = Segment::load_file(&path).unwrap();
        assert_eq!(loaded, segment);
        assert_eq!(loaded.schema().len(), 1);

        // Decoded events share the canonical type handle by identity.
        let mut reader = SegmentReader::new(&loaded);
        let a = reader.read().unwrap().unwrap();
        let b = reader.read().unwrap().unwrap();
        assert_eq!(a.ty, b.ty);
        assert!(Arc::ptr_eq(&a.ty, &b.ty));
        let canonical = loaded.schema().find_type("test").unwrap();
        assert!(Arc::ptr_eq(&a.ty, &canonical));
    }

    #[test]
    fn corrupted_file_is_detected() {
        let segment = build_segment(0, 64, 16);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.seg");
        segment.store(&path).unwrap();

        // Flip a byte in the chunk region.
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let err = Segment::load_file(&path).unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::Corruption);
    }

    #[test]
    fn writer_attach_keeps_pending_events() {
        let ty = test_type();
        let mut writer = SegmentWriter::new(Segment::new(0), 256, CompressionType::Lz4);
        for i in 0..1124u64 {
            assert!(writer.write(&event(&ty, i, i)).unwrap());
        }
        writer.flush().unwrap();
        assert_eq!(writer.segment().events(), 1124);

        // 50 more events stay pending, then flush into a fresh segment.
        for i in 0..50u64 {
            assert!(writer.write(&event(&ty, 2000 + i, i)).unwrap());
        }
        let first = writer.attach_to(Segment::new(2000));
        assert_eq!(first.events(), 1124);
        writer.flush().unwrap();
        assert_eq!(writer.segment().events(), 50);
    }

    #[test]
    fn size_cap_refuses_writes() {
        let ty = test_type();
        let mut writer = SegmentWriter::new(Segment::new(0), 8, CompressionType::None)
            .with_max_bytes(256);
        let mut accepted = 0u64;
        loop {
            if !writer.write(&event(&ty, accepted, accepted)).unwrap() {
                break;
            }
            accepted += 1;
            assert!(accepted < 10_000, "cap never reached");
        }
        // Rotation to a fresh segment accepts the event again.
        let sealed = writer.attach_to(Segment::new(accepted));
        assert!(sealed.events() > 0);
        assert!(writer.write(&event(&ty, accepted, accepted)).unwrap());
    }
}
