use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::mem;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Event, EventId};
use crate::index::partition::{Partition, QueryResult};
use crate::index::value_index::IndexOptions;
use crate::query::ast::Expr;
use crate::storage::layout::StorageLayout;
use crate::storage::segment::Segment;
use crate::storage::segment_store::SegmentStore;
use crate::storage::segment_writer::SegmentWriter;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PartitionInfo {
    id: u64,
    events: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreManifest {
    next_id: u64,
    active_partition: u64,
    sealed: Vec<PartitionInfo>,
}

impl Default for StoreManifest {
    fn default() -> Self {
        StoreManifest {
            // ID 0 is reserved; assignment starts at 1.
            next_id: 1,
            active_partition: 0,
            sealed: Vec::new(),
        }
    }
}

/// Materialized query results.
#[derive(Debug, Default)]
pub struct ExportResult {
    pub events: Vec<Event>,
    pub incomplete: bool,
}

/// The root coordinator: assigns identifiers, routes events into the
/// active segment writer and the active partition's indexes, seals both
/// at their configured limits, and fans queries out across partitions.
pub struct EventStore {
    config: Config,
    opts: IndexOptions,
    layout: Arc<StorageLayout>,
    segments: SegmentStore,
    writer: SegmentWriter,
    active: Partition,
    sealed: Vec<PartitionInfo>,
    cache: Mutex<LruCache<u64, Arc<Partition>>>,
    next_id: u64,
    pool: rayon::ThreadPool,
}

impl EventStore {
    pub fn open(config: Config) -> Result<Self> {
        let layout = Arc::new(StorageLayout::new(config.storage_path.clone())?);
        let segments = SegmentStore::open(layout.clone(), config.segments)?;
        let opts = IndexOptions {
            max_string_size: config.max_string_size,
            max_container_elements: config.max_container_elements,
        };

        let manifest_path = layout.store_manifest_path();
        let manifest: StoreManifest = if manifest_path.exists() {
            let reader = BufReader::new(File::open(&manifest_path)?);
            bincode::deserialize_from(reader).map_err(|e| {
                error!("corrupt store manifest: {}", e);
                Error::new(ErrorKind::Corruption, format!("store manifest: {}", e))
            })?
        } else {
            StoreManifest::default()
        };

        let active_dir = layout.partition_dir(manifest.active_partition);
        let active = if active_dir.join("partition.bin").exists() {
            Partition::load(active_dir, opts)?
        } else {
            Partition::new(manifest.active_partition, active_dir, opts)
        };

        let writer = SegmentWriter::new(
            Segment::new(manifest.next_id),
            config.chunk_size,
            config.compression,
        )
        .with_max_bytes(config.max_segment_bytes());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_query_supervisors.max(1))
            .build()
            .map_err(|e| Error::new(ErrorKind::Internal, e.to_string()))?;

        let cache_size =
            NonZeroUsize::new(config.max_in_mem_partitions.max(1)).expect("non-zero cache");

        Ok(EventStore {
            opts,
            layout,
            segments,
            writer,
            active,
            sealed: manifest.sealed,
            cache: Mutex::new(LruCache::new(cache_size)),
            next_id: manifest.next_id,
            pool,
            config,
        })
    }

    /// Total number of indexed events.
    pub fn num_events(&self) -> u64 {
        self.active.events() + self.sealed.iter().map(|p| p.events).sum::<u64>()
    }

    /// Assigns a contiguous ID range to the batch, appends the events to
    /// the active segment, and indexes them into the active partition.
    /// Returns the assigned `(first, last)` range.
    pub fn import(&mut self, batch: Vec<Event>) -> Result<Option<(u64, u64)>> {
        if batch.is_empty() {
            return Ok(None);
        }
        let first = self.next_id;
        for mut event in batch {
            event.id = EventId(self.next_id);
            self.next_id += 1;
            if !self.writer.write(&event)? {
                self.rotate_segment()?;
                if !self.writer.write(&event)? {
                    return Err(Error::new(
                        ErrorKind::Capacity,
                        "fresh segment refused a write",
                    ));
                }
            }
            self.active.index_event(&event)?;
        }
        let last = self.next_id - 1;
        if self.active.events() >= self.config.max_partition_size {
            self.seal_partition()?;
        }
        Ok(Some((first, last)))
    }

    /// Evaluates a predicate across all partitions: the taste set first,
    /// then the remainder in parallel on the query pool. Per-partition
    /// bitstreams are unioned; corruption only degrades the result to
    /// incomplete.
    pub fn lookup(&self, expr: &Expr) -> Result<QueryResult> {
        let mut acc = self.active.lookup(expr)?;

        // Most recent partitions first.
        let ids: Vec<u64> = self.sealed.iter().rev().map(|p| p.id).collect();
        let taste = ids.len().min(self.config.taste_partitions);
        for pid in &ids[..taste] {
            let result = self.query_partition(*pid, expr)?;
            merge(&mut acc, result);
        }

        let rest = &ids[taste..];
        if !rest.is_empty() {
            let results: Vec<Result<QueryResult>> = self.pool.install(|| {
                rest.par_iter()
                    .map(|pid| self.query_partition(*pid, expr))
                    .collect()
            });
            for result in results {
                merge(&mut acc, result?);
            }
        }
        Ok(acc)
    }

    /// Looks up the predicate and materializes the matching events from
    /// the archive, in ascending ID order.
    pub fn export(&mut self, expr: &Expr) -> Result<ExportResult> {
        // Make buffered events chunk-visible before extraction.
        self.writer.flush()?;
        let result = self.lookup(expr)?;
        let mut events = Vec::new();
        for id in result.hits.ones() {
            if let Some(event) = self.segments.load_event(id)? {
                events.push(event);
            } else if let Some(event) = self.writer.segment().load(id)? {
                events.push(event);
            }
        }
        Ok(ExportResult {
            events,
            incomplete: result.incomplete,
        })
    }

    /// Persists all volatile state: seals the active segment, stores the
    /// active partition, and rewrites the manifest. Idempotent.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        if self.writer.segment().events() > 0 {
            let sealed = self.writer.attach_to(Segment::new(self.next_id));
            self.segments.add(sealed)?;
        }
        self.active.store()?;
        self.persist_manifest()?;
        Ok(())
    }

    fn rotate_segment(&mut self) -> Result<()> {
        let base = self.writer.pending_first_id().unwrap_or(self.next_id);
        let sealed = self.writer.attach_to(Segment::new(base));
        if sealed.events() > 0 {
            self.segments.add(sealed)?;
        }
        Ok(())
    }

    fn seal_partition(&mut self) -> Result<()> {
        self.active.store()?;
        let next_pid = self.active.id() + 1;
        let dir = self.layout.partition_dir(next_pid);
        let sealed = mem::replace(&mut self.active, Partition::new(next_pid, dir, self.opts));
        debug!(
            partition = sealed.id(),
            events = sealed.events(),
            "sealed partition"
        );
        self.sealed.push(PartitionInfo {
            id: sealed.id(),
            events: sealed.events(),
        });
        self.persist_manifest()?;
        Ok(())
    }

    fn persist_manifest(&self) -> Result<()> {
        let manifest = StoreManifest {
            next_id: self.next_id,
            active_partition: self.active.id(),
            sealed: self.sealed.clone(),
        };
        let writer = BufWriter::new(File::create(self.layout.store_manifest_path())?);
        bincode::serialize_into(writer, &manifest)?;
        Ok(())
    }

    fn query_partition(&self, id: u64, expr: &Expr) -> Result<QueryResult> {
        let cached = self.cache.lock().get(&id).cloned();
        if let Some(partition) = cached {
            return partition.lookup(expr);
        }
        let partition = Arc::new(Partition::load_or_quarantine(
            id,
            self.layout.partition_dir(id),
            self.opts,
        ));
        self.cache.lock().put(id, partition.clone());
        partition.lookup(expr)
    }
}

/// Unions a partition result into the accumulator.
fn merge(acc: &mut QueryResult, mut other: QueryResult) {
    let len = acc.hits.len().max(other.hits.len());
    acc.hits.append(len - acc.hits.len(), false);
    other.hits.append(len - other.hits.len(), false);
    acc.hits = &acc.hits | &other.hits;
    acc.incomplete |= other.incomplete;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::RelOp;
    use crate::core::types::{
        FieldType, Offset, Record, RecordField, RecordType, TypeKind, Value,
    };

    fn conn_type() -> Arc<RecordType> {
        Arc::new(RecordType::new(
            "conn",
            vec![
                RecordField {
                    name: "bytes".to_string(),
                    ty: FieldType::Kind(TypeKind::UInt),
                },
                RecordField {
                    name: "service".to_string(),
                    ty: FieldType::Kind(TypeKind::Str),
                },
            ],
        ))
    }

    fn conn_event(ty: &Arc<RecordType>, bytes: u64, service: &str, ts: i64) -> Event {
        Event::new(
            ty.clone(),
            Record::new(vec![
                Value::UInt(bytes),
                Value::Str(service.to_string()),
            ]),
            ts,
        )
    }

    fn small_config(path: &std::path::Path) -> Config {
        Config {
            max_partition_size: 8,
            taste_partitions: 1,
            num_query_supervisors: 2,
            chunk_size: 4,
            ..Config::with_storage_path(path)
        }
    }

    #[test]
    fn import_assigns_one_based_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EventStore::open(small_config(dir.path())).unwrap();
        let ty = conn_type();
        let range = store
            .import(vec![
                conn_event(&ty, 1, "dns", 0),
                conn_event(&ty, 2, "http", 0),
            ])
            .unwrap();
        assert_eq!(range, Some((1, 2)));
        assert_eq!(store.num_events(), 2);
    }

    #[test]
    fn lookup_spans_sealed_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EventStore::open(small_config(dir.path())).unwrap();
        let ty = conn_type();
        // 24 events roll over two 8-event partitions into a third.
        for i in 0..24u64 {
            let service = if i % 3 == 0 { "dns" } else { "http" };
            store
                .import(vec![conn_event(&ty, i, service, i as i64)])
                .unwrap();
        }

        let expr = Expr::field(
            Offset::new(vec![1]),
            RelOp::Eq,
            Value::Str("dns".to_string()),
        );
        let result = store.lookup(&expr).unwrap();
        assert!(!result.incomplete);
        // Events with bytes 0, 3, 6, ... carry IDs 1, 4, 7, ...
        let expected: Vec<u64> = (0..24).filter(|i| i % 3 == 0).map(|i| i + 1).collect();
        assert_eq!(result.hits.ones().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn export_materializes_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EventStore::open(small_config(dir.path())).unwrap();
        let ty = conn_type();
        store
            .import(
                (0..10u64)
                    .map(|i| conn_event(&ty, i * 10, "dns", i as i64))
                    .collect(),
            )
            .unwrap();

        let expr = Expr::field(Offset::new(vec![0]), RelOp::Ge, Value::UInt(70));
        let exported = store.export(&expr).unwrap();
        assert!(!exported.incomplete);
        let bytes: Vec<&Value> = exported.events.iter().map(|e| &e.data.0[0]).collect();
        assert_eq!(
            bytes,
            vec![&Value::UInt(70), &Value::UInt(80), &Value::UInt(90)]
        );
    }

    #[test]
    fn flush_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ty = conn_type();
        {
            let mut store = EventStore::open(small_config(dir.path())).unwrap();
            store
                .import(
                    (0..6u64)
                        .map(|i| conn_event(&ty, i, "dns", i as i64))
                        .collect(),
                )
                .unwrap();
            store.flush().unwrap();
        }

        let mut store = EventStore::open(small_config(dir.path())).unwrap();
        assert_eq!(store.num_events(), 6);

        // New imports continue the ID sequence.
        let range = store.import(vec![conn_event(&ty, 100, "http", 7)]).unwrap();
        assert_eq!(range, Some((7, 7)));

        let exported = store.export(&Expr::name_is("conn")).unwrap();
        assert_eq!(exported.events.len(), 7);
        assert_eq!(
            exported.events.iter().map(|e| e.id.0).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5, 6, 7]
        );
    }

    #[test]
    fn unsupported_query_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EventStore::open(small_config(dir.path())).unwrap();
        let ty = conn_type();
        store.import(vec![conn_event(&ty, 1, "dns", 0)]).unwrap();

        let expr = Expr::relation(
            RelOp::Lt,
            Expr::NameExtractor,
            Expr::Constant(Value::Str("z".to_string())),
        );
        let err = store.lookup(&expr).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedQuery);
    }
}
