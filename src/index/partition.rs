use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::bitstream::Bitstream;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Event;
use crate::index::args::ArgIndex;
use crate::index::meta::MetaIndex;
use crate::index::value_index::IndexOptions;
use crate::query::ast::Expr;
use crate::query::evaluator::Evaluator;

const PARTITION_FILE: &str = "partition.bin";

/// A query answer: the bitstream of matching event IDs, flagged when
/// some of the partition state could not be consulted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub hits: Bitstream,
    pub incomplete: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartitionMeta {
    id: u64,
    events: u64,
}

/// The administrative unit of the index: one meta index, one argument
/// index, and the slice of the identifier space they cover. Partitions
/// are an isolation boundary; a corrupt partition answers queries with
/// an empty, incomplete result and never poisons its siblings.
pub struct Partition {
    id: u64,
    dir: PathBuf,
    meta: MetaIndex,
    args: ArgIndex,
    events: u64,
    unusable: bool,
}

impl Partition {
    pub fn new(id: u64, dir: PathBuf, opts: IndexOptions) -> Self {
        Partition {
            id,
            dir,
            meta: MetaIndex::new(),
            args: ArgIndex::new(opts),
            events: 0,
            unusable: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of indexed events.
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Indexes a batch of events with ascending, externally assigned IDs.
    pub fn index_batch(&mut self, events: &[Event]) -> Result<()> {
        for event in events {
            self.index_event(event)?;
        }
        Ok(())
    }

    pub fn index_event(&mut self, event: &Event) -> Result<()> {
        if self.unusable {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("partition {} is unusable", self.id),
            ));
        }
        if !self.meta.index(event)? || !self.args.index(event)? {
            return Err(Error::new(
                ErrorKind::Capacity,
                format!("partition {} is full", self.id),
            ));
        }
        self.events += 1;
        Ok(())
    }

    /// Evaluates a predicate against this partition. Unsupported queries
    /// surface as errors; an unusable partition yields an empty,
    /// incomplete result.
    pub fn lookup(&self, expr: &Expr) -> Result<QueryResult> {
        if self.unusable {
            return Ok(QueryResult {
                hits: Bitstream::new(),
                incomplete: true,
            });
        }
        let hits = Evaluator::new(&self.meta, &self.args).evaluate(expr)?;
        Ok(QueryResult {
            hits,
            incomplete: false,
        })
    }

    /// Persists both indexes into the partition directory. Rewrites in
    /// place, so a partially completed store can simply be replayed.
    pub fn store(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        self.meta.store(&self.dir)?;
        self.args.store(&self.dir)?;
        let writer = BufWriter::new(File::create(self.dir.join(PARTITION_FILE))?);
        bincode::serialize_into(
            writer,
            &PartitionMeta {
                id: self.id,
                events: self.events,
            },
        )?;
        debug!(partition = self.id, events = self.events, "stored partition");
        Ok(())
    }

    /// Loads a partition from its directory. Corruption is reported as
    /// such; the caller decides whether to mark the partition unusable.
    pub fn load(dir: PathBuf, opts: IndexOptions) -> Result<Self> {
        let meta_path = dir.join(PARTITION_FILE);
        let reader = BufReader::new(File::open(&meta_path)?);
        let meta_info: PartitionMeta = bincode::deserialize_from(reader).map_err(|e| {
            error!(dir = %dir.display(), "corrupt partition metadata");
            Error::new(ErrorKind::Corruption, format!("partition metadata: {}", e))
        })?;
        let meta = MetaIndex::load(&dir)?;
        let args = ArgIndex::load(&dir, opts)?;
        debug!(
            partition = meta_info.id,
            events = meta_info.events,
            "loaded partition"
        );
        Ok(Partition {
            id: meta_info.id,
            dir,
            meta,
            args,
            events: meta_info.events,
            unusable: false,
        })
    }

    /// Tries to load a partition, degrading to an unusable placeholder
    /// on corruption so queries against it return empty + incomplete.
    pub fn load_or_quarantine(id: u64, dir: PathBuf, opts: IndexOptions) -> Self {
        match Partition::load(dir.clone(), opts) {
            Ok(partition) => partition,
            Err(err) => {
                error!(partition = id, error = %err, "marking partition unusable");
                let mut partition = Partition::new(id, dir, opts);
                partition.unusable = true;
                partition
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::RelOp;
    use crate::core::types::{
        EventId, FieldType, Offset, Record, RecordField, RecordType, TypeKind, Value,
    };
    use crate::query::ast::Expr;
    use std::sync::Arc;

    fn sample_events(n: u64) -> Vec<Event> {
        let ty = Arc::new(RecordType::new(
            "conn",
            vec![RecordField {
                name: "bytes".to_string(),
                ty: FieldType::Kind(TypeKind::UInt),
            }],
        ));
        (0..n)
            .map(|i| {
                let mut e = Event::new(
                    ty.clone(),
                    Record::new(vec![Value::UInt(i * 100)]),
                    i as i64 * 1_000_000_000,
                );
                e.id = EventId(i + 1);
                e
            })
            .collect()
    }

    #[test]
    fn index_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut partition = Partition::new(0, dir.path().to_path_buf(), IndexOptions::default());
        partition.index_batch(&sample_events(5)).unwrap();
        assert_eq!(partition.events(), 5);

        let expr = Expr::field(Offset::new(vec![0]), RelOp::Ge, Value::UInt(300));
        let result = partition.lookup(&expr).unwrap();
        assert!(!result.incomplete);
        assert_eq!(result.hits.ones().collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn store_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut partition = Partition::new(7, dir.path().to_path_buf(), IndexOptions::default());
        partition.index_batch(&sample_events(5)).unwrap();
        partition.store().unwrap();

        let loaded = Partition::load(dir.path().to_path_buf(), IndexOptions::default()).unwrap();
        assert_eq!(loaded.id(), 7);
        assert_eq!(loaded.events(), 5);

        let expr = Expr::field(Offset::new(vec![0]), RelOp::Eq, Value::UInt(200));
        let result = loaded.lookup(&expr).unwrap();
        assert_eq!(result.hits.ones().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn corrupt_partition_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let mut partition = Partition::new(3, dir.path().to_path_buf(), IndexOptions::default());
        partition.index_batch(&sample_events(2)).unwrap();
        partition.store().unwrap();

        std::fs::write(dir.path().join(PARTITION_FILE), b"garbage").unwrap();

        let quarantined =
            Partition::load_or_quarantine(3, dir.path().to_path_buf(), IndexOptions::default());
        let result = quarantined.lookup(&Expr::name_is("conn")).unwrap();
        assert!(result.incomplete);
        assert_eq!(result.hits.count_ones(), 0);
    }
}
