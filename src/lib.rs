pub mod bitmap;
pub mod bitstream;
pub mod compression;
pub mod core;
pub mod index;
pub mod query;
pub mod storage;

pub use crate::bitmap::RelOp;
pub use crate::bitstream::Bitstream;
pub use crate::core::config::Config;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::store::{EventStore, ExportResult};
pub use crate::core::types::{
    Address, Event, EventId, Offset, Port, PortProto, Record, RecordType, TypeKind, Value,
};
pub use crate::index::QueryResult;
pub use crate::query::Expr;

/*
┌──────────────────────────────────────────────────────────────────────────┐
│                         EVENTIDE ARCHITECTURE                            │
└──────────────────────────────────────────────────────────────────────────┘

  ingest                                  query
  ──────                                  ─────
  source ──► EventStore::import           Expr AST ──► EventStore::lookup
                  │                                        │
        assigns contiguous IDs                    per-partition Evaluator
                  │                                        │
        ┌─────────┴──────────┐                ┌────────────┴───────────┐
        ▼                    ▼                ▼                        ▼
  SegmentWriter        Partition          MetaIndex               ArgIndex
  (chunked,            (meta + arg        (timestamp, name)       (offset → bitmap,
   compressed)          indexes)                                   kind → bitmaps)
        │                    │                └──────────┬─────────────┘
        ▼                    ▼                           ▼
  SegmentStore         partitions/<id>/            Bitmap = binner + coder
  (archive, LRU)       *.idx files                 + validity Bitstream
        │                                                │
        ▼                                                ▼
  mask-driven extract ◄───────── union of ──────── EWAH Bitstream
  (events out)                   partition hits    (fill/literal runs)

  Layers, leaves first: bitstream → bitmap (storage/binner/coder) →
  value indexes → meta/arg indexes → partition → evaluator → store.
  Segments are immutable once sealed; partitions are isolation
  boundaries; ID 0 is reserved.
*/
