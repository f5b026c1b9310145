pub mod layout;
pub mod segment;
pub mod segment_reader;
pub mod segment_store;
pub mod segment_writer;

pub use layout::StorageLayout;
pub use segment::{Chunk, Schema, Segment, SegmentId};
pub use segment_reader::SegmentReader;
pub use segment_store::SegmentStore;
pub use segment_writer::SegmentWriter;
