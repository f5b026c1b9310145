use std::path::PathBuf;

use crate::compression::compress::CompressionType;

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_path: PathBuf,

    /// Events per partition before the active partition is sealed.
    pub max_partition_size: u64,
    /// Sealed partitions kept decoded in memory.
    pub max_in_mem_partitions: usize,
    /// Partitions queried eagerly before the full scan.
    pub taste_partitions: usize,
    /// Concurrent per-partition query evaluations.
    pub num_query_supervisors: usize,

    /// Open segments kept in the archive cache.
    pub segments: usize,
    /// Segment seal threshold in MB.
    pub max_segment_size: usize,
    /// Events per segment chunk.
    pub chunk_size: usize,

    /// Strings are truncated to this length before equality coding.
    pub max_string_size: usize,
    /// Container elements indexed per value.
    pub max_container_elements: usize,

    pub compression: CompressionType,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from("./eventide.db"),

            max_partition_size: 1 << 20, // 1 Mi events
            max_in_mem_partitions: 10,
            taste_partitions: 5,
            num_query_supervisors: 10,

            segments: 10,
            max_segment_size: 128, // MB
            chunk_size: 1024,

            max_string_size: 1024,
            max_container_elements: 256,

            compression: CompressionType::Lz4,
        }
    }
}

impl Config {
    pub fn with_storage_path(path: impl Into<PathBuf>) -> Self {
        Config {
            storage_path: path.into(),
            ..Default::default()
        }
    }

    /// Segment seal threshold in bytes.
    pub fn max_segment_bytes(&self) -> u64 {
        self.max_segment_size as u64 * 1024 * 1024
    }
}
