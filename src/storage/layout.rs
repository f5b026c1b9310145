use std::fs;
use std::path::PathBuf;

use crate::core::error::Result;
use crate::storage::segment::SegmentId;

/// Directory structure for persisted state.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
    pub segments_dir: PathBuf,   // sealed segments (.seg files)
    pub partitions_dir: PathBuf, // per-partition index directories
    pub meta_dir: PathBuf,       // manifests
}

impl StorageLayout {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        let segments_dir = base_dir.join("segments");
        let partitions_dir = base_dir.join("partitions");
        let meta_dir = base_dir.join("meta");

        fs::create_dir_all(&segments_dir)?;
        fs::create_dir_all(&partitions_dir)?;
        fs::create_dir_all(&meta_dir)?;

        Ok(StorageLayout {
            base_dir,
            segments_dir,
            partitions_dir,
            meta_dir,
        })
    }

    pub fn segment_path(&self, id: &SegmentId) -> PathBuf {
        self.segments_dir.join(format!("{}.seg", id.0))
    }

    pub fn partition_dir(&self, id: u64) -> PathBuf {
        self.partitions_dir.join(format!("{:08}", id))
    }

    pub fn segment_manifest_path(&self) -> PathBuf {
        self.meta_dir.join("manifest.bin")
    }

    pub fn store_manifest_path(&self) -> PathBuf {
        self.meta_dir.join("store.bin")
    }
}
