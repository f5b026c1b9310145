pub mod compress;

pub use compress::{CompressedBlock, CompressionType};
