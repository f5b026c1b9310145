pub mod binner;
#[allow(clippy::module_inception)]
pub mod bitmap;
pub mod coder;
pub mod storage;

pub use binner::{Binner, NullBinner, PrecisionBinner};
pub use bitmap::{Bitmap, BoolBitmap};
pub use coder::{BinaryCoder, Coder, EqualityCoder, RangeCoder, RelOp};
