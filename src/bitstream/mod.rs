pub mod ewah;

pub use ewah::Bitstream;
