pub mod args;
pub mod meta;
pub mod partition;
pub mod value_index;

pub use args::ArgIndex;
pub use meta::MetaIndex;
pub use partition::{Partition, QueryResult};
pub use value_index::{IndexOptions, ValueIndex};
