pub mod config;
pub mod encoding;
pub mod error;
pub mod sequence;
pub mod store;
pub mod table;

pub use config::{SequenceConfig, TableConfig};
pub use error::{Error, Result};
pub use sequence::{IndexedSequence, OrderedSequence};
pub use store::{BlobStore, MemoryStore};
pub use table::{Row, Table, TableMeta, Value, ValueType};
