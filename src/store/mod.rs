pub mod memory;

#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::Result;

/// An opaque key to value blob map, the only persistence surface of the
/// engine. Chunk blobs and meta snapshots both live behind this trait.
///
/// Contract:
///
/// - `get` returns a value semantically independent of the stored value, and
///   `set` stores a value independent of the caller's buffer (deep copy in
///   both directions), so mutations never alias stored state.
/// - A `get` of a key observes the latest completed `set` of that key
///   (read-your-writes). No ordering is assumed between sets of unrelated
///   keys.
/// - Store failures propagate as [`crate::Error::IO`].
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Retrieves the blob stored under the given key, or None if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores a blob under the given key, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
}
