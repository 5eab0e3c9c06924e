use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::BlobStore;
use crate::error::Result;

/// An in-process blob store backed by a HashMap.
///
/// The default store for tests and light embedding. Byte buffers are cloned
/// on both get and set, which satisfies the deep-copy contract for free.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock()?;
        Ok(blobs.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut blobs = self.blobs.lock()?;
        blobs.insert(key.to_string(), value);
        Ok(())
    }
}
