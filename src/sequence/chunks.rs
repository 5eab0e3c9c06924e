use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future;

use crate::encoding::{self, Cell};
use crate::errdata;
use crate::error::Result;
use crate::store::BlobStore;
use crate::Error;

/// The persistence layer of a sequence: groups segment value arrays into
/// chunks of a fixed slot count and stores each chunk as one blob.
///
/// Chunks are copy-on-write: a commit writes fresh keys and only then
/// replaces the `cidx -> key` table entries, so the blob behind a recorded
/// key is immutable once written. The in-memory cache holds one decoded copy
/// per chunk index; working arrays handed to segments are deep copies and
/// never alias cache slots.
pub(crate) struct ChunkStore<T: Cell> {
    store: Arc<dyn BlobStore>,
    /// Slots per chunk. Always at least one.
    capacity: usize,
    /// Current store key for each chunk index.
    keys: Vec<String>,
    cache: HashMap<usize, Vec<Vec<T>>>,
}

impl<T: Cell> ChunkStore<T> {
    pub fn new(store: Arc<dyn BlobStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            keys: Vec::new(),
            cache: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resolve a segment index to its (chunk index, slot) address.
    pub fn address(&self, seg_idx: usize) -> (usize, usize) {
        (seg_idx / self.capacity, seg_idx % self.capacity)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Reset to a rehydrated state: adopt the snapshot's key table and drop
    /// every cached chunk.
    pub fn reset(&mut self, keys: Vec<String>, capacity: usize) {
        self.keys = keys;
        self.capacity = capacity.max(1);
        self.cache.clear();
    }

    /// Ensure every listed chunk index is cached, fetching all missing
    /// chunks from the store in one concurrent batch. A chunk index with no
    /// recorded key, or whose key is absent from the store, caches as a
    /// chunk of empty slots.
    pub async fn load_many(&mut self, cidxs: &BTreeSet<usize>) -> Result<()> {
        let missing: Vec<usize> = cidxs
            .iter()
            .copied()
            .filter(|cidx| !self.cache.contains_key(cidx))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let fetches = missing.iter().map(|&cidx| {
            let store = Arc::clone(&self.store);
            let key = self.keys.get(cidx).cloned();
            async move {
                let bytes = match &key {
                    Some(key) => store.get(key).await?,
                    None => None,
                };
                Ok::<_, Error>((cidx, bytes))
            }
        });

        for (cidx, bytes) in future::try_join_all(fetches).await? {
            let chunk = match bytes {
                Some(bytes) => {
                    let chunk: Vec<Vec<T>> = encoding::decode_framed(&bytes)?;
                    if chunk.len() != self.capacity {
                        return errdata!(
                            "chunk {cidx} has {} slots, expected {}",
                            chunk.len(),
                            self.capacity
                        );
                    }
                    chunk
                }
                None => vec![Vec::new(); self.capacity],
            };
            self.cache.insert(cidx, chunk);
        }
        Ok(())
    }

    /// A deep copy of one cached slot. The chunk must have been loaded.
    pub fn cached_slot(&self, cidx: usize, slot: usize) -> Result<Vec<T>> {
        match self.cache.get(&cidx) {
            Some(chunk) => Ok(chunk[slot].clone()),
            None => errdata!("chunk {cidx} consulted before load"),
        }
    }

    /// Commit slot overrides, grouped by chunk index, as copy-on-write
    /// writes. Every touched chunk is re-encoded with its untouched slots
    /// preserved verbatim and written under a fresh key; all writes are
    /// issued concurrently, and the key table and cache are updated only
    /// after every write has succeeded, so a failed commit leaves the
    /// published state untouched and is safe to retry.
    ///
    /// Returns the new keys in ascending chunk-index order.
    pub async fn commit_many(
        &mut self,
        overrides: BTreeMap<usize, BTreeMap<usize, Vec<T>>>,
    ) -> Result<Vec<String>> {
        if overrides.is_empty() {
            return Ok(Vec::new());
        }

        // Chunk indexes past the key table must extend it contiguously.
        let mut next_fresh = self.keys.len();
        for &cidx in overrides.keys().filter(|&&cidx| cidx >= self.keys.len()) {
            if cidx != next_fresh {
                return errdata!("chunk index gap at {cidx}");
            }
            next_fresh += 1;
        }

        // Untouched slots of already-stored chunks must be carried over.
        let existing: BTreeSet<usize> = overrides
            .keys()
            .copied()
            .filter(|&cidx| cidx < self.keys.len())
            .collect();
        self.load_many(&existing).await?;

        let mut staged: Vec<(usize, String, Vec<Vec<T>>)> = Vec::with_capacity(overrides.len());
        let mut pending: Vec<(String, Vec<u8>)> = Vec::with_capacity(overrides.len());
        for (cidx, slots) in overrides {
            let mut chunk = match self.cache.get(&cidx) {
                Some(chunk) => chunk.clone(),
                None => vec![Vec::new(); self.capacity],
            };
            for (slot, values) in slots {
                if slot >= self.capacity {
                    return errdata!("slot {slot} out of range for chunk {cidx}");
                }
                chunk[slot] = values;
            }
            let key = generate_key();
            pending.push((key.clone(), encoding::encode_framed(&chunk)));
            staged.push((cidx, key, chunk));
        }

        let writes = pending.into_iter().map(|(key, bytes)| {
            let store = Arc::clone(&self.store);
            async move { store.set(&key, bytes).await }
        });
        future::try_join_all(writes).await?;

        let mut new_keys = Vec::with_capacity(staged.len());
        for (cidx, key, chunk) in staged {
            if cidx == self.keys.len() {
                self.keys.push(key.clone());
            } else {
                self.keys[cidx] = key.clone();
            }
            self.cache.insert(cidx, chunk);
            new_keys.push(key);
        }
        tracing::debug!(chunks = new_keys.len(), "committed copy-on-write chunks");
        Ok(new_keys)
    }
}

/// Generate a chunk key unlikely to collide across commits. Only inequality
/// with the previously recorded key matters to correctness.
fn generate_key() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("chunks/{nanos:x}-{:08x}", rand::random::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn create_chunk_store(capacity: usize) -> ChunkStore<u64> {
        ChunkStore::new(Arc::new(MemoryStore::new()), capacity)
    }

    fn overrides(entries: &[(usize, usize, &[u64])]) -> BTreeMap<usize, BTreeMap<usize, Vec<u64>>> {
        let mut map: BTreeMap<usize, BTreeMap<usize, Vec<u64>>> = BTreeMap::new();
        for (cidx, slot, values) in entries {
            map.entry(*cidx).or_default().insert(*slot, values.to_vec());
        }
        map
    }

    #[tokio::test]
    async fn test_commit_and_reload() {
        let mut chunks = create_chunk_store(2);
        chunks
            .commit_many(overrides(&[(0, 0, &[1, 2]), (0, 1, &[3])]))
            .await
            .expect("commit failed");

        // Drop the cache and reload from the store.
        let keys = chunks.keys().to_vec();
        chunks.reset(keys, 2);
        chunks
            .load_many(&BTreeSet::from([0]))
            .await
            .expect("load failed");
        assert_eq!(chunks.cached_slot(0, 0).expect("slot 0"), vec![1, 2]);
        assert_eq!(chunks.cached_slot(0, 1).expect("slot 1"), vec![3]);
    }

    #[tokio::test]
    async fn test_commit_writes_fresh_key_and_preserves_other_slots() {
        let mut chunks = create_chunk_store(2);
        chunks
            .commit_many(overrides(&[(0, 0, &[1]), (0, 1, &[2])]))
            .await
            .expect("commit failed");
        let first_key = chunks.keys()[0].clone();

        chunks
            .commit_many(overrides(&[(0, 0, &[9])]))
            .await
            .expect("commit failed");
        assert_ne!(chunks.keys()[0], first_key);

        let keys = chunks.keys().to_vec();
        chunks.reset(keys, 2);
        chunks
            .load_many(&BTreeSet::from([0]))
            .await
            .expect("load failed");
        assert_eq!(chunks.cached_slot(0, 0).expect("slot 0"), vec![9]);
        assert_eq!(chunks.cached_slot(0, 1).expect("slot 1"), vec![2]);
    }

    #[tokio::test]
    async fn test_missing_chunk_loads_as_empty_slots() {
        let mut chunks = create_chunk_store(3);
        chunks
            .load_many(&BTreeSet::from([5]))
            .await
            .expect("load failed");
        assert_eq!(chunks.cached_slot(5, 0).expect("slot"), Vec::<u64>::new());
        assert_eq!(chunks.cached_slot(5, 2).expect("slot"), Vec::<u64>::new());
    }

    #[tokio::test]
    async fn test_chunk_index_gap_rejected() {
        let mut chunks = create_chunk_store(1);
        let result = chunks.commit_many(overrides(&[(3, 0, &[1])])).await;
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_cached_slot_is_deep_copy() {
        let mut chunks = create_chunk_store(1);
        chunks
            .commit_many(overrides(&[(0, 0, &[7, 8])]))
            .await
            .expect("commit failed");

        let mut copy = chunks.cached_slot(0, 0).expect("slot");
        copy[0] = 0;
        assert_eq!(chunks.cached_slot(0, 0).expect("slot"), vec![7, 8]);
    }

    #[test]
    fn test_zero_capacity_means_one_segment_per_chunk() {
        let chunks = create_chunk_store(0);
        assert_eq!(chunks.capacity(), 1);
        assert_eq!(chunks.address(0), (0, 0));
        assert_eq!(chunks.address(3), (3, 0));
    }

    #[test]
    fn test_address() {
        let chunks = create_chunk_store(4);
        assert_eq!(chunks.address(0), (0, 0));
        assert_eq!(chunks.address(3), (0, 3));
        assert_eq!(chunks.address(4), (1, 0));
        assert_eq!(chunks.address(10), (2, 2));
    }
}
