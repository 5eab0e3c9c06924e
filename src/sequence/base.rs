use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use itertools::Itertools as _;

use super::chunks::ChunkStore;
use super::fenwick::Fenwick;
use super::meta::{SegmentMeta, SequenceMeta};
use crate::config::SequenceConfig;
use crate::encoding::Cell;
use crate::errdata;
use crate::error::Result;
use crate::store::BlobStore;

/// One bounded slice of a sequence.
///
/// A segment's identity is its position in the owning sequence's segment
/// list; that position also determines its chunk slot. Segments are created
/// on insert or by splits and are never deleted.
pub(crate) struct Segment<T> {
    /// Number of values, known even when the segment is cold.
    pub count: usize,
    /// Working array, loaded on demand; absent for cold segments. When
    /// present, its length equals `count`. Never aliases a chunk-cache slot.
    pub values: Option<Vec<T>>,
    /// (min, max) of the sorted content; maintained only by ordered
    /// sequences, None in indexed ones.
    pub bounds: Option<(T, T)>,
}

impl<T: Cell> Segment<T> {
    fn from_values(values: Vec<T>, ordered: bool) -> Self {
        let bounds = match (ordered, values.first(), values.last()) {
            (true, Some(first), Some(last)) => Some((first.clone(), last.clone())),
            _ => None,
        };
        Self {
            count: values.len(),
            values: Some(values),
            bounds,
        }
    }

    fn cold(meta: &SegmentMeta<T>) -> Self {
        Self {
            count: meta.count,
            values: None,
            bounds: meta.bounds.clone(),
        }
    }

    pub fn loaded(&self) -> Result<&Vec<T>> {
        match &self.values {
            Some(values) => Ok(values),
            None => errdata!("segment consulted before load"),
        }
    }
}

/// The segmented positional base shared by indexed and ordered sequences.
///
/// Holds the segment list, the Fenwick tree over segment counts, the dirty
/// set, and the chunk layer. All mutating operations require `&mut self`:
/// the sequence assumes a single writer and no concurrent readers.
pub(crate) struct SequenceCore<T: Cell> {
    config: SequenceConfig,
    pub(crate) segments: Vec<Segment<T>>,
    pub(crate) fenwick: Fenwick,
    pub(crate) total: usize,
    pub(crate) dirty: BTreeSet<usize>,
    pub(crate) chunks: ChunkStore<T>,
    /// Whole-tree Fenwick reconstructions performed so far. Plain inserts
    /// use point updates; only structural changes rebuild.
    pub(crate) rebuilds: u64,
}

impl<T: Cell> SequenceCore<T> {
    pub fn new(store: Arc<dyn BlobStore>, config: SequenceConfig) -> Self {
        let chunks = ChunkStore::new(store, config.chunk_capacity());
        Self {
            config,
            segments: Vec::new(),
            fenwick: Fenwick::from_counts(&[]),
            total: 0,
            dirty: BTreeSet::new(),
            chunks,
            rebuilds: 0,
        }
    }

    /// Total number of values in the sequence.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn segment_capacity(&self) -> usize {
        self.config.segment_capacity()
    }

    pub(crate) fn rebuild_fenwick(&mut self) {
        let counts: Vec<usize> = self.segments.iter().map(|s| s.count).collect();
        self.fenwick = Fenwick::from_counts(&counts);
        self.rebuilds += 1;
    }

    /// Value at global position `i`, or None when out of range. Loads at
    /// most one chunk.
    pub async fn get(&mut self, i: usize) -> Result<Option<T>> {
        if i >= self.total {
            return Ok(None);
        }
        let (seg_idx, local) = self.fenwick.locate(i);
        self.ensure_loaded(seg_idx).await?;
        Ok(Some(self.segments[seg_idx].loaded()?[local].clone()))
    }

    /// Values at positions `[a, b)`, clamped to `[0, total]`. All touched
    /// segments are loaded in one concurrent batch.
    pub async fn range(&mut self, a: usize, b: usize) -> Result<Vec<T>> {
        let b = b.min(self.total);
        let a = a.min(b);
        if a == b {
            return Ok(Vec::new());
        }

        let (first_seg, first_local) = self.fenwick.locate(a);
        let needed = b - a;
        let mut touched = Vec::new();
        let mut covered = 0;
        let mut skip = first_local;
        let mut seg_idx = first_seg;
        while covered < needed {
            let Some(segment) = self.segments.get(seg_idx) else {
                return errdata!("range walked past the segment list");
            };
            touched.push(seg_idx);
            covered += segment.count - skip;
            skip = 0;
            seg_idx += 1;
        }

        self.ensure_loaded_set(&touched.iter().copied().collect())
            .await?;

        let mut out = Vec::with_capacity(needed);
        let mut remaining = needed;
        let mut local = first_local;
        for &seg_idx in &touched {
            let values = self.segments[seg_idx].loaded()?;
            let take = remaining.min(values.len() - local);
            out.extend_from_slice(&values[local..local + take]);
            remaining -= take;
            local = 0;
        }
        Ok(out)
    }

    /// Ensure one segment's working array is present.
    pub async fn ensure_loaded(&mut self, seg_idx: usize) -> Result<()> {
        self.ensure_loaded_set(&BTreeSet::from([seg_idx])).await
    }

    /// Ensure every listed segment's working array is present. Cold
    /// segments resolve to their chunk addresses and all missing chunks are
    /// fetched in a single concurrent batch; each working array is a deep
    /// copy of its cache slot.
    pub async fn ensure_loaded_set(&mut self, seg_idxs: &BTreeSet<usize>) -> Result<()> {
        let cold: Vec<usize> = seg_idxs
            .iter()
            .copied()
            .filter(|&i| i < self.segments.len() && self.segments[i].values.is_none())
            .collect();
        if cold.is_empty() {
            return Ok(());
        }

        let cidxs: BTreeSet<usize> = cold.iter().map(|&i| self.chunks.address(i).0).collect();
        self.chunks.load_many(&cidxs).await?;

        for &i in &cold {
            let (cidx, slot) = self.chunks.address(i);
            let values = self.chunks.cached_slot(cidx, slot)?;
            if values.len() != self.segments[i].count {
                return errdata!(
                    "segment {i} loaded {} values, expected {}",
                    values.len(),
                    self.segments[i].count
                );
            }
            self.segments[i].values = Some(values);
        }
        Ok(())
    }

    /// Splice a value into a loaded segment at the given local position and
    /// record the insert: count, total, Fenwick point update, dirty mark.
    /// Splitting and bounds maintenance are the caller's responsibility.
    pub(crate) fn splice_value(&mut self, seg_idx: usize, local: usize, value: T) -> Result<()> {
        let segment = match self.segments.get_mut(seg_idx) {
            Some(segment) => segment,
            None => return errdata!("insert routed to missing segment {seg_idx}"),
        };
        let values = match segment.values.as_mut() {
            Some(values) => values,
            None => return errdata!("insert into unloaded segment {seg_idx}"),
        };
        let local = local.min(values.len());
        values.insert(local, value);
        segment.count += 1;
        self.total += 1;
        self.fenwick.point_add(seg_idx, 1);
        self.dirty.insert(seg_idx);
        Ok(())
    }

    /// Create the initial segment(s) of an empty sequence from a prepared
    /// value array, splitting down to capacity. Performs the sequence's
    /// first Fenwick build.
    pub(crate) async fn seed(&mut self, values: Vec<T>, ordered: bool) -> Result<()> {
        if !self.segments.is_empty() {
            return errdata!("seed on a non-empty sequence");
        }
        if values.is_empty() {
            return Ok(());
        }
        self.total = values.len();
        self.segments.push(Segment::from_values(values, ordered));
        self.dirty.insert(0);
        self.split_down(0).await?;
        self.rebuild_fenwick();
        Ok(())
    }

    /// Split the segment while it exceeds capacity, then rebuild the
    /// Fenwick tree if the structure changed.
    pub(crate) async fn split_if_needed(&mut self, seg_idx: usize) -> Result<()> {
        if self.split_down(seg_idx).await? {
            self.rebuild_fenwick();
        }
        Ok(())
    }

    /// Split an overflowing segment at the midpoint, repeatedly, until every
    /// piece fits the capacity. Returns whether the segment list changed.
    /// Does not rebuild the Fenwick tree.
    ///
    /// A split shifts the chunk-slot address of every later segment, so the
    /// whole tail is materialized first (one concurrent chunk-load batch)
    /// and marked dirty; the next flush then rewrites a consistent layout.
    /// If balancing would produce an empty half the split is suppressed and
    /// the segment temporarily carries the oversized count.
    pub(crate) async fn split_down(&mut self, seg_idx: usize) -> Result<bool> {
        let capacity = self.segment_capacity();
        if self.segments[seg_idx].count <= capacity {
            return Ok(false);
        }

        self.materialize_tail(seg_idx + 1).await?;

        let segment = &mut self.segments[seg_idx];
        let ordered = segment.bounds.is_some();
        let values = match segment.values.take() {
            Some(values) => values,
            None => return errdata!("split of unloaded segment {seg_idx}"),
        };

        let mut pieces = Vec::new();
        chop(values, capacity, &mut pieces);
        if pieces.len() == 1 {
            // Empty-half suppression: keep the oversized segment.
            self.segments[seg_idx].values = pieces.pop();
            return Ok(false);
        }
        for piece in &pieces {
            if piece.is_empty() {
                return errdata!("split produced an empty half");
            }
        }

        let replacement: Vec<Segment<T>> = pieces
            .into_iter()
            .map(|values| Segment::from_values(values, ordered))
            .collect();
        self.segments.splice(seg_idx..=seg_idx, replacement);

        // Everything from the split point onward occupies a new slot.
        for i in seg_idx..self.segments.len() {
            self.dirty.insert(i);
        }
        Ok(true)
    }

    /// Load working arrays for every cold segment at or after `from`.
    /// Called before structural changes shift segment indexes, while the
    /// current index-to-slot mapping is still the persisted one.
    async fn materialize_tail(&mut self, from: usize) -> Result<()> {
        let tail: BTreeSet<usize> = (from..self.segments.len()).collect();
        self.ensure_loaded_set(&tail).await
    }

    /// Write every dirty segment's working array into its chunk, grouped by
    /// chunk index, as concurrent copy-on-write commits. Returns the fresh
    /// chunk keys; a no-op (and an empty key list) when nothing is dirty.
    /// On store failure the dirty set is untouched, so a retry re-commits
    /// the same segments.
    pub async fn flush(&mut self) -> Result<Vec<String>> {
        if self.dirty.is_empty() {
            return Ok(Vec::new());
        }

        let grouped = self
            .dirty
            .iter()
            .map(|&seg_idx| (self.chunks.address(seg_idx).0, seg_idx))
            .into_group_map();

        let mut overrides: BTreeMap<usize, BTreeMap<usize, Vec<T>>> = BTreeMap::new();
        for (cidx, seg_idxs) in grouped {
            let slots = overrides.entry(cidx).or_default();
            for seg_idx in seg_idxs {
                let segment = match self.segments.get(seg_idx) {
                    Some(segment) => segment,
                    None => return errdata!("dirty mark on missing segment {seg_idx}"),
                };
                let slot = self.chunks.address(seg_idx).1;
                slots.insert(slot, segment.loaded()?.clone());
            }
        }

        let keys = self.chunks.commit_many(overrides).await?;
        self.dirty.clear();
        tracing::debug!(chunks = keys.len(), total = self.total, "flushed sequence");
        Ok(keys)
    }

    /// Snapshot of the sequence: configuration, segment descriptors, and
    /// the current chunk key table.
    pub fn meta(&self) -> SequenceMeta<T> {
        SequenceMeta {
            segment_count: self.config.segment_capacity(),
            chunk_count: self.config.chunk_capacity(),
            segments: self
                .segments
                .iter()
                .map(|s| SegmentMeta {
                    count: s.count,
                    bounds: s.bounds.clone(),
                })
                .collect(),
            chunks: self.chunks.keys().to_vec(),
        }
    }

    /// Reset state from a snapshot. Every segment starts cold; the Fenwick
    /// tree is rebuilt from the descriptor counts and the chunk cache is
    /// dropped.
    pub fn set_meta(&mut self, meta: SequenceMeta<T>) {
        self.config = meta.config();
        self.total = meta.total_count();
        self.segments = meta.segments.iter().map(Segment::cold).collect();
        self.dirty.clear();
        self.chunks.reset(meta.chunks, meta.chunk_count);
        self.rebuild_fenwick();
    }

    /// Replace the value at a global position in place, dirtying exactly
    /// one segment. Test-only: the public surface has no update operation.
    #[cfg(test)]
    pub(crate) async fn overwrite(&mut self, i: usize, value: T) -> Result<()> {
        use crate::errinput;
        if i >= self.total {
            return errinput!("position {i} out of range");
        }
        let (seg_idx, local) = self.fenwick.locate(i);
        self.ensure_loaded(seg_idx).await?;
        let segment = &mut self.segments[seg_idx];
        let values = segment.values.as_mut().expect("segment loaded above");
        values[local] = value;
        if segment.bounds.is_some() {
            segment.bounds = match (values.first(), values.last()) {
                (Some(first), Some(last)) => Some((first.clone(), last.clone())),
                _ => None,
            };
        }
        self.dirty.insert(seg_idx);
        Ok(())
    }
}

/// Recursively halve a value array until every piece fits the capacity.
/// The midpoint is `floor(len / 2)`; a piece that cannot be halved without
/// an empty side is kept whole.
fn chop<T>(mut values: Vec<T>, capacity: usize, out: &mut Vec<Vec<T>>) {
    if values.len() <= capacity {
        out.push(values);
        return;
    }
    let mid = values.len() / 2;
    if mid == 0 || mid == values.len() {
        out.push(values);
        return;
    }
    let right = values.split_off(mid);
    chop(values, capacity, out);
    chop(right, capacity, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chop_splits_to_capacity() {
        let mut pieces = Vec::new();
        chop((0..10).collect(), 4, &mut pieces);
        assert!(pieces.iter().all(|p| p.len() <= 4 && !p.is_empty()));
        let flat: Vec<i32> = pieces.into_iter().flatten().collect();
        assert_eq!(flat, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_chop_small_stays_whole() {
        let mut pieces = Vec::new();
        chop(vec![1, 2, 3], 4, &mut pieces);
        assert_eq!(pieces, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_chop_overflow_by_one_balances() {
        let mut pieces = Vec::new();
        chop((0..5).collect(), 4, &mut pieces);
        assert_eq!(pieces, vec![vec![0, 1], vec![2, 3, 4]]);
    }
}
