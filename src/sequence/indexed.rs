use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::base::SequenceCore;
use super::meta::SequenceMeta;
use crate::config::SequenceConfig;
use crate::encoding::Cell;
use crate::errdata;
use crate::errinput;
use crate::error::Result;
use crate::store::BlobStore;

/// A positional sequence: values live at the index they were inserted at,
/// later inserts shift later values right.
pub struct IndexedSequence<T: Cell> {
    pub(crate) core: SequenceCore<T>,
}

impl<T: Cell> IndexedSequence<T> {
    pub fn new(store: Arc<dyn BlobStore>, config: SequenceConfig) -> Self {
        Self {
            core: SequenceCore::new(store, config),
        }
    }

    /// Total number of values.
    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// Value at position `i`, or None when out of range.
    pub async fn get(&mut self, i: usize) -> Result<Option<T>> {
        self.core.get(i).await
    }

    /// Values at positions `[a, b)`, clamped.
    pub async fn range(&mut self, a: usize, b: usize) -> Result<Vec<T>> {
        self.core.range(a, b).await
    }

    /// Insert a value at position `i`, clamped to `[0, len]`.
    pub async fn insert_at(&mut self, i: usize, value: T) -> Result<()> {
        if self.core.is_empty() {
            return self.core.seed(vec![value], false).await;
        }
        let i = i.min(self.core.len());
        let (seg_idx, local) = if i == self.core.len() {
            // Append routes to the end of the last segment.
            let last = self.core.segments.len() - 1;
            (last, self.core.segments[last].count)
        } else {
            self.core.fenwick.locate(i)
        };
        self.core.ensure_loaded(seg_idx).await?;
        self.core.splice_value(seg_idx, local, value)?;
        self.core.split_if_needed(seg_idx).await
    }

    /// Bulk insert. Equivalent to applying `insert_at(indexes[j], values[j])`
    /// one at a time in input order, but loads every target segment in one
    /// concurrent batch, merges each segment in a single pass, and rebuilds
    /// the Fenwick tree exactly once.
    pub async fn insert_many_at(&mut self, indexes: &[usize], values: Vec<T>) -> Result<()> {
        if indexes.len() != values.len() {
            return errinput!(
                "insert_many_at got {} indexes for {} values",
                indexes.len(),
                values.len()
            );
        }
        if indexes.is_empty() {
            return Ok(());
        }

        // Fast path: build the initial segment content directly.
        if self.core.is_empty() {
            let mut out: Vec<T> = Vec::with_capacity(values.len());
            for (target, value) in indexes.iter().zip(values) {
                let p = (*target).min(out.len());
                out.insert(p, value);
            }
            return self.core.seed(out, false).await;
        }

        let total = self.core.len();
        let added = indexes.len();

        // Reshuffle the pairs into their final relative order, converting
        // each target index into a coordinate of the pre-existing array.
        // `finals` stays sorted by (old coordinate, insertion order); the
        // current position of entry k during the simulation is old_k + k,
        // which is strictly increasing, so each step is a binary search.
        let mut finals: Vec<(usize, T)> = Vec::with_capacity(added);
        for (target, value) in indexes.iter().zip(values) {
            let target = (*target).min(total + finals.len());
            let mut lo = 0;
            let mut hi = finals.len();
            while lo < hi {
                let mid = (lo + hi) / 2;
                if finals[mid].0 + mid >= target {
                    hi = mid;
                } else {
                    lo = mid + 1;
                }
            }
            let old = target.saturating_sub(lo).min(total);
            finals.insert(lo, (old, value));
        }

        // Group by owning (segment, local); the one-past-the-end coordinate
        // maps to the end of the last segment.
        let mut groups: BTreeMap<usize, Vec<(usize, T)>> = BTreeMap::new();
        for (old, value) in finals {
            let (seg_idx, local) = if old == total {
                let last = self.core.segments.len() - 1;
                (last, self.core.segments[last].count)
            } else {
                self.core.fenwick.locate(old)
            };
            groups.entry(seg_idx).or_default().push((local, value));
        }

        let targets: BTreeSet<usize> = groups.keys().copied().collect();
        self.core.ensure_loaded_set(&targets).await?;

        // Single-pass merge per segment; pairs are already sorted by local
        // position, ties in arrival order.
        for (seg_idx, pairs) in groups {
            let segment = &mut self.core.segments[seg_idx];
            let old_values = match segment.values.take() {
                Some(values) => values,
                None => return errdata!("bulk insert into unloaded segment {seg_idx}"),
            };
            let mut merged = Vec::with_capacity(old_values.len() + pairs.len());
            let mut pending = pairs.into_iter().peekable();
            for (pos, value) in old_values.into_iter().enumerate() {
                while matches!(pending.peek(), Some((local, _)) if *local <= pos) {
                    merged.push(pending.next().expect("peeked").1);
                }
                merged.push(value);
            }
            merged.extend(pending.map(|(_, value)| value));

            segment.count = merged.len();
            segment.values = Some(merged);
            self.core.dirty.insert(seg_idx);
        }
        self.core.total = total + added;

        // Split overflowing segments right to left so earlier indexes stay
        // valid while later ones shift.
        let capacity = self.core.segment_capacity();
        let overflowing: Vec<usize> = self
            .core
            .segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.count > capacity)
            .map(|(i, _)| i)
            .rev()
            .collect();
        for seg_idx in overflowing {
            self.core.split_down(seg_idx).await?;
        }

        self.core.rebuild_fenwick();
        Ok(())
    }

    /// Write dirty segments to the store; returns the fresh chunk keys.
    pub async fn flush(&mut self) -> Result<Vec<String>> {
        self.core.flush().await
    }

    pub fn meta(&self) -> SequenceMeta<T> {
        self.core.meta()
    }

    pub fn set_meta(&mut self, meta: SequenceMeta<T>) {
        self.core.set_meta(meta);
    }
}
