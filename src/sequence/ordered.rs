use std::sync::Arc;

use super::base::SequenceCore;
use super::meta::SequenceMeta;
use crate::config::SequenceConfig;
use crate::encoding::Cell;
use crate::error::Result;
use crate::store::BlobStore;

/// A sorted sequence: values are kept in non-decreasing order, each segment
/// carries its (min, max) bounds, and the segment list is sorted by those
/// bounds. Supports value routing, lower-bound lookup, and half-open value
/// range scans alongside the positional operations of the base.
pub struct OrderedSequence<T: Cell + PartialOrd> {
    pub(crate) core: SequenceCore<T>,
}

impl<T: Cell + PartialOrd> OrderedSequence<T> {
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

    /// Value at global position `i`, or None when out of range.
    pub async fn get(&mut self, i: usize) -> Result<Option<T>> {
        self.core.get(i).await
    }

    /// Values at positions `[a, b)`, clamped.
    pub async fn range(&mut self, a: usize, b: usize) -> Result<Vec<T>> {
        self.core.range(a, b).await
    }

    /// Insert a value at its lower-bound position and return the global
    /// position it now occupies.
    pub async fn insert(&mut self, value: T) -> Result<usize> {
        if self.core.is_empty() {
            self.core.seed(vec![value], true).await?;
            return Ok(0);
        }

        let seg_idx = self.route(&value);
        self.core.ensure_loaded(seg_idx).await?;
        let local = self.core.segments[seg_idx]
            .loaded()?
            .partition_point(|x| x < &value);
        let position = self.core.fenwick.prefix_sum(seg_idx) + local;

        self.core.splice_value(seg_idx, local, value)?;
        self.refresh_bounds(seg_idx)?;
        self.core.split_if_needed(seg_idx).await?;
        Ok(position)
    }

    /// The lower-bound global index of a value: the position of its first
    /// occurrence, or of the first greater value when absent.
    pub async fn get_index(&mut self, value: &T) -> Result<usize> {
        if self.core.is_empty() {
            return Ok(0);
        }
        let seg_idx = self.route(value);
        self.core.ensure_loaded(seg_idx).await?;
        let local = self.core.segments[seg_idx]
            .loaded()?
            .partition_point(|x| x < value);
        Ok(self.core.fenwick.prefix_sum(seg_idx) + local)
    }

    /// Values in the half-open range `[lo, hi)`, in order. Candidate
    /// segments are found by binary search over the segment bounds and
    /// loaded in one concurrent batch.
    pub async fn scan(&mut self, lo: &T, hi: &T) -> Result<Vec<T>> {
        let n = self.core.segments.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        // First segment that can contain a value >= lo.
        let start = self
            .core
            .segments
            .partition_point(|s| matches!(&s.bounds, Some((_, max)) if max < lo));
        if start == n {
            return Ok(Vec::new());
        }
        // Extend forward while values < hi remain possible.
        let mut end = start;
        while end < n {
            match &self.core.segments[end].bounds {
                Some((min, _)) if min < hi => end += 1,
                _ => break,
            }
        }
        if end == start {
            return Ok(Vec::new());
        }

        self.core
            .ensure_loaded_set(&(start..end).collect())
            .await?;

        let mut out = Vec::new();
        for seg_idx in start..end {
            let values = self.core.segments[seg_idx].loaded()?;
            let from = values.partition_point(|x| x < lo);
            let to = values.partition_point(|x| x < hi);
            if to > from {
                out.extend_from_slice(&values[from..to]);
            }
            if to < values.len() {
                // The upper bound falls inside this segment; later segments
                // cannot contain values below it.
                break;
            }
        }
        Ok(out)
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

    /// The first segment whose max is at least the value; the last segment
    /// when every max is smaller.
    fn route(&self, value: &T) -> usize {
        let n = self.core.segments.len();
        let idx = self
            .core
            .segments
            .partition_point(|s| matches!(&s.bounds, Some((_, max)) if max < value));
        if idx == n {
            n - 1
        } else {
            idx
        }
    }

    fn refresh_bounds(&mut self, seg_idx: usize) -> Result<()> {
        let segment = &mut self.core.segments[seg_idx];
        let (first, last) = {
            let values = segment.loaded()?;
            (values.first().cloned(), values.last().cloned())
        };
        segment.bounds = first.zip(last);
        Ok(())
    }
}
