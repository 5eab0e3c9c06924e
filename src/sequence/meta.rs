use serde::{Deserialize, Serialize};

use crate::config::SequenceConfig;

/// Descriptor of one segment: enough to navigate and route without loading
/// the segment's values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta<T> {
    /// Number of values in the segment.
    pub count: usize,
    /// (min, max) of the segment's sorted content. Present only for
    /// segments of ordered sequences.
    pub bounds: Option<(T, T)>,
}

/// A serializable snapshot of a sequence, sufficient to rehydrate it against
/// the same store.
///
/// Rehydration leaves every segment cold: working arrays are absent, the
/// Fenwick tree is rebuilt from the counts, the total count is derived, and
/// the chunk cache starts empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceMeta<T> {
    /// Maximum number of values per segment.
    pub segment_count: usize,
    /// Number of segment slots per stored chunk.
    pub chunk_count: usize,
    /// Segment descriptors, in segment-list order.
    pub segments: Vec<SegmentMeta<T>>,
    /// Current store key for each chunk index. Grows append-only in length;
    /// entries are replaced on copy-on-write commits.
    pub chunks: Vec<String>,
}

impl<T> SequenceMeta<T> {
    /// An empty snapshot with the given configuration.
    pub fn empty(config: SequenceConfig) -> Self {
        Self {
            segment_count: config.segment_capacity(),
            chunk_count: config.chunk_capacity(),
            segments: Vec::new(),
            chunks: Vec::new(),
        }
    }

    /// The sequence configuration recorded in this snapshot.
    pub fn config(&self) -> SequenceConfig {
        SequenceConfig::new(self.segment_count, self.chunk_count)
    }

    /// Total element count across all segment descriptors.
    pub fn total_count(&self) -> usize {
        self.segments.iter().map(|s| s.count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding;

    fn create_test_meta() -> SequenceMeta<f64> {
        SequenceMeta {
            segment_count: 4,
            chunk_count: 2,
            segments: vec![
                SegmentMeta {
                    count: 3,
                    bounds: Some((1.0, 7.0)),
                },
                SegmentMeta {
                    count: 2,
                    bounds: Some((8.0, 9.0)),
                },
            ],
            chunks: vec!["chunks/abc-1".to_string()],
        }
    }

    #[test]
    fn test_meta_roundtrip() {
        let original = create_test_meta();
        let encoded = encoding::encode_framed(&original);
        let decoded: SequenceMeta<f64> =
            encoding::decode_framed(&encoded).expect("Failed to decode meta");
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_total_count() {
        let meta = create_test_meta();
        assert_eq!(meta.total_count(), 5);
        assert_eq!(SequenceMeta::<String>::empty(SequenceConfig::default()).total_count(), 0);
    }

    #[test]
    fn test_indexed_meta_has_no_bounds() {
        let meta = SequenceMeta::<Option<String>> {
            segment_count: 8,
            chunk_count: 1,
            segments: vec![SegmentMeta {
                count: 2,
                bounds: None,
            }],
            chunks: Vec::new(),
        };
        let encoded = encoding::encode_framed(&meta);
        let decoded: SequenceMeta<Option<String>> =
            encoding::decode_framed(&encoded).expect("Failed to decode meta");
        assert_eq!(decoded, meta);
    }
}
