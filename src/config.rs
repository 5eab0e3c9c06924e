use serde::{Deserialize, Serialize};

use crate::table::ValueType;

/// Configuration for a single sequence.
///
/// Sequences created implicitly by a table inherit the table's defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Maximum number of values per segment (default: 1024). A segment that
    /// grows past this after an insert is split at the midpoint.
    pub segment_count: usize,

    /// Number of segment slots per stored chunk (default: 16). Zero is
    /// treated as one segment per chunk.
    pub chunk_count: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            segment_count: 1024,
            chunk_count: 16,
        }
    }
}

impl SequenceConfig {
    /// Create a config with the given segment and chunk capacities.
    pub fn new(segment_count: usize, chunk_count: usize) -> Self {
        Self {
            segment_count,
            chunk_count,
        }
    }

    /// Set the maximum number of values per segment.
    pub fn segment_count(mut self, count: usize) -> Self {
        self.segment_count = count;
        self
    }

    /// Set the number of segment slots per chunk.
    pub fn chunk_count(mut self, count: usize) -> Self {
        self.chunk_count = count;
        self
    }

    /// Segment capacity with the minimum of one enforced.
    pub(crate) fn segment_capacity(&self) -> usize {
        self.segment_count.max(1)
    }

    /// Chunk slot count with the documented zero-means-one rule applied.
    pub(crate) fn chunk_capacity(&self) -> usize {
        self.chunk_count.max(1)
    }
}

/// Configuration for a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableConfig {
    /// Defaults applied to sequences created implicitly on first sighting of
    /// a column.
    pub defaults: SequenceConfig,

    /// The designated order key name (default: "timestamp"). Every inserted
    /// row must carry a concrete value under this key.
    pub order_key: String,

    /// The value type of the order column (default: number).
    pub order_type: ValueType,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            defaults: SequenceConfig::default(),
            order_key: "timestamp".to_string(),
            order_type: ValueType::Number,
        }
    }
}

impl TableConfig {
    /// Create a config with the given order key and value type.
    pub fn new(order_key: impl Into<String>, order_type: ValueType) -> Self {
        Self {
            defaults: SequenceConfig::default(),
            order_key: order_key.into(),
            order_type,
        }
    }

    /// Set the sequence defaults.
    pub fn defaults(mut self, defaults: SequenceConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set the order key name.
    pub fn order_key(mut self, key: impl Into<String>) -> Self {
        self.order_key = key.into();
        self
    }

    /// Set the order column value type.
    pub fn order_type(mut self, value_type: ValueType) -> Self {
        self.order_type = value_type;
        self
    }
}
