use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::row::ValueType;
use crate::config::SequenceConfig;
use crate::sequence::SequenceMeta;

/// A number column cell; None is the missing sentinel.
pub type NumberCell = Option<f64>;
/// A string column cell; None is the missing sentinel.
pub type StringCell = Option<String>;

/// Snapshot of the order column: the value type tag selects which sequence
/// meta the table rehydrates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderMeta {
    Number(SequenceMeta<f64>),
    String(SequenceMeta<String>),
}

impl OrderMeta {
    pub fn value_type(&self) -> ValueType {
        match self {
            OrderMeta::Number(_) => ValueType::Number,
            OrderMeta::String(_) => ValueType::String,
        }
    }

    /// Row count recorded in the snapshot.
    pub fn total_count(&self) -> usize {
        match self {
            OrderMeta::Number(meta) => meta.total_count(),
            OrderMeta::String(meta) => meta.total_count(),
        }
    }
}

/// A serializable snapshot of a table, sufficient to rehydrate it against
/// the same store: sequence defaults, the order column descriptor, and one
/// sequence meta per typed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub defaults: SequenceConfig,
    pub order_key: String,
    pub order: OrderMeta,
    pub number_columns: BTreeMap<String, SequenceMeta<NumberCell>>,
    pub string_columns: BTreeMap<String, SequenceMeta<StringCell>>,
}
