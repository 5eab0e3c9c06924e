pub mod meta;
pub mod row;

pub use meta::{NumberCell, OrderMeta, StringCell, TableMeta};
pub use row::{Row, Value, ValueType};

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt as _;

use crate::config::TableConfig;
use crate::encoding::{self, Cell};
use crate::errinput;
use crate::error::Result;
use crate::sequence::{IndexedSequence, OrderedSequence};
use crate::store::BlobStore;
use crate::Error;

enum OrderColumn {
    Number(OrderedSequence<f64>),
    String(OrderedSequence<String>),
}

impl OrderColumn {
    fn len(&self) -> usize {
        match self {
            OrderColumn::Number(seq) => seq.len(),
            OrderColumn::String(seq) => seq.len(),
        }
    }
}

/// An ordered table: one ordered sequence for the designated order key plus
/// typed indexed sequences for every other column, all aligned by position.
///
/// Rows arrive in any order; the order column's lower-bound insert decides
/// each row's global position and every other column inserts at that same
/// position (the missing sentinel where the row has no value), so a
/// positional read across columns always reassembles the original row.
pub struct Table {
    store: Arc<dyn BlobStore>,
    config: TableConfig,
    order: OrderColumn,
    number_columns: BTreeMap<String, IndexedSequence<NumberCell>>,
    string_columns: BTreeMap<String, IndexedSequence<StringCell>>,
    /// The latest snapshot durably written to the store. In-memory edits do
    /// not replace it until a flush succeeds.
    committed: Option<TableMeta>,
}

impl Table {
    pub fn new(store: Arc<dyn BlobStore>, config: TableConfig) -> Self {
        let order = match config.order_type {
            ValueType::Number => {
                OrderColumn::Number(OrderedSequence::new(Arc::clone(&store), config.defaults))
            }
            ValueType::String => {
                OrderColumn::String(OrderedSequence::new(Arc::clone(&store), config.defaults))
            }
        };
        Self {
            store,
            config,
            order,
            number_columns: BTreeMap::new(),
            string_columns: BTreeMap::new(),
            committed: None,
        }
    }

    /// Open a table against the store: rehydrates from the snapshot at
    /// `meta_key` when present, otherwise starts fresh.
    pub async fn open(
        store: Arc<dyn BlobStore>,
        config: TableConfig,
        meta_key: &str,
    ) -> Result<Self> {
        let mut table = Self::new(Arc::clone(&store), config);
        if let Some(bytes) = store.get(meta_key).await? {
            let meta: TableMeta = encoding::decode_framed(&bytes)?;
            table.set_meta(meta)?;
        }
        Ok(table)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.len() == 0
    }

    /// Insert rows. Each row must carry a concrete value under the order
    /// key; every other concrete value routes to (and, on first sighting,
    /// creates) the matching typed column. Rows already inserted stay in
    /// place when a later row of the batch fails.
    pub async fn insert(&mut self, rows: Vec<Row>) -> Result<()> {
        for row in rows {
            self.insert_row(row).await?;
        }
        Ok(())
    }

    async fn insert_row(&mut self, row: Row) -> Result<()> {
        let order_value = match row.get(&self.config.order_key) {
            Some(value) if !value.is_missing() => value.clone(),
            _ => return Err(Error::MissingOrderKey(self.config.order_key.clone())),
        };
        let position = match (&mut self.order, order_value) {
            (OrderColumn::Number(seq), Value::Number(x)) => seq.insert(x).await?,
            (OrderColumn::String(seq), Value::String(s)) => seq.insert(s).await?,
            (_, value) => {
                return errinput!(
                    "order column {} expects {}, got {}",
                    self.config.order_key,
                    self.config.order_type,
                    value.type_name()
                )
            }
        };
        let previous_len = self.order.len() - 1;

        // Create columns on demand: a first concrete value decides the
        // bucket, and prior rows are padded with the missing sentinel.
        for (name, value) in &row {
            if name == &self.config.order_key || value.is_missing() {
                continue;
            }
            match value {
                Value::Number(_) => {
                    if !self.number_columns.contains_key(name) {
                        let mut column =
                            IndexedSequence::new(Arc::clone(&self.store), self.config.defaults);
                        pad(&mut column, previous_len).await?;
                        self.number_columns.insert(name.clone(), column);
                    }
                }
                Value::String(_) => {
                    if !self.string_columns.contains_key(name) {
                        let mut column =
                            IndexedSequence::new(Arc::clone(&self.store), self.config.defaults);
                        pad(&mut column, previous_len).await?;
                        self.string_columns.insert(name.clone(), column);
                    }
                }
                Value::Missing => {}
            }
        }

        // Every column receives exactly one insert at the row's position so
        // all columns stay aligned with the order column.
        for (name, column) in self.number_columns.iter_mut() {
            let cell = match row.get(name) {
                Some(Value::Number(x)) => Some(*x),
                _ => None,
            };
            column.insert_at(position, cell).await?;
        }
        for (name, column) in self.string_columns.iter_mut() {
            let cell = match row.get(name) {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            };
            column.insert_at(position, cell).await?;
        }
        Ok(())
    }

    /// The row at global position `i`, or None when out of range. Cells
    /// holding the missing sentinel are omitted.
    pub async fn get(&mut self, i: usize) -> Result<Option<Row>> {
        let order_value = match &mut self.order {
            OrderColumn::Number(seq) => seq.get(i).await?.map(Value::Number),
            OrderColumn::String(seq) => seq.get(i).await?.map(Value::String),
        };
        let Some(order_value) = order_value else {
            return Ok(None);
        };

        let mut row = Row::new();
        row.insert(self.config.order_key.clone(), order_value);
        for (name, column) in self.number_columns.iter_mut() {
            if let Some(Some(x)) = column.get(i).await? {
                row.insert(name.clone(), Value::Number(x));
            }
        }
        for (name, column) in self.string_columns.iter_mut() {
            if let Some(Some(s)) = column.get(i).await? {
                row.insert(name.clone(), Value::String(s));
            }
        }
        Ok(Some(row))
    }

    /// Rows at positions `[offset, offset + limit)` in key order; to the end
    /// when `limit` is None. Columns are fetched as positional slices and
    /// zipped back into rows by index.
    pub async fn range(&mut self, offset: usize, limit: Option<usize>) -> Result<Vec<Row>> {
        let end = match limit {
            Some(limit) => offset.saturating_add(limit),
            None => self.order.len(),
        };

        let order_values: Vec<Value> = match &mut self.order {
            OrderColumn::Number(seq) => seq
                .range(offset, end)
                .await?
                .into_iter()
                .map(Value::Number)
                .collect(),
            OrderColumn::String(seq) => seq
                .range(offset, end)
                .await?
                .into_iter()
                .map(Value::String)
                .collect(),
        };

        let mut rows: Vec<Row> = order_values
            .into_iter()
            .map(|value| {
                let mut row = Row::new();
                row.insert(self.config.order_key.clone(), value);
                row
            })
            .collect();

        for (name, column) in self.number_columns.iter_mut() {
            for (j, cell) in column.range(offset, end).await?.into_iter().enumerate() {
                if let (Some(x), Some(row)) = (cell, rows.get_mut(j)) {
                    row.insert(name.clone(), Value::Number(x));
                }
            }
        }
        for (name, column) in self.string_columns.iter_mut() {
            for (j, cell) in column.range(offset, end).await?.into_iter().enumerate() {
                if let (Some(s), Some(row)) = (cell, rows.get_mut(j)) {
                    row.insert(name.clone(), Value::String(s));
                }
            }
        }
        Ok(rows)
    }

    /// Atomically commit the table: flush every column concurrently, and
    /// only if all of them succeed write the snapshot under `meta_key` and
    /// replace the committed snapshot. On any failure the store's value at
    /// `meta_key` and the committed snapshot both stay at the previous
    /// commit.
    pub async fn flush(&mut self, meta_key: &str) -> Result<()> {
        {
            let mut flushes: Vec<BoxFuture<'_, Result<Vec<String>>>> = Vec::new();
            match &mut self.order {
                OrderColumn::Number(seq) => flushes.push(seq.flush().boxed()),
                OrderColumn::String(seq) => flushes.push(seq.flush().boxed()),
            }
            for column in self.number_columns.values_mut() {
                flushes.push(column.flush().boxed());
            }
            for column in self.string_columns.values_mut() {
                flushes.push(column.flush().boxed());
            }
            try_join_all(flushes).await?;
        }

        let snapshot = self.build_meta();
        self.store
            .set(meta_key, encoding::encode_framed(&snapshot))
            .await?;
        tracing::debug!(
            meta_key,
            rows = self.order.len(),
            columns = self.number_columns.len() + self.string_columns.len(),
            "committed table meta"
        );
        self.committed = Some(snapshot);
        Ok(())
    }

    /// The last committed snapshot, or a snapshot of the live state when the
    /// table has never been committed.
    pub fn meta(&self) -> TableMeta {
        self.committed
            .clone()
            .unwrap_or_else(|| self.build_meta())
    }

    /// Rehydrate every column from a snapshot. Fails when the snapshot's
    /// order value type disagrees with the table's configuration.
    pub fn set_meta(&mut self, meta: TableMeta) -> Result<()> {
        if meta.order.value_type() != self.config.order_type {
            return Err(Error::OrderTypeMismatch {
                expected: self.config.order_type.to_string(),
                found: meta.order.value_type().to_string(),
            });
        }

        self.config.defaults = meta.defaults;
        self.config.order_key = meta.order_key.clone();
        self.order = match &meta.order {
            OrderMeta::Number(seq_meta) => {
                let mut seq = OrderedSequence::new(Arc::clone(&self.store), meta.defaults);
                seq.set_meta(seq_meta.clone());
                OrderColumn::Number(seq)
            }
            OrderMeta::String(seq_meta) => {
                let mut seq = OrderedSequence::new(Arc::clone(&self.store), meta.defaults);
                seq.set_meta(seq_meta.clone());
                OrderColumn::String(seq)
            }
        };
        self.number_columns = meta
            .number_columns
            .iter()
            .map(|(name, seq_meta)| {
                let mut column = IndexedSequence::new(Arc::clone(&self.store), meta.defaults);
                column.set_meta(seq_meta.clone());
                (name.clone(), column)
            })
            .collect();
        self.string_columns = meta
            .string_columns
            .iter()
            .map(|(name, seq_meta)| {
                let mut column = IndexedSequence::new(Arc::clone(&self.store), meta.defaults);
                column.set_meta(seq_meta.clone());
                (name.clone(), column)
            })
            .collect();
        self.committed = Some(meta);
        Ok(())
    }

    fn build_meta(&self) -> TableMeta {
        TableMeta {
            defaults: self.config.defaults,
            order_key: self.config.order_key.clone(),
            order: match &self.order {
                OrderColumn::Number(seq) => OrderMeta::Number(seq.meta()),
                OrderColumn::String(seq) => OrderMeta::String(seq.meta()),
            },
            number_columns: self
                .number_columns
                .iter()
                .map(|(name, column)| (name.clone(), column.meta()))
                .collect(),
            string_columns: self
                .string_columns
                .iter()
                .map(|(name, column)| (name.clone(), column.meta()))
                .collect(),
        }
    }
}

/// Pad a freshly created column with the missing sentinel so its length
/// matches the rows inserted before the column existed.
async fn pad<T: Cell>(column: &mut IndexedSequence<Option<T>>, n: usize) -> Result<()> {
    if n == 0 {
        return Ok(());
    }
    let indexes: Vec<usize> = (0..n).collect();
    column.insert_many_at(&indexes, vec![None; n]).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SequenceConfig;
    use crate::store::testing::FailingStore;
    use crate::store::MemoryStore;

    fn create_table() -> Table {
        let config = TableConfig::new("id", ValueType::Number)
            .defaults(SequenceConfig::new(4, 2));
        Table::new(Arc::new(MemoryStore::new()), config)
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_dynamic_columns_stay_aligned() {
        let mut table = create_table();
        table
            .insert(vec![row(&[("id", 2.into()), ("name", "bob".into())])])
            .await
            .expect("insert failed");
        table
            .insert(vec![row(&[("id", 1.into()), ("score", 10.into())])])
            .await
            .expect("insert failed");

        let rows = table.range(0, None).await.expect("range failed");
        assert_eq!(
            rows,
            vec![
                row(&[("id", 1.into()), ("score", 10.into())]),
                row(&[("id", 2.into()), ("name", "bob".into())]),
            ]
        );

        // Every column is as long as the order column.
        let meta = table.meta();
        assert_eq!(meta.order.total_count(), 2);
        for (name, column) in &meta.number_columns {
            assert_eq!(column.total_count(), 2, "column {name}");
        }
        for (name, column) in &meta.string_columns {
            assert_eq!(column.total_count(), 2, "column {name}");
        }
    }

    #[tokio::test]
    async fn test_rows_sorted_by_order_key() {
        let mut table = create_table();
        let rows: Vec<Row> = [5, 1, 4, 2, 3]
            .iter()
            .map(|id| row(&[("id", (*id as i64).into()), ("tag", "x".into())]))
            .collect();
        table.insert(rows).await.expect("insert failed");

        let ids: Vec<Value> = table
            .range(0, None)
            .await
            .expect("range failed")
            .into_iter()
            .map(|mut r| r.remove("id").expect("id present"))
            .collect();
        assert_eq!(
            ids,
            vec![1i64.into(), 2i64.into(), 3i64.into(), 4i64.into(), 5i64.into()]
        );
    }

    #[tokio::test]
    async fn test_get_and_range_limits() {
        let mut table = create_table();
        for id in 0..6 {
            table
                .insert(vec![row(&[("id", (id as i64).into())])])
                .await
                .expect("insert failed");
        }
        assert_eq!(
            table.get(2).await.expect("get failed"),
            Some(row(&[("id", 2i64.into())]))
        );
        assert_eq!(table.get(6).await.expect("get failed"), None);

        let rows = table.range(4, Some(10)).await.expect("range failed");
        assert_eq!(rows.len(), 2);
        let rows = table.range(1, Some(2)).await.expect("range failed");
        assert_eq!(
            rows,
            vec![row(&[("id", 1i64.into())]), row(&[("id", 2i64.into())])]
        );
    }

    #[tokio::test]
    async fn test_missing_order_key_rejected() {
        let mut table = create_table();
        let result = table
            .insert(vec![row(&[("name", "bob".into())])])
            .await;
        assert!(matches!(result, Err(Error::MissingOrderKey(_))));

        let result = table
            .insert(vec![row(&[("id", Value::Missing), ("name", "bob".into())])])
            .await;
        assert!(matches!(result, Err(Error::MissingOrderKey(_))));
    }

    #[tokio::test]
    async fn test_wrong_order_value_type_rejected() {
        let mut table = create_table();
        let result = table.insert(vec![row(&[("id", "not-a-number".into())])]).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_missing_sentinel_never_creates_a_column() {
        let mut table = create_table();
        table
            .insert(vec![row(&[("id", 1i64.into()), ("ghost", Value::Missing)])])
            .await
            .expect("insert failed");
        let meta = table.meta();
        assert!(meta.number_columns.is_empty());
        assert!(meta.string_columns.is_empty());
    }

    #[tokio::test]
    async fn test_same_name_in_both_buckets() {
        let mut table = create_table();
        table
            .insert(vec![
                row(&[("id", 1i64.into()), ("x", 7i64.into())]),
                row(&[("id", 2i64.into()), ("x", "seven".into())]),
            ])
            .await
            .expect("insert failed");

        let rows = table.range(0, None).await.expect("range failed");
        assert_eq!(rows[0].get("x"), Some(&Value::Number(7.0)));
        assert_eq!(rows[1].get("x"), Some(&Value::String("seven".to_string())));
    }

    #[tokio::test]
    async fn test_flush_and_reopen() {
        let store = Arc::new(MemoryStore::new());
        let config = TableConfig::new("id", ValueType::Number)
            .defaults(SequenceConfig::new(4, 2));

        let mut table = Table::new(store.clone(), config.clone());
        for id in [3i64, 1, 2] {
            table
                .insert(vec![row(&[("id", id.into()), ("name", "n".into())])])
                .await
                .expect("insert failed");
        }
        table.flush("tables/t.meta").await.expect("flush failed");
        let rows = table.range(0, None).await.expect("range failed");

        let mut reopened = Table::open(store, config, "tables/t.meta")
            .await
            .expect("open failed");
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.range(0, None).await.expect("range failed"), rows);
    }

    #[tokio::test]
    async fn test_flush_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let config = TableConfig::new("id", ValueType::Number)
            .defaults(SequenceConfig::new(4, 2));
        let mut table = Table::new(store, config);
        for id in 0..10 {
            table
                .insert(vec![row(&[("id", (id as i64).into())])])
                .await
                .expect("insert failed");
        }

        table.flush("t.meta").await.expect("flush failed");
        let first = table.meta();
        table.flush("t.meta").await.expect("flush failed");
        assert_eq!(table.meta(), first);
    }

    #[tokio::test]
    async fn test_failed_flush_leaves_committed_meta() {
        let store = FailingStore::new();
        let config = TableConfig::new("id", ValueType::Number)
            .defaults(SequenceConfig::new(4, 2));
        let mut table = Table::new(store.clone(), config);

        table
            .insert(vec![row(&[("id", 1i64.into()), ("name", "a".into())])])
            .await
            .expect("insert failed");
        table.flush("t.meta").await.expect("flush failed");
        let v1_bytes = store.get("t.meta").await.expect("get failed").unwrap();
        let v1 = table.meta();

        table
            .insert(vec![row(&[("id", 2i64.into()), ("name", "b".into())])])
            .await
            .expect("insert failed");
        store.fail_sets(true);
        let result = table.flush("t.meta").await;
        assert!(matches!(result, Err(Error::IO(_))));

        // Neither the stored snapshot nor the committed one advanced.
        assert_eq!(
            store.get("t.meta").await.expect("get failed"),
            Some(v1_bytes)
        );
        assert_eq!(table.meta(), v1);

        // Disarm and retry: the same state commits cleanly.
        store.fail_sets(false);
        table.flush("t.meta").await.expect("flush failed");
        assert_eq!(table.meta().order.total_count(), 2);
    }

    #[tokio::test]
    async fn test_set_meta_order_type_mismatch() {
        let number_table = create_table();
        let meta = number_table.meta();

        let config = TableConfig::new("id", ValueType::String);
        let mut string_table = Table::new(Arc::new(MemoryStore::new()), config);
        let result = string_table.set_meta(meta);
        assert!(matches!(result, Err(Error::OrderTypeMismatch { .. })));
    }

    #[tokio::test]
    async fn test_string_order_column() {
        let config = TableConfig::new("name", ValueType::String)
            .defaults(SequenceConfig::new(3, 1));
        let mut table = Table::new(Arc::new(MemoryStore::new()), config);
        for name in ["mauna", "etna", "fuji"] {
            table
                .insert(vec![row(&[("name", name.into()), ("height", 1i64.into())])])
                .await
                .expect("insert failed");
        }
        let names: Vec<Value> = table
            .range(0, None)
            .await
            .expect("range failed")
            .into_iter()
            .map(|mut r| r.remove("name").expect("name present"))
            .collect();
        assert_eq!(names, vec!["etna".into(), "fuji".into(), "mauna".into()]);
    }
}
