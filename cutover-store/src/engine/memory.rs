use async_trait::async_trait;
use cutover_query::{CursorOrder, Query, QueryArgs, QueryResult};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use crate::{
    engine::Engine,
    error::Result,
    record::{Record, RecordKey},
    store::Store,
};

type Partitions = BTreeMap<(String, String), Record>;

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<String, Partitions>,
    counters: HashMap<String, HashMap<String, i64>>,
}

/// Process-local engine. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct Memory(Arc<RwLock<Tables>>);

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row of every table, in key order. Meant for assertions.
    pub fn dump(&self) -> Vec<Record> {
        let tables = self.0.read();
        let mut names = tables.rows.keys().collect::<Vec<_>>();
        names.sort();

        names
            .into_iter()
            .filter_map(|name| tables.rows.get(name))
            .flat_map(|rows| rows.values().cloned())
            .collect()
    }

    /// Every counter as `(table, key, value)`, sorted.
    pub fn dump_counters(&self) -> Vec<(String, String, i64)> {
        let tables = self.0.read();
        let mut counters = tables
            .counters
            .iter()
            .flat_map(|(table, values)| {
                values
                    .iter()
                    .map(|(key, value)| (table.to_owned(), key.to_owned(), *value))
            })
            .collect::<Vec<_>>();

        counters.sort();
        counters
    }
}

pub struct MemoryStore;

impl MemoryStore {
    pub fn create() -> Store {
        Store::new(Memory::default())
    }
}

#[async_trait]
impl Engine for Memory {
    async fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        Ok(self
            .0
            .read()
            .rows
            .get(&key.table)
            .and_then(|rows| rows.get(&(key.partition.to_owned(), key.clustering.to_owned())))
            .cloned())
    }

    async fn put(&self, record: Record) -> Result<()> {
        let mut tables = self.0.write();
        let rows = tables.rows.entry(record.key.table.to_owned()).or_default();

        rows.insert(
            (
                record.key.partition.to_owned(),
                record.key.clustering.to_owned(),
            ),
            record,
        );

        Ok(())
    }

    async fn delete(&self, key: &RecordKey) -> Result<()> {
        let mut tables = self.0.write();

        if let Some(rows) = tables.rows.get_mut(&key.table) {
            rows.remove(&(key.partition.to_owned(), key.clustering.to_owned()));
        }

        Ok(())
    }

    async fn scan(
        &self,
        table: &str,
        partition: Option<&str>,
        args: QueryArgs,
        order: CursorOrder,
    ) -> Result<QueryResult<Record>> {
        let records = {
            let tables = self.0.read();
            let Some(rows) = tables.rows.get(table) else {
                return Ok(QueryResult::default());
            };

            rows.values()
                .filter(|record| partition.map_or(true, |p| record.key.partition == p))
                .cloned()
                .collect::<Vec<_>>()
        };

        Ok(Query::new(records).cursor_order(order).build(args)?)
    }

    async fn increment_counter(&self, table: &str, key: &str, delta: i64) -> Result<()> {
        let mut tables = self.0.write();
        let value = tables
            .counters
            .entry(table.to_owned())
            .or_default()
            .entry(key.to_owned())
            .or_default();

        *value += delta;

        Ok(())
    }

    async fn counter(&self, table: &str, key: &str) -> Result<i64> {
        Ok(self
            .0
            .read()
            .counters
            .get(table)
            .and_then(|values| values.get(key))
            .copied()
            .unwrap_or_default())
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        let mut tables = self.0.write();
        tables.rows.remove(table);
        tables.counters.remove(table);

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
