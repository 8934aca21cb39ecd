use async_trait::async_trait;
use cutover_query::{CursorOrder, QueryArgs, QueryResult};
use dyn_clone::DynClone;

use crate::{
    error::Result,
    record::{Record, RecordKey},
};

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "memory")]
pub use memory::*;

/// Primitives every backing store exposes, source and destination alike.
#[async_trait]
pub trait Engine: DynClone + Send + Sync {
    async fn get(&self, key: &RecordKey) -> Result<Option<Record>>;

    /// Full-record upsert.
    async fn put(&self, record: Record) -> Result<()>;

    async fn delete(&self, key: &RecordKey) -> Result<()>;

    /// Pages through one partition, or the whole table when `partition` is
    /// `None`, ordered by `(partition, clustering)`.
    async fn scan(
        &self,
        table: &str,
        partition: Option<&str>,
        args: QueryArgs,
        order: CursorOrder,
    ) -> Result<QueryResult<Record>>;

    async fn increment_counter(&self, table: &str, key: &str, delta: i64) -> Result<()>;

    async fn counter(&self, table: &str, key: &str) -> Result<i64>;

    /// Removes every row of a table, counters included. Idempotent.
    async fn truncate(&self, table: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

dyn_clone::clone_trait_object!(Engine);
