use cutover_query::{CursorOrder, CursorType, QueryArgs, QueryResult};
use std::{future::Future, time::Duration};
use tracing::debug;

use crate::{
    engine::Engine,
    entity::Entity,
    error::{Result, StoreError},
    record::{Record, RecordKey},
};

/// Default bound applied to every call made through a [`Store`].
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Page size used when a whole partition is drained.
pub const PARTITION_PAGE_SIZE: u16 = 100;

/// Typed, time-bounded handle over an [`Engine`].
#[derive(Clone)]
pub struct Store {
    pub(crate) engine: Box<dyn Engine>,
    name: String,
    timeout: Duration,
}

impl Store {
    pub fn new<E: Engine + 'static>(engine: E) -> Self {
        Self {
            engine: Box::new(engine),
            name: "store".to_owned(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    pub fn timeout(mut self, value: Duration) -> Self {
        self.timeout = value;
        self
    }

    pub fn label(&self) -> &str {
        &self.name
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                debug!(store = %self.name, timeout = ?self.timeout, "store call timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }

    pub async fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        self.bounded(self.engine.get(key)).await
    }

    pub async fn put_record(&self, record: Record) -> Result<()> {
        self.bounded(self.engine.put(record)).await
    }

    pub async fn delete(&self, key: &RecordKey) -> Result<()> {
        self.bounded(self.engine.delete(key)).await
    }

    pub async fn get_by_id<E: Entity>(&self, id: impl Into<String>) -> Result<Option<E>> {
        let key = E::key(id);

        match self.get(&key).await? {
            Some(record) => Ok(Some(E::from_record(&record)?)),
            _ => Ok(None),
        }
    }

    pub async fn put<E: Entity>(&self, entity: &E) -> Result<()> {
        self.put_record(entity.to_record()?).await
    }

    pub async fn delete_by_id<E: Entity>(&self, id: impl Into<String>) -> Result<()> {
        self.delete(&E::key(id)).await
    }

    /// One page of a whole entity table, `after` being the previous page's
    /// end cursor.
    pub async fn scan_all<E: Entity>(
        &self,
        first: u16,
        after: Option<CursorType>,
    ) -> Result<QueryResult<E>> {
        self.scan_table(E::table(), first, after)
            .await?
            .try_map(|record| E::from_record(&record))
    }

    pub async fn scan_table(
        &self,
        table: &str,
        first: u16,
        after: Option<CursorType>,
    ) -> Result<QueryResult<Record>> {
        self.bounded(self.engine.scan(
            table,
            None,
            QueryArgs::forward(first, after),
            CursorOrder::Asc,
        ))
        .await
    }

    pub async fn read_partition(
        &self,
        table: &str,
        partition: &str,
        args: QueryArgs,
        order: CursorOrder,
    ) -> Result<QueryResult<Record>> {
        self.bounded(self.engine.scan(table, Some(partition), args, order))
            .await
    }

    /// Every record of one partition, fetched page by page.
    pub async fn read_whole_partition(
        &self,
        table: &str,
        partition: &str,
        order: CursorOrder,
    ) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut after = None;

        loop {
            let page = self
                .read_partition(
                    table,
                    partition,
                    QueryArgs::forward(PARTITION_PAGE_SIZE, after),
                    order,
                )
                .await?;

            let has_next_page = page.page_info.has_next_page;
            after = page.page_info.end_cursor.clone();
            records.extend(page.nodes());

            if !has_next_page {
                break;
            }
        }

        Ok(records)
    }

    /// Every record of a table, fetched page by page.
    pub async fn read_whole_table(&self, table: &str) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut after = None;

        loop {
            let page = self.scan_table(table, PARTITION_PAGE_SIZE, after).await?;
            let has_next_page = page.page_info.has_next_page;
            after = page.page_info.end_cursor.clone();
            records.extend(page.nodes());

            if !has_next_page {
                break;
            }
        }

        Ok(records)
    }

    pub async fn increment_counter(&self, table: &str, key: &str, delta: i64) -> Result<()> {
        self.bounded(self.engine.increment_counter(table, key, delta))
            .await
    }

    pub async fn counter(&self, table: &str, key: &str) -> Result<i64> {
        self.bounded(self.engine.counter(table, key)).await
    }

    pub async fn truncate(&self, table: &str) -> Result<()> {
        self.bounded(self.engine.truncate(table)).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.bounded(self.engine.ping()).await
    }
}
