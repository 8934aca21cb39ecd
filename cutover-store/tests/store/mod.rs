use async_trait::async_trait;
use cutover_store::{
    CursorOrder, Engine, Entity, QueryArgs, QueryResult, Record, RecordKey, Result, Store,
};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub text: String,
}

impl Entity for Note {
    fn table<'a>() -> &'a str {
        "notes"
    }

    fn id(&self) -> String {
        self.id.to_owned()
    }
}

pub async fn init(store: &Store) -> anyhow::Result<()> {
    for i in 0..7 {
        store
            .put(&Note {
                id: format!("note-{i}"),
                text: format!("text {i}"),
            })
            .await?;
    }

    for (clustering, text) in [("2024-01-03", "c"), ("2024-01-01", "a"), ("2024-01-02", "b")] {
        store
            .put_record(
                Record::new(RecordKey::new("timeline", "alice").clustering(clustering))
                    .data(text)?,
            )
            .await?;
    }

    store
        .put_record(
            Record::new(RecordKey::new("timeline", "bob").clustering("2024-01-01")).data("z")?,
        )
        .await?;

    Ok(())
}

pub async fn test_get_put_delete(store: &Store) -> anyhow::Result<()> {
    let note = Note {
        id: "crud".to_owned(),
        text: "first".to_owned(),
    };

    assert_eq!(store.get_by_id::<Note>("crud").await?, None);

    store.put(&note).await?;
    assert_eq!(store.get_by_id::<Note>("crud").await?, Some(note.clone()));

    let edited = Note {
        text: "second".to_owned(),
        ..note
    };

    store.put(&edited).await?;
    assert_eq!(store.get_by_id::<Note>("crud").await?, Some(edited));

    store.delete_by_id::<Note>("crud").await?;
    assert_eq!(store.get_by_id::<Note>("crud").await?, None);

    store.delete_by_id::<Note>("crud").await?;

    Ok(())
}

pub async fn test_scan_all_pages(store: &Store) -> anyhow::Result<()> {
    let first = store.scan_all::<Note>(3, None).await?;
    assert_eq!(first.edges.len(), 3);
    assert!(first.page_info.has_next_page);

    let mut ids = first
        .edges
        .iter()
        .map(|e| e.node.id.to_owned())
        .collect::<Vec<_>>();
    let mut after = first.page_info.end_cursor;

    loop {
        let page = store.scan_all::<Note>(3, after).await?;
        ids.extend(page.edges.iter().map(|e| e.node.id.to_owned()));

        if !page.page_info.has_next_page {
            break;
        }

        after = page.page_info.end_cursor;
    }

    let seeded = ids
        .into_iter()
        .filter(|id| id.starts_with("note-"))
        .collect::<Vec<_>>();

    assert_eq!(
        seeded,
        (0..7).map(|i| format!("note-{i}")).collect::<Vec<_>>()
    );

    Ok(())
}

pub async fn test_partition_order(store: &Store) -> anyhow::Result<()> {
    let asc = store
        .read_whole_partition("timeline", "alice", CursorOrder::Asc)
        .await?
        .iter()
        .map(|r| r.to_data::<String>())
        .collect::<Result<Vec<_>>>()?;

    assert_eq!(asc, vec!["a", "b", "c"]);

    let desc = store
        .read_partition(
            "timeline",
            "alice",
            QueryArgs::forward(2, None),
            CursorOrder::Desc,
        )
        .await?;

    assert_eq!(
        desc.nodes()
            .iter()
            .map(|r| r.to_data::<String>())
            .collect::<Result<Vec<_>>>()?,
        vec!["c", "b"]
    );

    let missing = store
        .read_whole_partition("timeline", "nobody", CursorOrder::Asc)
        .await?;

    assert!(missing.is_empty());

    Ok(())
}

pub async fn test_counters(store: &Store) -> anyhow::Result<()> {
    assert_eq!(store.counter("likes", "counters").await?, 0);

    store.increment_counter("likes", "counters", 3).await?;
    store.increment_counter("likes", "counters", -1).await?;

    assert_eq!(store.counter("likes", "counters").await?, 2);

    Ok(())
}

pub async fn test_concurrency(store: &Store) -> anyhow::Result<()> {
    join_all((0..50).map(|_| store.increment_counter("hits", "concurrency", 1))).await;

    assert_eq!(store.counter("hits", "concurrency").await?, 50);

    Ok(())
}

pub async fn test_truncate(store: &Store) -> anyhow::Result<()> {
    store.increment_counter("timeline", "alice", 4).await?;
    store.truncate("timeline").await?;
    store.truncate("timeline").await?;

    assert!(store
        .read_whole_partition("timeline", "alice", CursorOrder::Asc)
        .await?
        .is_empty());
    assert_eq!(store.counter("timeline", "alice").await?, 0);
    assert_eq!(store.read_whole_table("notes").await?.len(), 7);

    Ok(())
}

/// Engine whose every call sleeps before answering.
#[derive(Clone)]
pub struct Slow(pub Duration);

#[async_trait]
impl Engine for Slow {
    async fn get(&self, _key: &RecordKey) -> Result<Option<Record>> {
        tokio::time::sleep(self.0).await;
        Ok(None)
    }

    async fn put(&self, _record: Record) -> Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }

    async fn delete(&self, _key: &RecordKey) -> Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }

    async fn scan(
        &self,
        _table: &str,
        _partition: Option<&str>,
        _args: QueryArgs,
        _order: CursorOrder,
    ) -> Result<QueryResult<Record>> {
        tokio::time::sleep(self.0).await;
        Ok(QueryResult::default())
    }

    async fn increment_counter(&self, _table: &str, _key: &str, _delta: i64) -> Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }

    async fn counter(&self, _table: &str, _key: &str) -> Result<i64> {
        tokio::time::sleep(self.0).await;
        Ok(0)
    }

    async fn truncate(&self, _table: &str) -> Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}
