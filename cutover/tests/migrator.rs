mod common;

use common::Harness;
use cutover::{
    translator::{DESTINATION_TABLES, POSTS_BY_ID},
    ConfigBuilder, EntityRef, Operation, Phase, Post,
};
use cutover_store::{Engine, Entity, Record, RecordKey};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

async fn seeded(config: ConfigBuilder) -> Harness {
    let h = Harness::with_config(Phase::SourceOnly, config);
    let ada = h.user("Ada").await;
    let bob = h.user("Bob").await;
    let cleo = h.user("Cleo").await;

    for i in 0..4 {
        let post = h.post(&ada, &format!("ada post {i}")).await;
        h.comment(&post, &bob, "nice").await;
    }

    for i in 0..3 {
        h.post(&bob, &format!("bob post {i}")).await;
    }

    h.post(&cleo, "42 is the answer").await;

    h
}

#[tokio::test]
async fn migrates_everything() {
    let h = seeded(ConfigBuilder::new().batch_size(3)).await;
    assert!(h.destination.memory.dump().is_empty());

    let report = h.cutover.migrator().migrate(false).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.users.scanned, 3);
    assert_eq!(report.posts.scanned, 8);
    assert_eq!(report.scanned, 11);
    assert_eq!(report.written, 11);
    assert_eq!(h.destination_post_rows(), h.expected_post_rows());

    let verification = h.cutover.migrator().verify().await.unwrap();
    assert!(verification.is_consistent());
    assert_eq!(verification.destination_posts, 8);

    let counts = h
        .destination
        .memory
        .dump_counters()
        .into_iter()
        .map(|(_, _, value)| value)
        .collect::<Vec<_>>();

    assert_eq!(counts.iter().sum::<i64>(), 8);
}

#[tokio::test]
async fn clear_and_remigrate_is_identical() {
    let h = seeded(ConfigBuilder::new()).await;
    let migrator = h.cutover.migrator();

    migrator.migrate(true).await.unwrap();
    let rows = h.destination.memory.dump();
    let counters = h.destination.memory.dump_counters();

    migrator.migrate(true).await.unwrap();

    assert_eq!(h.destination.memory.dump(), rows);
    assert_eq!(h.destination.memory.dump_counters(), counters);
}

#[tokio::test]
async fn rerun_without_clear_changes_nothing() {
    let h = seeded(ConfigBuilder::new().batch_size(2)).await;
    let migrator = h.cutover.migrator();

    migrator.migrate(false).await.unwrap();
    let rows = h.destination.memory.dump();
    let counters = h.destination.memory.dump_counters();

    let report = migrator.migrate(false).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(h.destination.memory.dump(), rows);
    assert_eq!(h.destination.memory.dump_counters(), counters);
}

#[tokio::test]
async fn clear_removes_stale_rows() {
    let h = seeded(ConfigBuilder::new()).await;
    let stale = Record::new(RecordKey::new(POSTS_BY_ID, Uuid::new_v4().to_string()))
        .data(json!({ "stale": true }))
        .unwrap();

    h.destination.memory.put(stale.clone()).await.unwrap();

    h.cutover.migrator().migrate(true).await.unwrap();

    assert!(!h.destination.memory.dump().contains(&stale));
    assert_eq!(h.destination_post_rows(), h.expected_post_rows());
}

#[tokio::test]
async fn bad_records_become_report_entries() {
    let h = seeded(ConfigBuilder::new()).await;
    let broken = Uuid::new_v4();

    h.source
        .memory
        .put(
            Record::new(Post::key(broken.to_string()))
                .data(json!({ "id": broken, "content": "no author" }))
                .unwrap(),
        )
        .await
        .unwrap();

    h.source
        .memory
        .put(
            Record::new(Post::key("not-a-uuid"))
                .data(json!({ "nonsense": 1 }))
                .unwrap(),
        )
        .await
        .unwrap();

    let report = h.cutover.migrator().migrate(false).await.unwrap();

    assert!(!report.aborted);
    assert_eq!(report.failed, 2);
    assert_eq!(report.posts.failed, 2);
    assert_eq!(report.written, 11);

    let entities = report
        .failures
        .iter()
        .map(|f| f.entity)
        .collect::<Vec<_>>();

    assert!(entities.contains(&Some(EntityRef::Post(broken))));
    assert!(entities.contains(&None));

    let verification = h.cutover.migrator().verify().await.unwrap();
    assert!(!verification.is_consistent());
}

#[tokio::test]
async fn retry_only_failed_entities() {
    let h = seeded(ConfigBuilder::new()).await;

    h.destination.fail_writes(POSTS_BY_ID);
    let report = h.cutover.migrator().migrate(false).await.unwrap();

    assert_eq!(report.users.written, 3);
    assert_eq!(report.posts.failed, 8);

    h.destination.heal();
    let retried = h.cutover.migrator().retry(&report.failures).await;

    assert!(retried.is_complete());
    assert_eq!(retried.written, 8);
    assert_eq!(h.destination_post_rows(), h.expected_post_rows());
}

#[tokio::test]
async fn truncate_failure_aborts() {
    let h = seeded(ConfigBuilder::new()).await;
    h.destination.set_down(true);

    let err = h.cutover.migrator().migrate(true).await.unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn scan_failure_aborts() {
    let h = seeded(ConfigBuilder::new()).await;
    h.source.set_down(true);

    assert!(h.cutover.migrator().migrate(false).await.is_err());
}

#[tokio::test]
async fn abort_before_start() {
    let h = seeded(ConfigBuilder::new()).await;
    let migrator = h.cutover.migrator();

    migrator.abort_handle().abort();
    let report = migrator.migrate(false).await.unwrap();

    assert!(report.aborted);
    assert_eq!(report.scanned, 0);
    assert!(h.destination.memory.dump().is_empty());
}

#[tokio::test]
async fn abort_between_batches() {
    let h = seeded(
        ConfigBuilder::new()
            .batch_size(1)
            .batch_interval(Duration::from_millis(20)),
    )
    .await;

    let migrator = h.cutover.migrator();
    let handle = migrator.abort_handle();
    let task = tokio::spawn(async move { migrator.migrate(false).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.abort();

    let report = task.await.unwrap().unwrap();

    assert!(report.aborted);
    assert!(report.scanned > 0);
    assert!(report.scanned < 11);
    assert_eq!(report.written, report.scanned);
}

#[tokio::test]
async fn migration_races_live_writes() {
    let h = seeded(ConfigBuilder::new().batch_size(2)).await;
    h.advance_to(Phase::DualWrite);

    let ada = h.user("Dana").await;
    let migrator = h.cutover.migrator();
    let migration = tokio::spawn(async move { migrator.migrate(false).await });

    let mut posts = Vec::new();

    for i in 0..5 {
        posts.push(h.post(&ada, &format!("live {i}")).await);
    }

    h.cutover
        .apply(Operation::DeletePost(posts[0].id))
        .await
        .unwrap();

    migration.await.unwrap().unwrap();

    assert_eq!(h.destination_post_rows(), h.expected_post_rows());
    assert_eq!(h.counter(&ada).await, 4);
}

#[tokio::test]
async fn every_destination_table_is_cleared() {
    let h = seeded(ConfigBuilder::new()).await;
    h.cutover.migrator().migrate(false).await.unwrap();

    let before = h.destination.memory.dump().len();
    assert!(before > 0);

    h.source.set_down(true);
    let _ = h.cutover.migrator().migrate(true).await;

    assert!(h.destination.memory.dump().is_empty());
    assert!(h
        .destination
        .memory
        .dump_counters()
        .iter()
        .all(|(table, _, _)| !DESTINATION_TABLES.contains(&table.as_str())));
}
