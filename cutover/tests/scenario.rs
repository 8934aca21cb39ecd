mod common;

use common::Harness;
use cutover::{
    translator::{DESTINATION_TABLES, POSTS_BY_DATE},
    ConfigBuilder, Connectivity, MirrorStatus, Operation, Origin, Phase, ReadQuery, ReadResult,
};
use std::time::Duration;

#[tokio::test]
async fn end_to_end() {
    let h = Harness::new(Phase::SourceOnly);

    let ada = h.user("Ada").await;
    let post = h.post(&ada, "hello migration").await;
    h.comment(&post, &ada, "first comment").await;

    h.cutover.controller().advance().unwrap();
    let report = h.cutover.migrator().migrate(false).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.posts.written, 1);

    h.cutover.controller().advance().unwrap();

    let routed = h
        .cutover
        .read(ReadQuery::PostsByAuthor(ada.id))
        .await
        .unwrap();

    assert_eq!(routed.origin, Origin::Destination);

    let ReadResult::Posts(views) = routed.value else {
        panic!("expected posts");
    };

    assert_eq!(views.len(), 1);
    assert_eq!(views[0].post.comments.len(), 1);
    assert_eq!(views[0].comments_count, 1);
    assert_eq!(views[0].author_post_count, 1);

    let outcome = h
        .cutover
        .apply(Operation::DeletePost(post.id))
        .await
        .unwrap();

    assert_eq!(outcome.mirror, MirrorStatus::Applied);
    assert!(h.destination_post_rows().is_empty());
    assert_eq!(h.counter(&ada).await, 0);

    let err = h.cutover.read(ReadQuery::Post(post.id)).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn rollback_loses_nothing() {
    let h = Harness::new(Phase::DualWrite);
    let ada = h.user("Ada").await;
    h.advance_to(Phase::DestinationOnly);

    let mut posts = Vec::new();

    for i in 0..3 {
        posts.push(h.post(&ada, &format!("written after cutover {i}")).await);
    }

    h.cutover
        .controller()
        .rollback(Phase::DualReadFallback)
        .unwrap();

    for post in posts.iter() {
        let routed = h.cutover.router().post(post.id).await.unwrap();
        assert_eq!(routed.origin, Origin::Destination);
        assert_eq!(&routed.value.post, post);
    }

    let mut source = h.source_posts();
    source.sort_by_key(|p| p.id);
    posts.sort_by_key(|p| p.id);

    assert_eq!(source, posts);

    h.destination.set_down(true);

    for post in posts.iter() {
        let routed = h.cutover.router().post(post.id).await.unwrap();
        assert_eq!(routed.origin, Origin::SourceFallback);
    }
}

#[tokio::test]
async fn counter_is_created_minus_deleted() {
    let h = Harness::new(Phase::DualWrite);
    let ada = h.user("Ada").await;

    let mut posts = Vec::new();

    for i in 0..6 {
        posts.push(h.post(&ada, &format!("post {i}")).await);
    }

    for post in posts.iter().take(2) {
        h.cutover
            .apply(Operation::DeletePost(post.id))
            .await
            .unwrap();
    }

    assert_eq!(h.counter(&ada).await, 4);

    h.destination.fail_writes(POSTS_BY_DATE);

    for i in 0..3 {
        let outcome = h
            .cutover
            .apply(Operation::CreatePost(cutover::Post::new(
                ada.author_ref(),
                format!("flaky {i}"),
            )))
            .await
            .unwrap();

        assert_eq!(outcome.mirror, MirrorStatus::Pending);
    }

    let outcome = h
        .cutover
        .apply(Operation::DeletePost(posts[2].id))
        .await
        .unwrap();

    assert_eq!(outcome.mirror, MirrorStatus::Pending);
    assert_eq!(h.cutover.backlog().len(), 4);

    let sweep = h.cutover.reconciler().sweep().await;
    assert_eq!(sweep.requeued, 4);

    h.destination.heal();

    let sweep = h.cutover.reconciler().sweep().await;
    assert_eq!(sweep.repaired, 4);
    assert!(h.cutover.backlog().is_empty());

    assert_eq!(h.counter(&ada).await, 9 - 3);
    assert_eq!(h.destination_post_rows(), h.expected_post_rows());
}

#[tokio::test]
async fn background_reconciler_drains_backlog() {
    let h = Harness::with_config(
        Phase::DualWrite,
        ConfigBuilder::new().reconcile_interval(Duration::from_millis(20)),
    );
    let ada = h.user("Ada").await;

    h.destination.set_down(true);
    h.post(&ada, "eventually consistent").await;
    assert_eq!(h.cutover.backlog().len(), 1);
    h.destination.heal();

    let handle = h.cutover.spawn_reconciler();
    let backlog = h.cutover.backlog().clone();

    backoff::future::retry(
        backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(10))
            .with_max_elapsed_time(Some(Duration::from_secs(5)))
            .build(),
        || {
            let backlog = backlog.clone();

            async move {
                if backlog.is_empty() {
                    Ok(())
                } else {
                    Err(backoff::Error::transient("backlog not drained"))
                }
            }
        },
    )
    .await
    .unwrap();

    handle.abort();

    assert_eq!(h.destination_post_rows(), h.expected_post_rows());
    assert_eq!(h.counter(&ada).await, 1);
}

#[tokio::test]
async fn health_reports_both_stores() {
    let h = Harness::new(Phase::DualReadFallback);

    let health = h.cutover.health().await;
    assert_eq!(health.phase, Phase::DualReadFallback);
    assert_eq!(health.source, Connectivity::Connected);
    assert!(health.is_serving());

    h.destination.set_down(true);

    let health = h.cutover.health().await;
    assert!(matches!(health.destination, Connectivity::Disconnected(_)));
    assert!(health.is_serving());

    h.source.set_down(true);
    assert!(!h.cutover.health().await.is_serving());
}

#[tokio::test]
async fn every_table_is_known() {
    let h = Harness::new(Phase::DualWrite);
    let ada = h.user("Ada").await;
    h.post(&ada, "covered").await;

    let tables = h
        .destination
        .memory
        .dump()
        .into_iter()
        .map(|r| r.key.table)
        .collect::<std::collections::BTreeSet<_>>();

    assert!(tables
        .iter()
        .all(|table| DESTINATION_TABLES.contains(&table.as_str())));
    assert_eq!(tables.len(), DESTINATION_TABLES.len() - 1);
}
