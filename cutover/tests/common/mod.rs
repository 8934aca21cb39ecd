#![allow(dead_code)]

use async_trait::async_trait;
use cutover::{
    translator::{self, POST_TABLES},
    AuthorRef, Comment, ConfigBuilder, Cutover, Operation, Phase, PhaseController, Post, User,
};
use cutover_store::{
    CursorOrder, Engine, Memory, QueryArgs, QueryResult, Record, RecordKey, Result, Store,
    StoreError,
};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Memory engine that fails on demand: either entirely (`down`) or only for
/// writes to selected tables. It can also yield or sleep before every call so
/// concurrent operations interleave.
#[derive(Clone, Default)]
pub struct Faulty {
    pub memory: Memory,
    down: Arc<AtomicBool>,
    yielding: Arc<AtomicBool>,
    latency: Arc<Mutex<Duration>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl Faulty {
    /// Engine that hands control back to the runtime before every call.
    pub fn yielding() -> Self {
        let engine = Self::default();
        engine.yielding.store(true, Ordering::SeqCst);
        engine
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    async fn pause(&self) {
        let latency = *self.latency.lock();

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        } else if self.yielding.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, table: &str) {
        self.failing.lock().insert(table.to_owned());
    }

    pub fn heal(&self) {
        self.set_down(false);
        self.failing.lock().clear();
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".to_owned()));
        }

        Ok(())
    }

    fn check_write(&self, table: &str) -> Result<()> {
        self.check()?;

        if self.failing.lock().contains(table) {
            return Err(StoreError::Unavailable(format!("injected write failure on {table}")));
        }

        Ok(())
    }
}

#[async_trait]
impl Engine for Faulty {
    async fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        self.pause().await;
        self.check()?;
        self.memory.get(key).await
    }

    async fn put(&self, record: Record) -> Result<()> {
        self.pause().await;
        self.check_write(&record.key.table)?;
        self.memory.put(record).await
    }

    async fn delete(&self, key: &RecordKey) -> Result<()> {
        self.pause().await;
        self.check_write(&key.table)?;
        self.memory.delete(key).await
    }

    async fn scan(
        &self,
        table: &str,
        partition: Option<&str>,
        args: QueryArgs,
        order: CursorOrder,
    ) -> Result<QueryResult<Record>> {
        self.pause().await;
        self.check()?;
        self.memory.scan(table, partition, args, order).await
    }

    async fn increment_counter(&self, table: &str, key: &str, delta: i64) -> Result<()> {
        self.pause().await;
        self.check_write(table)?;
        self.memory.increment_counter(table, key, delta).await
    }

    async fn counter(&self, table: &str, key: &str) -> Result<i64> {
        self.pause().await;
        self.check()?;
        self.memory.counter(table, key).await
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        self.pause().await;
        self.check_write(table)?;
        self.memory.truncate(table).await
    }

    async fn ping(&self) -> Result<()> {
        self.pause().await;
        self.check()?;
        self.memory.ping().await
    }
}

pub struct Harness {
    pub source: Faulty,
    pub destination: Faulty,
    pub cutover: Cutover,
}

impl Harness {
    pub fn new(phase: Phase) -> Self {
        Self::with_config(phase, ConfigBuilder::new())
    }

    pub fn with_config(phase: Phase, config: ConfigBuilder) -> Self {
        Self::with_engines(phase, config, Faulty::default(), Faulty::default())
    }

    /// Both stores over engines that yield before every call.
    pub fn yielding(phase: Phase) -> Self {
        Self::with_engines(phase, ConfigBuilder::new(), Faulty::yielding(), Faulty::yielding())
    }

    pub fn with_engines(
        phase: Phase,
        config: ConfigBuilder,
        source: Faulty,
        destination: Faulty,
    ) -> Self {
        let cutover = Cutover::new(
            PhaseController::new(phase),
            Store::new(source.clone()).name("source"),
            Store::new(destination.clone()).name("destination"),
        )
        .config(config.build());

        Self {
            source,
            destination,
            cutover,
        }
    }

    pub fn advance_to(&self, phase: Phase) {
        while self.cutover.phase() < phase {
            self.cutover.controller().advance().unwrap();
        }
    }

    pub async fn user(&self, name: &str) -> User {
        let user = User::new(name, format!("{}@example.com", name.to_lowercase()));

        self.cutover
            .apply(Operation::CreateUser(user.clone()))
            .await
            .unwrap();

        user
    }

    pub async fn post(&self, author: &User, content: &str) -> Post {
        let post = Post::new(author.author_ref(), content);

        self.cutover
            .apply(Operation::CreatePost(post.clone()))
            .await
            .unwrap();

        post
    }

    pub async fn comment(&self, post: &Post, author: &User, content: &str) -> Comment {
        let comment = Comment::new(author.author_ref(), content);

        self.cutover
            .apply(Operation::AddComment {
                post: post.id,
                comment: comment.clone(),
            })
            .await
            .unwrap();

        comment
    }

    /// Every post row of the destination, sorted.
    pub fn destination_post_rows(&self) -> Vec<Record> {
        rows(&self.destination.memory, &POST_TABLES)
    }

    /// The rows the destination should hold given the current source posts.
    pub fn expected_post_rows(&self) -> Vec<Record> {
        let mut expected = self
            .source_posts()
            .iter()
            .flat_map(|post| translator::project(post).unwrap().into_records())
            .collect::<Vec<_>>();

        expected.sort_by(|a, b| a.key.cmp(&b.key));
        expected
    }

    pub fn source_posts(&self) -> Vec<Post> {
        self.source
            .memory
            .dump()
            .into_iter()
            .filter(|record| record.key.table == "posts")
            .map(|record| record.to_data().unwrap())
            .collect()
    }

    pub async fn counter(&self, author: &User) -> i64 {
        self.cutover
            .stores()
            .destination
            .counter(translator::AUTHOR_POST_COUNTS, &author.id.to_string())
            .await
            .unwrap()
    }
}

pub fn rows(memory: &Memory, tables: &[&str]) -> Vec<Record> {
    let mut rows = memory
        .dump()
        .into_iter()
        .filter(|record| tables.contains(&record.key.table.as_str()))
        .collect::<Vec<_>>();

    rows.sort_by(|a, b| a.key.cmp(&b.key));
    rows
}

pub fn author(name: &str) -> AuthorRef {
    AuthorRef {
        id: uuid::Uuid::new_v4(),
        name: name.to_owned(),
    }
}

pub const SHORT_LOCK: Duration = Duration::from_millis(50);
