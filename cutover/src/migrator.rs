use cutover_store::{Entity, Record, RecordKey};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::{
    config::CutoverConfig,
    error::{CutoverError, Result},
    lock::EntityLocks,
    mirror::{self, Stores},
    model::{Document, EntityRef, Post, User},
    translator::{DESTINATION_TABLES, POSTS_BY_ID, USERS},
};

/// Stops a running migration before its next entity. Aborting is final for
/// the migrator the handle came from.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationFailure {
    /// Source record the failure belongs to.
    pub key: RecordKey,
    /// `None` when the record id could not even be read.
    pub entity: Option<EntityRef>,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub scanned: usize,
    pub written: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    pub users: Tally,
    pub posts: Tally,
    pub scanned: usize,
    pub written: usize,
    pub failed: usize,
    pub failures: Vec<MigrationFailure>,
    pub aborted: bool,
}

impl MigrationReport {
    pub fn is_complete(&self) -> bool {
        !self.aborted && self.failed == 0
    }

    fn tally(&mut self, table: &str) -> &mut Tally {
        if table == User::table() {
            &mut self.users
        } else {
            &mut self.posts
        }
    }

    fn written(&mut self, table: &str) {
        self.tally(table).written += 1;
        self.written += 1;
    }

    fn scanned(&mut self, table: &str) {
        self.tally(table).scanned += 1;
        self.scanned += 1;
    }

    fn failure(&mut self, failure: MigrationFailure) {
        self.tally(&failure.key.table).failed += 1;
        self.failed += 1;
        self.failures.push(failure);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub source_users: usize,
    pub destination_users: usize,
    pub source_posts: usize,
    pub destination_posts: usize,
}

impl VerificationReport {
    pub fn is_consistent(&self) -> bool {
        self.source_users == self.destination_users && self.source_posts == self.destination_posts
    }
}

/// Replays the whole source into the destination, users then posts.
///
/// Each entity is re-read under its lock before being translated, so a
/// migration running alongside live dual-writes never resurrects stale
/// state.
#[derive(Clone)]
pub struct Migrator {
    stores: Stores,
    locks: EntityLocks,
    batch_size: u16,
    batch_interval: Duration,
    abort: AbortHandle,
}

impl Migrator {
    pub fn new(stores: Stores, locks: EntityLocks, config: &CutoverConfig) -> Self {
        Self {
            stores,
            locks,
            batch_size: config.batch_size.max(1),
            batch_interval: config.batch_interval,
            abort: AbortHandle::default(),
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Runs a full migration. With `clear`, every destination table is
    /// truncated first.
    ///
    /// Per-entity failures end up in the report; only a failed truncate or
    /// page scan returns an error.
    pub async fn migrate(&self, clear: bool) -> Result<MigrationReport> {
        if clear {
            for table in DESTINATION_TABLES {
                self.stores.destination.truncate(table).await?;
            }

            info!(tables = DESTINATION_TABLES.len(), "destination cleared");
        }

        let mut report = MigrationReport::default();

        self.migrate_collection::<User>(&mut report).await?;

        if !report.aborted {
            self.migrate_collection::<Post>(&mut report).await?;
        }

        info!(
            scanned = report.scanned,
            written = report.written,
            failed = report.failed,
            aborted = report.aborted,
            "migration finished"
        );

        Ok(report)
    }

    async fn migrate_collection<D: Document>(&self, report: &mut MigrationReport) -> Result<()> {
        let table = D::table();
        let mut after = None;

        info!(collection = table, "migrating collection");

        loop {
            let page = self
                .stores
                .source
                .scan_table(table, self.batch_size, after)
                .await?;

            for edge in page.edges.iter() {
                if self.abort.is_aborted() {
                    warn!(collection = table, "migration aborted");
                    report.aborted = true;

                    return Ok(());
                }

                report.scanned(table);

                match self.migrate_record::<D>(&edge.node).await {
                    Ok(_) => report.written(table),
                    Err(failure) => {
                        warn!(key = %failure.key, "migration failed: {}", failure.error);
                        report.failure(failure);
                    }
                }
            }

            debug!(collection = table, scanned = report.scanned, "batch migrated");

            if !page.page_info.has_next_page {
                return Ok(());
            }

            after = page.page_info.end_cursor;

            tokio::task::yield_now().await;

            if !self.batch_interval.is_zero() {
                tokio::time::sleep(self.batch_interval).await;
            }
        }
    }

    async fn migrate_record<D: Document>(
        &self,
        record: &Record,
    ) -> std::result::Result<(), MigrationFailure> {
        let key = record.key.clone();
        let entity = mirror::decode_id(record).map(D::entity_ref_of);

        let res = match (entity, D::from_record(record)) {
            (Some(entity), Ok(_)) => self.migrate_entity(entity).await,
            (_, Err(e)) => Err(e.into()),
            (None, Ok(_)) => Err(CutoverError::Translation(format!(
                "`{}` is not a valid id",
                key.partition
            ))),
        };

        res.map_err(|e| MigrationFailure {
            key,
            entity,
            error: e.to_string(),
        })
    }

    async fn migrate_entity(&self, entity: EntityRef) -> Result<()> {
        let _guard = self.locks.lock(entity).await?;

        mirror::copy_to_destination(&self.stores, &self.locks, entity).await?;

        Ok(())
    }

    /// Migrates again only the entities of a previous report's failures.
    pub async fn retry(&self, failures: &[MigrationFailure]) -> MigrationReport {
        let mut report = MigrationReport::default();

        for failure in failures {
            report.scanned(&failure.key.table);

            let Some(entity) = failure.entity else {
                report.failure(failure.clone());
                continue;
            };

            match self.migrate_entity(entity).await {
                Ok(_) => report.written(&failure.key.table),
                Err(e) => {
                    warn!(%entity, "migration retry failed: {e}");
                    report.failure(MigrationFailure {
                        error: e.to_string(),
                        ..failure.clone()
                    });
                }
            }
        }

        info!(
            retried = report.scanned,
            written = report.written,
            failed = report.failed,
            "migration retry finished"
        );

        report
    }

    /// Compares entity counts on both sides.
    pub async fn verify(&self) -> Result<VerificationReport> {
        let source = &self.stores.source;
        let destination = &self.stores.destination;

        let report = VerificationReport {
            source_users: source.read_whole_table(User::table()).await?.len(),
            destination_users: destination.read_whole_table(USERS).await?.len(),
            source_posts: source.read_whole_table(Post::table()).await?.len(),
            destination_posts: destination.read_whole_table(POSTS_BY_ID).await?.len(),
        };

        if report.is_consistent() {
            info!(
                users = report.source_users,
                posts = report.source_posts,
                "migration verified"
            );
        } else {
            warn!(?report, "migration verification found a count mismatch");
        }

        Ok(report)
    }
}
