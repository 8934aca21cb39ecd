use parking_lot::Mutex;
use parse_display::Display;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::Result,
    lock::EntityLocks,
    mirror::{self, Stores},
    model::EntityRef,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[display(style = "snake_case")]
pub enum Side {
    Source,
    Destination,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Source => Side::Destination,
            Side::Destination => Side::Source,
        }
    }
}

/// A mirror write that did not land. `target` is the side that is behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMirror {
    pub entity: EntityRef,
    pub target: Side,
    pub authors: BTreeSet<Uuid>,
    pub attempts: u32,
    pub error: String,
}

/// Entities whose mirror write failed, one entry per entity.
///
/// Recording an entity already present keeps the latest target and error
/// and merges the authors to recount.
#[derive(Debug, Clone, Default)]
pub struct Backlog(Arc<Mutex<BTreeMap<EntityRef, PendingMirror>>>);

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        entity: EntityRef,
        target: Side,
        authors: impl IntoIterator<Item = Uuid>,
        error: impl Into<String>,
    ) {
        self.push(PendingMirror {
            entity,
            target,
            authors: authors.into_iter().collect(),
            attempts: 0,
            error: error.into(),
        });
    }

    fn push(&self, pending: PendingMirror) {
        let mut entries = self.0.lock();

        match entries.get_mut(&pending.entity) {
            Some(entry) => {
                entry.target = pending.target;
                entry.error = pending.error;
                entry.attempts = entry.attempts.max(pending.attempts);
                entry.authors.extend(pending.authors);
            }
            _ => {
                entries.insert(pending.entity, pending);
            }
        }
    }

    /// Removes and returns up to `limit` entries, oldest entity key first.
    pub fn take(&self, limit: usize) -> Vec<PendingMirror> {
        let mut entries = self.0.lock();
        let keys = entries.keys().take(limit).copied().collect::<Vec<_>>();

        keys.iter().filter_map(|key| entries.remove(key)).collect()
    }

    /// Puts back an entry whose repair failed. A newer entry recorded in the
    /// meantime keeps its target.
    pub fn requeue(&self, mut pending: PendingMirror, error: impl Into<String>) {
        pending.attempts += 1;
        pending.error = error.into();

        let mut entries = self.0.lock();

        match entries.get_mut(&pending.entity) {
            Some(entry) => {
                entry.attempts = entry.attempts.max(pending.attempts);
                entry.authors.extend(pending.authors);
            }
            _ => {
                entries.insert(pending.entity, pending);
            }
        }
    }

    pub fn get(&self, entity: &EntityRef) -> Option<PendingMirror> {
        self.0.lock().get(entity).cloned()
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.0.lock().contains_key(entity)
    }

    pub fn pending(&self) -> Vec<PendingMirror> {
        self.0.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub repaired: usize,
    pub requeued: usize,
}

/// Drains the backlog by re-syncing each entity from the side that holds
/// its latest write.
#[derive(Clone)]
pub struct Reconciler {
    stores: Stores,
    locks: EntityLocks,
    backlog: Backlog,
    batch_size: usize,
}

impl Reconciler {
    pub fn new(stores: Stores, locks: EntityLocks, backlog: Backlog, batch_size: usize) -> Self {
        Self {
            stores,
            locks,
            backlog,
            batch_size: batch_size.max(1),
        }
    }

    /// One pass over at most `batch_size` entries. Entries that still fail
    /// go back to the backlog.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for pending in self.backlog.take(self.batch_size) {
            match self.repair(&pending).await {
                Ok(_) => {
                    debug!(entity = %pending.entity, target = %pending.target, "mirror repaired");
                    report.repaired += 1;
                }
                Err(e) => {
                    warn!(
                        entity = %pending.entity,
                        target = %pending.target,
                        attempts = pending.attempts + 1,
                        "mirror repair failed: {e}"
                    );
                    self.backlog.requeue(pending, e.to_string());
                    report.requeued += 1;
                }
            }
        }

        if report.repaired > 0 || report.requeued > 0 {
            info!(
                repaired = report.repaired,
                requeued = report.requeued,
                "reconciliation sweep done"
            );
        }

        report
    }

    async fn repair(&self, pending: &PendingMirror) -> Result<()> {
        mirror::sync(
            &self.stores,
            &self.locks,
            pending.entity,
            pending.target,
            &pending.authors,
        )
        .await
    }

    /// Sweeps on a fixed period until the returned handle is aborted.
    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            if period.is_zero() {
                error!("reconciliation period must be greater than zero");
                return;
            }

            info!(period = ?period, "reconciler started");

            let mut interval = interval_at(Instant::now() + period, period);

            loop {
                interval.tick().await;
                self.sweep().await;
            }
        })
    }
}
