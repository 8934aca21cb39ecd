use parking_lot::Mutex;
use std::{collections::HashMap, fmt::Display, sync::Arc, time::Duration};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{CutoverError, Result};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Per-entity async locks, created on first use and evicted once idle.
///
/// Callers taking several locks go user, then email, then post, then author
/// counter. Two emails are taken in sorted order.
#[derive(Debug, Clone)]
pub struct EntityLocks {
    locks: LockMap,
    timeout: Duration,
}

impl EntityLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: LockMap::default(),
            timeout,
        }
    }

    pub async fn lock(&self, key: impl Display) -> Result<EntityGuard> {
        let key = key.to_string();
        let mutex = self.locks.lock().entry(key.to_owned()).or_default().clone();

        match tokio::time::timeout(self.timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(EntityGuard {
                key,
                guard: Some(guard),
                locks: self.locks.clone(),
            }),
            Err(_) => {
                debug!(%key, timeout = ?self.timeout, "entity lock wait exceeded");
                self.evict(&key);

                Err(CutoverError::ConflictingWrite(key))
            }
        }
    }

    /// Lock key guarding an author's post counter.
    pub fn counter_key(author: impl Display) -> String {
        format!("author_count#{author}")
    }

    /// Lock key reserving an email address while its owner is written.
    pub fn email_key(email: impl Display) -> String {
        format!("email#{email}")
    }

    /// Number of lock entries currently alive.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(&self, key: &str) {
        evict(&self.locks, key);
    }
}

fn evict(locks: &LockMap, key: &str) {
    let mut locks = locks.lock();

    if locks
        .get(key)
        .map(|mutex| Arc::strong_count(mutex) == 1)
        .unwrap_or(false)
    {
        locks.remove(key);
    }
}

pub struct EntityGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl EntityGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        evict(&self.locks, &self.key);
    }
}
