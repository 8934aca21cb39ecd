//! Tunables for the migration coordinator.
//!
//! Everything here has a sensible default; the migration phase itself is not
//! part of this struct; see [`crate::PhaseController`].

use std::time::Duration;

/// Environment variable holding the phase read at startup.
pub const PHASE_ENV: &str = "CUTOVER_PHASE";

/// Number of source entities read per page by the bulk migrator.
pub const DEFAULT_BATCH_SIZE: u16 = 100;

/// Pause between two migrator pages, on top of the cooperative yield.
pub const BATCH_INTERVAL: Duration = Duration::ZERO;

/// How long a mutation waits for the entity lock before giving up with
/// `ConflictingWrite`.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Number of daily partitions the destination feed looks back over.
pub const FEED_DAYS: u32 = 30;

/// Backlog entries handled by a single reconciliation sweep.
pub const RECONCILE_BATCH_SIZE: usize = 100;

/// Default period of the background reconciliation sweep.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CutoverConfig {
    pub batch_size: u16,
    pub batch_interval: Duration,
    pub lock_timeout: Duration,
    pub feed_days: u32,
    pub reconcile_batch_size: usize,
    pub reconcile_interval: Duration,
}

impl Default for CutoverConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_interval: BATCH_INTERVAL,
            lock_timeout: LOCK_TIMEOUT,
            feed_days: FEED_DAYS,
            reconcile_batch_size: RECONCILE_BATCH_SIZE,
            reconcile_interval: RECONCILE_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub struct ConfigBuilder {
    config: CutoverConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CutoverConfig::default(),
        }
    }

    /// Page size used when streaming the source collections.
    pub fn batch_size(mut self, size: u16) -> Self {
        self.config.batch_size = size.max(1);
        self
    }

    pub fn batch_interval(mut self, interval: Duration) -> Self {
        self.config.batch_interval = interval;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    pub fn feed_days(mut self, days: u32) -> Self {
        self.config.feed_days = days;
        self
    }

    pub fn reconcile_batch_size(mut self, size: usize) -> Self {
        self.config.reconcile_batch_size = size.max(1);
        self
    }

    pub fn reconcile_interval(mut self, interval: Duration) -> Self {
        self.config.reconcile_interval = interval;
        self
    }

    pub fn build(self) -> CutoverConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
