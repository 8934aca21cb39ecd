#![forbid(unsafe_code)]

mod backlog;
mod config;
mod coordinator;
mod error;
mod health;
mod lock;
mod migrator;
mod mirror;
mod model;
mod phase;
mod router;
pub mod translator;

pub use backlog::*;
pub use config::*;
pub use coordinator::*;
pub use error::*;
pub use health::*;
pub use lock::*;
pub use migrator::*;
pub use mirror::Stores;
pub use model::*;
pub use phase::*;
pub use router::*;

use cutover_store::Store;
use tokio::task::JoinHandle;

/// Entry point wiring the phase controller to the stores.
///
/// Components handed out by this type are built with the phase current at
/// the time of the call; advancing the controller afterwards does not affect
/// them. Locks and the reconciliation backlog are shared by all of them.
#[derive(Clone)]
pub struct Cutover {
    controller: PhaseController,
    stores: Stores,
    locks: EntityLocks,
    backlog: Backlog,
    config: CutoverConfig,
}

impl Cutover {
    pub fn new(controller: PhaseController, source: Store, destination: Store) -> Self {
        let config = CutoverConfig::default();

        Self {
            controller,
            stores: Stores::new(source, destination),
            locks: EntityLocks::new(config.lock_timeout),
            backlog: Backlog::default(),
            config,
        }
    }

    /// Starts in the phase named by `CUTOVER_PHASE`.
    pub fn from_env(source: Store, destination: Store) -> Result<Self> {
        Ok(Self::new(PhaseController::from_env()?, source, destination))
    }

    pub fn config(mut self, config: CutoverConfig) -> Self {
        self.locks = EntityLocks::new(config.lock_timeout);
        self.config = config;
        self
    }

    pub fn phase(&self) -> Phase {
        self.controller.current()
    }

    pub fn controller(&self) -> &PhaseController {
        &self.controller
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn locks(&self) -> &EntityLocks {
        &self.locks
    }

    pub fn backlog(&self) -> &Backlog {
        &self.backlog
    }

    pub fn settings(&self) -> &CutoverConfig {
        &self.config
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(
            self.phase(),
            self.stores.clone(),
            self.locks.clone(),
            self.backlog.clone(),
        )
    }

    pub fn router(&self) -> Router {
        Router::new(self.phase(), self.stores.clone(), self.config.feed_days)
    }

    pub fn migrator(&self) -> Migrator {
        Migrator::new(self.stores.clone(), self.locks.clone(), &self.config)
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.stores.clone(),
            self.locks.clone(),
            self.backlog.clone(),
            self.config.reconcile_batch_size,
        )
    }

    pub async fn apply(&self, operation: Operation) -> Result<Outcome> {
        self.coordinator().apply(operation).await
    }

    pub async fn read(&self, query: ReadQuery) -> Result<Routed<ReadResult>> {
        self.router().read(query).await
    }

    pub async fn health(&self) -> Health {
        let (source, destination) = futures_util::future::join(
            Connectivity::probe(&self.stores.source),
            Connectivity::probe(&self.stores.destination),
        )
        .await;

        Health {
            phase: self.phase(),
            source,
            destination,
        }
    }

    /// Runs [`Reconciler::sweep`] every `reconcile_interval` in the
    /// background.
    pub fn spawn_reconciler(&self) -> JoinHandle<()> {
        self.reconciler().spawn(self.config.reconcile_interval)
    }
}
