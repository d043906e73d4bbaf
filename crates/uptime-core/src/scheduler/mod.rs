//! Timer bookkeeping for every monitored target.
//!
//! One actor task owns the schedule table. Management code talks to it
//! through a cloneable [`SchedulerHandle`]; timers firing, targeted events and
//! periodic reconciliation against the [`TargetStore`] all funnel through the
//! same command channel, so the table never needs a lock.
//!
//! Due targets are handed to the [`DispatchPool`] and re-armed at dispatch
//! time, so a slow probe never delays its own next tick. Overlapping probes
//! of the same target are allowed.

mod engine;
mod entry;
mod job;
mod state;
mod stats;

pub use engine::ReconcileSummary;
pub use entry::{ScheduleEntry, ScheduleTable, ScheduleView};
pub use state::SchedulerState;
pub use stats::{ProbeStats, TargetCounters};

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::model::TargetId;
use crate::pool::DispatchPool;
use crate::prober::Prober;
use crate::store::{ResultSink, TargetStore};
use engine::{Command, Engine};
use job::JobContext;

pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn TargetStore>,
    sink: Arc<dyn ResultSink>,
    prober: Arc<dyn Prober>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn TargetStore>,
        sink: Arc<dyn ResultSink>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        Self {
            config,
            store,
            sink,
            prober,
        }
    }

    /// Spawns the actor and the dispatch pool, then triggers the initial
    /// reconcile. Must be called inside a tokio runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(SchedulerState::Idle));
        let stats = Arc::new(ProbeStats::new());
        let pool = Arc::new(DispatchPool::new(self.config.pool_size));

        let job = JobContext {
            prober: self.prober,
            store: self.store,
            sink: self.sink,
            stats: Arc::clone(&stats),
        };
        let engine = Engine::new(
            self.config,
            job,
            Arc::clone(&pool),
            Arc::clone(&state),
            tx.downgrade(),
        );
        tokio::spawn(engine.run(rx));

        SchedulerHandle {
            tx,
            state,
            stats,
            pool,
        }
    }
}

/// Cloneable front door to a running scheduler.
///
/// Dropping every handle stops the actor the same way [`shutdown`](Self::shutdown) does.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
    state: Arc<RwLock<SchedulerState>>,
    stats: Arc<ProbeStats>,
    pool: Arc<DispatchPool>,
}

impl SchedulerHandle {
    fn send(&self, cmd: Command) -> Result<(), SchedulerError> {
        self.tx.send(cmd).map_err(|_| SchedulerError::Stopped)
    }

    /// Resyncs the schedule with the store and waits for the result.
    pub async fn reconcile(&self) -> Result<ReconcileSummary, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reconcile(Some(reply)))?;
        rx.await.map_err(|_| SchedulerError::Stopped)?
    }

    /// Requests a resync without waiting for it.
    pub fn request_reconcile(&self) -> Result<(), SchedulerError> {
        self.send(Command::Reconcile(None))
    }

    /// Target created or edited. Must be sent after the store write commits;
    /// the scheduler re-reads the target from the store.
    pub fn notify_upsert(&self, id: TargetId) -> Result<(), SchedulerError> {
        self.send(Command::Upsert(id))
    }

    /// Target deleted. Must be sent after the store delete commits.
    pub fn notify_removed(&self, id: TargetId) -> Result<(), SchedulerError> {
        self.send(Command::Remove(id))
    }

    /// Dispatches a probe right away and restarts the target's interval.
    /// Returns false if the target is not scheduled.
    pub async fn fire_now(&self, id: TargetId) -> Result<bool, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::FireNow(id, reply))?;
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Current schedule, soonest first.
    pub async fn snapshot(&self) -> Result<Vec<ScheduleView>, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Stops dispatching, lets queued and running probes finish, then returns.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    pub fn stats(&self) -> &ProbeStats {
        &self.stats
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    pub fn completed(&self) -> usize {
        self.pool.completed()
    }
}
