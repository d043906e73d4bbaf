use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, StoreError};
use crate::model::{MonitoredTarget, TargetId, MAX_INTERVAL_SECS};
use crate::pool::DispatchPool;
use crate::scheduler::entry::{ScheduleEntry, ScheduleTable, ScheduleView};
use crate::scheduler::job::{run_probe, JobContext};
use crate::scheduler::state::SchedulerState;
use crate::scheduler::stats::ProbeStats;
use crate::store::TargetStore;

/// Stand-in deadline for a timer that overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

pub(crate) type ReconcileReply = oneshot::Sender<Result<ReconcileSummary, SchedulerError>>;

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub armed: usize,
    pub rearmed: usize,
    pub disarmed: usize,
    pub unchanged: usize,
    /// Targets left alone because a targeted event arrived while the
    /// snapshot was being read.
    pub skipped: usize,
    pub scheduled: usize,
}

pub(crate) enum Command {
    Reconcile(Option<ReconcileReply>),
    Listed(Result<Vec<MonitoredTarget>, StoreError>),
    Upsert(TargetId),
    Fetched {
        id: TargetId,
        version: u64,
        result: Result<MonitoredTarget, StoreError>,
    },
    Remove(TargetId),
    FireNow(TargetId, oneshot::Sender<bool>),
    Snapshot(oneshot::Sender<Vec<ScheduleView>>),
    Shutdown(oneshot::Sender<()>),
}

enum Applied {
    Armed,
    Rearmed,
    Unchanged,
    Disarmed,
}

#[derive(Default)]
struct ReconcileState {
    in_flight: bool,
    pending: bool,
    /// Callers answered by the fetch currently in flight.
    waiting: Vec<ReconcileReply>,
    /// Callers that arrived after it started; they need a fresher read.
    queued: Vec<ReconcileReply>,
    failures: u32,
}

/// Single owner of the schedule table. All mutations arrive as commands.
pub(crate) struct Engine {
    config: SchedulerConfig,
    store: Arc<dyn TargetStore>,
    job: JobContext,
    pool: Arc<DispatchPool>,
    stats: Arc<ProbeStats>,
    state: Arc<RwLock<SchedulerState>>,
    table: ScheduleTable,
    /// Targets touched by upsert/remove since the current fetch was issued.
    dirty: HashSet<TargetId>,
    /// Latest single-target read per id. Older reads are dropped on arrival.
    reads: HashMap<TargetId, u64>,
    read_seq: u64,
    reconcile: ReconcileState,
    next_reconcile_at: Instant,
    self_tx: mpsc::WeakUnboundedSender<Command>,
}

impl Engine {
    pub(crate) fn new(
        config: SchedulerConfig,
        job: JobContext,
        pool: Arc<DispatchPool>,
        state: Arc<RwLock<SchedulerState>>,
        self_tx: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            store: Arc::clone(&job.store),
            stats: Arc::clone(&job.stats),
            config,
            job,
            pool,
            state,
            table: ScheduleTable::new(),
            dirty: HashSet::new(),
            reads: HashMap::new(),
            read_seq: 0,
            reconcile: ReconcileState::default(),
            next_reconcile_at: Instant::now(),
            self_tx,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        self.transition(SchedulerState::Running).await;
        info!(
            pool_size = self.pool.size(),
            reconcile_secs = self.config.reconcile_interval.as_secs(),
            "Scheduler started"
        );
        self.request_reconcile(None);

        let mut shutdown_reply = None;
        loop {
            let next_due = self.table.next_due();
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Shutdown(reply)) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = sleep_until_opt(next_due) => self.fire_due(),
                _ = tokio::time::sleep_until(self.next_reconcile_at), if !self.reconcile.in_flight => {
                    self.request_reconcile(None);
                }
            }
        }

        self.transition(SchedulerState::Stopping).await;
        info!(scheduled = self.table.len(), "Scheduler stopping");
        for reply in self
            .reconcile
            .waiting
            .drain(..)
            .chain(self.reconcile.queued.drain(..))
        {
            let _ = reply.send(Err(SchedulerError::Stopped));
        }
        self.pool.shutdown().await;
        self.transition(SchedulerState::Stopped).await;
        info!("Scheduler stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn transition(&self, next: SchedulerState) {
        let mut state = self.state.write().await;
        let current = *state;
        if current.can_transition_to(next) {
            *state = next;
        } else {
            warn!(from = %current, to = %next, "Ignoring invalid scheduler state transition");
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Reconcile(reply) => self.request_reconcile(reply),
            Command::Listed(result) => self.finish_reconcile(result),
            Command::Upsert(id) => {
                self.dirty.insert(id);
                self.start_read(id);
            }
            Command::Fetched {
                id,
                version,
                result,
            } => self.finish_read(id, version, result),
            Command::Remove(id) => {
                self.dirty.insert(id);
                self.reads.remove(&id);
                if self.disarm(id) {
                    debug!(target_id = %id, "Target disarmed");
                }
            }
            Command::FireNow(id, reply) => {
                let fired = self.table.contains(id);
                if fired {
                    self.dispatch(id, Instant::now());
                }
                let _ = reply.send(fired);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.table.views(Instant::now()));
            }
            // Handled by the run loop.
            Command::Shutdown(_) => {}
        }
    }

    fn fire_due(&mut self) {
        let now = Instant::now();
        while let Some(id) = self.table.pop_due(now) {
            self.dispatch(id, now);
        }
    }

    /// Hands one probe to the pool and re-arms the entry from `now`.
    fn dispatch(&mut self, id: TargetId, now: Instant) {
        let Some(entry) = self.table.get(id) else {
            return;
        };
        let interval = entry.interval_at_arm_time;
        let job = run_probe(self.job.clone(), id, entry.url.clone()).boxed();

        if let Err(e) = self.pool.submit(job) {
            error!(target_id = %id, error = %e, "Could not dispatch probe");
        } else {
            self.table.mark_dispatched(id);
            self.stats.record_dispatch(id);
        }
        self.table.reschedule(id, after(now, interval));
    }

    fn disarm(&mut self, id: TargetId) -> bool {
        self.stats.forget(id);
        self.table.disarm(id).is_some()
    }

    /// Interval to arm with, or `None` when the target must not be scheduled.
    fn effective_interval(&self, target: &MonitoredTarget) -> Option<Duration> {
        let interval = target.interval();
        if interval.is_zero() {
            return None;
        }
        if interval < self.config.min_interval {
            warn!(
                target_id = %target.id,
                interval_secs = target.interval_secs,
                min_secs = self.config.min_interval.as_secs(),
                "Interval below minimum, clamping"
            );
            return Some(self.config.min_interval);
        }
        if interval.as_secs() > MAX_INTERVAL_SECS {
            warn!(
                target_id = %target.id,
                interval_secs = target.interval_secs,
                max_secs = MAX_INTERVAL_SECS,
                "Interval above maximum, clamping"
            );
            return Some(Duration::from_secs(MAX_INTERVAL_SECS));
        }
        Some(interval)
    }

    /// First fire time for a target that has no entry yet.
    fn initial_fire_at(&self, target: &MonitoredTarget, interval: Duration, now: Instant) -> Instant {
        match target.last_checked_at {
            None => now,
            Some(last) => {
                // A check stamped in the future counts as just now.
                let elapsed = (Utc::now() - last).to_std().unwrap_or(Duration::ZERO);
                after(now, interval.saturating_sub(elapsed))
            }
        }
    }

    fn apply(&mut self, target: &MonitoredTarget, now: Instant) -> Applied {
        let Some(interval) = self.effective_interval(target) else {
            return if self.disarm(target.id) {
                Applied::Disarmed
            } else {
                Applied::Unchanged
            };
        };

        let Some(entry) = self.table.get(target.id) else {
            let at = self.initial_fire_at(target, interval, now);
            self.table
                .arm(ScheduleEntry::new(target.id, target.url.clone(), at, interval));
            self.stats.track(target.id);
            return Applied::Armed;
        };

        let interval_changed = entry.interval_at_arm_time != interval;
        // A URL change is picked up by the next dispatch and never moves the timer.
        self.table.set_url(target.id, &target.url);
        if interval_changed {
            self.table.set_interval(target.id, interval);
            self.table.reschedule(target.id, after(now, interval));
            Applied::Rearmed
        } else {
            Applied::Unchanged
        }
    }

    /// Reads one target after a change notification. Every notification
    /// supersedes the reads issued before it, so whatever order concurrent
    /// API writes are notified in, the table follows the store.
    fn start_read(&mut self, id: TargetId) {
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        self.read_seq += 1;
        let version = self.read_seq;
        self.reads.insert(id, version);

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let result = store.get_target(id).await;
            let _ = tx.send(Command::Fetched {
                id,
                version,
                result,
            });
        });
    }

    fn finish_read(&mut self, id: TargetId, version: u64, result: Result<MonitoredTarget, StoreError>) {
        if self.reads.get(&id) != Some(&version) {
            debug!(target_id = %id, "Dropping superseded target read");
            return;
        }
        self.reads.remove(&id);

        match result {
            Ok(target) => match self.apply(&target, Instant::now()) {
                Applied::Armed => debug!(target_id = %id, "Target armed"),
                Applied::Rearmed => debug!(target_id = %id, "Target re-armed"),
                Applied::Disarmed => debug!(target_id = %id, "Target disarmed"),
                Applied::Unchanged => {}
            },
            Err(e) if e.is_not_found() => {
                if self.disarm(id) {
                    debug!(target_id = %id, "Target gone from store, disarmed");
                }
            }
            Err(e) => {
                warn!(target_id = %id, error = %e, "Could not read changed target, requesting reconcile");
                self.request_reconcile(None);
            }
        }
    }

    fn request_reconcile(&mut self, reply: Option<ReconcileReply>) {
        if let Some(reply) = reply {
            if self.reconcile.in_flight {
                self.reconcile.queued.push(reply);
            } else {
                self.reconcile.waiting.push(reply);
            }
        }
        if self.reconcile.in_flight {
            self.reconcile.pending = true;
            return;
        }
        self.start_fetch();
    }

    /// Reads the store off the actor so timers keep firing during slow reads.
    fn start_fetch(&mut self) {
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        self.dirty.clear();
        self.reconcile.in_flight = true;
        self.reconcile.pending = false;

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let result = store.list_targets().await;
            let _ = tx.send(Command::Listed(result));
        });
    }

    fn finish_reconcile(&mut self, result: Result<Vec<MonitoredTarget>, StoreError>) {
        self.reconcile.in_flight = false;
        let now = Instant::now();

        let outcome = match result {
            Ok(targets) => {
                let summary = self.apply_snapshot(targets, now);
                self.reconcile.failures = 0;
                self.next_reconcile_at = after(now, self.config.reconcile_interval);
                info!(
                    armed = summary.armed,
                    rearmed = summary.rearmed,
                    disarmed = summary.disarmed,
                    skipped = summary.skipped,
                    scheduled = summary.scheduled,
                    "Reconciled schedule"
                );
                Ok(summary)
            }
            Err(e) => {
                self.reconcile.failures += 1;
                let delay = self.backoff();
                self.next_reconcile_at = after(now, delay);
                warn!(
                    error = %e,
                    failures = self.reconcile.failures,
                    retry_ms = delay.as_millis() as u64,
                    "Reconcile failed, keeping current schedule"
                );
                Err(SchedulerError::Reconcile(e))
            }
        };

        for reply in self.reconcile.waiting.drain(..) {
            let _ = reply.send(outcome.clone());
        }
        self.reconcile.waiting = std::mem::take(&mut self.reconcile.queued);
        if self.reconcile.pending || !self.reconcile.waiting.is_empty() {
            self.start_fetch();
        }
    }

    /// Makes the table match `targets`, except for targets touched since the
    /// fetch was issued; for those the targeted event is newer than the snapshot.
    fn apply_snapshot(&mut self, targets: Vec<MonitoredTarget>, now: Instant) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut listed = HashSet::with_capacity(targets.len());

        for target in &targets {
            listed.insert(target.id);
            if self.dirty.contains(&target.id) {
                summary.skipped += 1;
                continue;
            }
            match self.apply(target, now) {
                Applied::Armed => summary.armed += 1,
                Applied::Rearmed => summary.rearmed += 1,
                Applied::Unchanged => summary.unchanged += 1,
                Applied::Disarmed => summary.disarmed += 1,
            }
        }

        let stale: Vec<TargetId> = self
            .table
            .ids()
            .filter(|id| !listed.contains(id) && !self.dirty.contains(id))
            .collect();
        for id in stale {
            self.disarm(id);
            summary.disarmed += 1;
        }

        summary.scheduled = self.table.len();
        summary
    }

    /// Exponential backoff with the same ±1/7 jitter the probe loops use.
    fn backoff(&self) -> Duration {
        let exp = self.reconcile.failures.saturating_sub(1).min(16);
        let base = self
            .config
            .reconcile_backoff
            .saturating_mul(1u32 << exp)
            .min(self.config.reconcile_backoff_max);
        let base_ms = base.as_millis() as u64;
        let jitter_range = base_ms / 7;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range * 2) as i64 - jitter_range as i64
        } else {
            0
        };
        Duration::from_millis((base_ms as i64 + jitter).max(1) as u64)
    }
}

fn after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
