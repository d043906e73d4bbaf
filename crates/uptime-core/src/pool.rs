//! Bounded-concurrency executor for probe jobs.
//!
//! Jobs are queued FIFO on an unbounded channel so `submit` never blocks the
//! scheduler loop. A dispatcher task takes jobs in order, waits for one of
//! `N` semaphore permits and only then spawns the job, so at most `N` jobs run
//! at once. Queue depth is unbounded: every job is a single probe bounded by
//! the probe timeout, so the backlog drains at roughly `N / timeout` jobs per
//! second in the worst case. `queued()` exposes the depth for monitoring; the
//! knob for a growing backlog is `pool_size`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::error::PoolError;

pub type Job = BoxFuture<'static, ()>;

#[derive(Debug, Default)]
struct Gauges {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    completed: AtomicUsize,
}

pub struct DispatchPool {
    size: usize,
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    gauges: Arc<Gauges>,
}

impl DispatchPool {
    /// Starts the dispatcher task. Must be called inside a tokio runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let gauges = Arc::new(Gauges::default());
        let handle = tokio::spawn(dispatch(rx, size, Arc::clone(&gauges)));
        debug!(size, "Dispatch pool started");

        Self {
            size,
            tx: Mutex::new(Some(tx)),
            dispatcher: tokio::sync::Mutex::new(Some(handle)),
            gauges,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Enqueues a job. Never waits for a free worker.
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        let guard = self.tx.lock().map_err(|_| PoolError::Closed)?;
        let tx = guard.as_ref().ok_or(PoolError::Closed)?;
        self.gauges.queued.fetch_add(1, Ordering::SeqCst);
        tx.send(job).map_err(|_| {
            self.gauges.queued.fetch_sub(1, Ordering::SeqCst);
            PoolError::Closed
        })
    }

    pub fn queued(&self) -> usize {
        self.gauges.queued.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.gauges.in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.gauges.completed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().map(|tx| tx.is_none()).unwrap_or(true)
    }

    /// Stops accepting jobs, runs what is already queued, waits for in-flight
    /// jobs to finish, then returns. Idempotent.
    pub async fn shutdown(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let handle = self.dispatcher.lock().await.take();
        if let Some(handle) = handle {
            info!(
                queued = self.queued(),
                in_flight = self.in_flight(),
                "Draining dispatch pool"
            );
            if let Err(e) = handle.await {
                error!(error = %e, "Dispatch pool task failed");
            }
        }
    }
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<Job>, size: usize, gauges: Arc<Gauges>) {
    let permits = Arc::new(Semaphore::new(size));
    let mut running = JoinSet::new();

    while let Some(job) = rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        gauges.queued.fetch_sub(1, Ordering::SeqCst);
        gauges.in_flight.fetch_add(1, Ordering::SeqCst);

        let job_gauges = Arc::clone(&gauges);
        running.spawn(async move {
            job.await;
            job_gauges.in_flight.fetch_sub(1, Ordering::SeqCst);
            job_gauges.completed.fetch_add(1, Ordering::SeqCst);
            drop(permit);
        });

        while let Some(finished) = running.try_join_next() {
            reap(finished, &gauges);
        }
    }

    while let Some(finished) = running.join_next().await {
        reap(finished, &gauges);
    }
    debug!("Dispatch pool drained");
}

fn reap(finished: Result<(), tokio::task::JoinError>, gauges: &Gauges) {
    if let Err(e) = finished {
        // A panicking job never reached its own bookkeeping.
        gauges.in_flight.fetch_sub(1, Ordering::SeqCst);
        gauges.completed.fetch_add(1, Ordering::SeqCst);
        error!(error = %e, "Probe job panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;

    fn tracked_job(
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        done: Arc<AtomicUsize>,
        hold: Duration,
    ) -> Job {
        async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(hold).await;
            running.fetch_sub(1, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_pool_size() {
        let pool = DispatchPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            pool.submit(tracked_job(
                Arc::clone(&running),
                Arc::clone(&peak),
                Arc::clone(&done),
                Duration::from_millis(100),
            ))
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.queued(), 0);
        assert_eq!(pool.completed(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_jobs_in_submission_order() {
        let pool = DispatchPool::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            pool.submit(
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    order.lock().unwrap().push(i);
                }
                .boxed(),
            )
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let pool = DispatchPool::new(2);
        pool.shutdown().await;
        assert!(pool.is_closed());
        let err = pool.submit(async {}.boxed()).unwrap_err();
        assert_eq!(err, PoolError::Closed);
        // Second shutdown is a no-op.
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_job_does_not_poison_pool() {
        let pool = DispatchPool::new(1);
        let done = Arc::new(AtomicUsize::new(0));

        pool.submit(async { panic!("probe blew up") }.boxed()).unwrap();
        let d = Arc::clone(&done);
        pool.submit(
            async move {
                d.fetch_add(1, Ordering::SeqCst);
            }
            .boxed(),
        )
        .unwrap();

        pool.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_does_not_block_when_saturated() {
        let pool = DispatchPool::new(1);
        pool.submit(tokio::time::sleep(Duration::from_secs(60)).boxed())
            .unwrap();
        for _ in 0..100 {
            pool.submit(async {}.boxed()).unwrap();
        }
        tokio::task::yield_now().await;
        assert_eq!(pool.in_flight(), 1);
        assert!(pool.queued() >= 99);
        pool.shutdown().await;
        assert_eq!(pool.completed(), 101);
    }
}
