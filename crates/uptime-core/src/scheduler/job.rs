use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{CheckResult, TargetId};
use crate::prober::{ProbeReport, Prober};
use crate::scheduler::stats::ProbeStats;
use crate::store::{ResultSink, TargetStore};

/// Everything a probe job needs, shared by every dispatched job.
#[derive(Clone)]
pub(crate) struct JobContext {
    pub prober: Arc<dyn Prober>,
    pub store: Arc<dyn TargetStore>,
    pub sink: Arc<dyn ResultSink>,
    pub stats: Arc<ProbeStats>,
}

/// Probes one URL and records the outcome.
///
/// The result is appended before the status is updated so a reader that sees
/// the new status can always find the result that produced it. A target that
/// disappears while the probe is running gets neither write.
pub(crate) async fn run_probe(ctx: JobContext, target_id: TargetId, url: String) {
    let report = ctx.prober.probe(&url).await;
    let observed_at = Utc::now();
    debug!(
        target_id = %target_id,
        url = %url,
        outcome = %report.outcome,
        "Probe finished"
    );

    match ctx.store.get_target(target_id).await {
        Err(e) if e.is_not_found() => {
            discard(&ctx, target_id);
            return;
        }
        // Not fatal: the writes below will fail or succeed on their own.
        Err(e) => warn!(target_id = %target_id, error = %e, "Existence check failed"),
        Ok(_) => {}
    }

    ctx.stats.record_report(target_id, &report);
    let status = report.outcome.status();
    let result = to_result(target_id, observed_at, report);

    let sink = Arc::clone(&ctx.sink);
    match retry_once("append_result", target_id, || sink.append_result(result.clone())).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            discard(&ctx, target_id);
            return;
        }
        Err(e) => {
            ctx.stats.record_write_error();
            error!(target_id = %target_id, error = %e, "Dropping check result");
        }
    }

    let store = Arc::clone(&ctx.store);
    match retry_once("update_status", target_id, || {
        store.update_status(target_id, status, observed_at)
    })
    .await
    {
        Ok(()) => {}
        Err(e) if e.is_not_found() => discard(&ctx, target_id),
        Err(e) => {
            ctx.stats.record_write_error();
            error!(target_id = %target_id, error = %e, "Dropping status update");
        }
    }
}

fn discard(ctx: &JobContext, target_id: TargetId) {
    ctx.stats.record_discard(target_id);
    debug!(target_id = %target_id, "Target removed during probe, discarding result");
}

fn to_result(
    target_id: TargetId,
    observed_at: chrono::DateTime<Utc>,
    report: ProbeReport,
) -> CheckResult {
    CheckResult {
        id: Uuid::new_v4(),
        target_id,
        observed_at,
        outcome: report.outcome,
        latency_ms: report.latency.map(|l| l.as_secs_f64() * 1000.0),
        status_code: report.status_code,
        detail: report.detail,
    }
}

/// One retry for transient store failures. `NotFound` is final.
async fn retry_once<F, Fut>(op: &'static str, target_id: TargetId, mut write: F) -> Result<(), StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    match write().await {
        Err(e) if !e.is_not_found() => {
            warn!(op, target_id = %target_id, error = %e, "Store write failed, retrying once");
            write().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::DateTime;

    use super::*;
    use crate::model::{CheckOutcome, NewTarget, TargetStatus};
    use crate::prober::ProbeError;
    use crate::store::{MemoryStore, Repository};

    struct FixedProber(ProbeReport);

    #[async_trait]
    impl Prober for FixedProber {
        async fn probe(&self, _url: &str) -> ProbeReport {
            self.0.clone()
        }
    }

    /// Fails the first `failures` appends, then delegates.
    struct FlakySink {
        inner: Arc<MemoryStore>,
        failures: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ResultSink for FlakySink {
        async fn append_result(&self, result: CheckResult) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("disk full".into()));
            }
            self.inner.append_result(result).await
        }
    }

    fn context(store: Arc<MemoryStore>, sink: Arc<dyn ResultSink>, report: ProbeReport) -> JobContext {
        JobContext {
            prober: Arc::new(FixedProber(report)),
            store,
            sink,
            stats: Arc::new(ProbeStats::new()),
        }
    }

    async fn registered(store: &MemoryStore) -> TargetId {
        store
            .create_target(NewTarget::new("http://ok.test/", 5).with_name("ok"))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn success_writes_result_then_status() {
        let store = Arc::new(MemoryStore::new(10));
        let id = registered(&store).await;
        let ctx = context(
            Arc::clone(&store),
            store.clone(),
            ProbeReport::success(Duration::from_millis(12), 200),
        );

        run_probe(ctx, id, "http://ok.test/".into()).await;

        let results = store.list_results(Some(id), 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, CheckOutcome::Success);
        assert_eq!(results[0].latency_ms, Some(12.0));
        let target = store.get_target(id).await.unwrap();
        assert_eq!(target.current_status, TargetStatus::Up);
        assert_eq!(target.last_checked_at, Some(results[0].observed_at));
    }

    #[tokio::test]
    async fn timeout_marks_target_down_without_latency() {
        let store = Arc::new(MemoryStore::new(10));
        let id = registered(&store).await;
        let report = ProbeReport::from_error(&ProbeError::Timeout {
            url: "http://ok.test/".into(),
            timeout_ms: 100,
        });
        run_probe(context(Arc::clone(&store), store.clone(), report), id, "http://ok.test/".into()).await;

        let results = store.list_results(Some(id), 10).await.unwrap();
        assert_eq!(results[0].outcome, CheckOutcome::Timeout);
        assert!(results[0].latency_ms.is_none());
        assert_eq!(store.get_target(id).await.unwrap().current_status, TargetStatus::Down);
    }

    #[tokio::test]
    async fn deleted_target_gets_no_writes() {
        let store = Arc::new(MemoryStore::new(10));
        let id = registered(&store).await;
        store.delete_target(id).await.unwrap();
        let ctx = context(
            Arc::clone(&store),
            store.clone(),
            ProbeReport::success(Duration::from_millis(1), 200),
        );
        let stats = Arc::clone(&ctx.stats);

        run_probe(ctx, id, "http://ok.test/".into()).await;

        assert!(store.list_results(None, 10).await.unwrap().is_empty());
        assert_eq!(stats.discarded(), 1);
    }

    #[tokio::test]
    async fn transient_append_failure_is_retried_once() {
        let store = Arc::new(MemoryStore::new(10));
        let id = registered(&store).await;
        let sink = Arc::new(FlakySink {
            inner: Arc::clone(&store),
            failures: AtomicUsize::new(1),
            calls: AtomicUsize::new(0),
        });
        let ctx = context(
            Arc::clone(&store),
            sink.clone(),
            ProbeReport::success(Duration::from_millis(1), 200),
        );

        run_probe(ctx, id, "http://ok.test/".into()).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.list_results(Some(id), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persistent_append_failure_still_updates_status() {
        let store = Arc::new(MemoryStore::new(10));
        let id = registered(&store).await;
        let sink = Arc::new(FlakySink {
            inner: Arc::clone(&store),
            failures: AtomicUsize::new(5),
            calls: AtomicUsize::new(0),
        });
        let ctx = context(
            Arc::clone(&store),
            sink.clone(),
            ProbeReport::success(Duration::from_millis(1), 200),
        );
        let stats = Arc::clone(&ctx.stats);

        run_probe(ctx, id, "http://ok.test/".into()).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.write_errors(), 1);
        assert!(store.list_results(Some(id), 10).await.unwrap().is_empty());
        let target = store.get_target(id).await.unwrap();
        assert_eq!(target.current_status, TargetStatus::Up);
        assert!(target.last_checked_at.is_some_and(|t: DateTime<Utc>| t <= Utc::now()));
    }
}
