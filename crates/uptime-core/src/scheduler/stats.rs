use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use crate::model::{CheckOutcome, TargetId};
use crate::prober::ProbeReport;

/// Per-target probe counters since the target was armed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TargetCounters {
    pub dispatched: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    /// Results thrown away because the target was deleted mid-probe.
    pub discarded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<CheckOutcome>,
}

/// Counters written concurrently by pool workers and read by the metrics endpoint.
#[derive(Debug, Default)]
pub struct ProbeStats {
    targets: DashMap<TargetId, TargetCounters>,
    write_errors: AtomicU64,
    discarded: AtomicU64,
}

impl ProbeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn track(&self, id: TargetId) {
        self.targets.entry(id).or_default();
    }

    pub(crate) fn forget(&self, id: TargetId) {
        self.targets.remove(&id);
    }

    pub(crate) fn record_dispatch(&self, id: TargetId) {
        if let Some(mut c) = self.targets.get_mut(&id) {
            c.dispatched += 1;
        }
    }

    /// Untracked (deleted) targets are ignored.
    pub(crate) fn record_report(&self, id: TargetId, report: &ProbeReport) {
        if let Some(mut c) = self.targets.get_mut(&id) {
            match report.outcome {
                CheckOutcome::Success => c.successes += 1,
                CheckOutcome::Failure => c.failures += 1,
                CheckOutcome::Timeout => c.timeouts += 1,
            }
            c.last_outcome = Some(report.outcome);
            if let Some(latency) = report.latency {
                c.last_latency_ms = Some(latency.as_secs_f64() * 1000.0);
            }
        }
    }

    pub(crate) fn record_discard(&self, id: TargetId) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        if let Some(mut c) = self.targets.get_mut(&id) {
            c.discarded += 1;
        }
    }

    pub(crate) fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn target(&self, id: TargetId) -> Option<TargetCounters> {
        self.targets.get(&id).map(|c| c.clone())
    }

    pub fn all(&self) -> Vec<(TargetId, TargetCounters)> {
        self.targets
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn counts_outcomes_for_tracked_targets() {
        let stats = ProbeStats::new();
        let id = TargetId::new();
        stats.track(id);
        stats.record_dispatch(id);
        stats.record_report(id, &ProbeReport::success(Duration::from_millis(40), 200));
        stats.record_dispatch(id);
        stats.record_report(
            id,
            &ProbeReport::from_error(&crate::prober::ProbeError::Timeout {
                url: "http://slow.test".into(),
                timeout_ms: 100,
            }),
        );

        let c = stats.target(id).unwrap();
        assert_eq!(c.dispatched, 2);
        assert_eq!(c.successes, 1);
        assert_eq!(c.timeouts, 1);
        assert_eq!(c.last_outcome, Some(CheckOutcome::Timeout));
        assert_eq!(c.last_latency_ms, Some(40.0));
    }

    #[test]
    fn ignores_forgotten_targets() {
        let stats = ProbeStats::new();
        let id = TargetId::new();
        stats.track(id);
        stats.forget(id);
        stats.record_report(id, &ProbeReport::success(Duration::from_millis(1), 200));
        stats.record_discard(id);
        assert!(stats.target(id).is_none());
        assert_eq!(stats.discarded(), 1);
    }
}
