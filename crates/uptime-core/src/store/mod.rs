mod memory;
mod ring;

pub use memory::MemoryStore;
pub use ring::ResultRing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{CheckResult, MonitoredTarget, NewTarget, TargetId, TargetPatch, TargetStatus};

/// Durable record of monitored targets, as seen by the scheduler.
///
/// Implementations must reflect deletes immediately: once `delete_target`
/// has returned, `get_target` and `update_status` report `NotFound`.
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn list_targets(&self) -> Result<Vec<MonitoredTarget>, StoreError>;

    async fn get_target(&self, id: TargetId) -> Result<MonitoredTarget, StoreError>;

    async fn update_status(
        &self,
        id: TargetId,
        status: TargetStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Append-only log of check outcomes.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn append_result(&self, result: CheckResult) -> Result<(), StoreError>;
}

/// Management operations on top of the scheduler-facing traits.
#[async_trait]
pub trait Repository: TargetStore + ResultSink {
    async fn create_target(&self, new: NewTarget) -> Result<MonitoredTarget, StoreError>;

    async fn update_target(
        &self,
        id: TargetId,
        patch: TargetPatch,
    ) -> Result<MonitoredTarget, StoreError>;

    async fn delete_target(&self, id: TargetId) -> Result<MonitoredTarget, StoreError>;

    /// Results newest first, optionally restricted to one target.
    async fn list_results(
        &self,
        target: Option<TargetId>,
        limit: usize,
    ) -> Result<Vec<CheckResult>, StoreError>;
}
