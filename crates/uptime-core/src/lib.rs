#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod model;
pub mod pool;
pub mod prober;
pub mod scheduler;
pub mod store;

pub use config::SchedulerConfig;
pub use error::{ConfigError, PoolError, SchedulerError, StoreError, ValidationError};
pub use model::{
    CheckOutcome, CheckResult, MonitoredTarget, NewTarget, TargetId, TargetPatch, TargetStatus,
};
pub use pool::DispatchPool;
pub use prober::{HttpProber, ProbeError, ProbeReport, Prober};
pub use scheduler::{
    ProbeStats, ReconcileSummary, Scheduler, SchedulerHandle, SchedulerState, ScheduleView,
    TargetCounters,
};
pub use store::{MemoryStore, Repository, ResultSink, TargetStore};
