use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use super::{Repository, ResultRing, ResultSink, TargetStore};
use crate::error::StoreError;
use crate::model::{CheckResult, MonitoredTarget, NewTarget, TargetId, TargetPatch, TargetStatus};

#[derive(Debug, Default)]
struct Inner {
    targets: HashMap<TargetId, MonitoredTarget>,
    results: HashMap<TargetId, ResultRing>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Persisted {
    targets: Vec<MonitoredTarget>,
    #[serde(default)]
    results: Vec<CheckResult>,
}

/// In-process target store and result log, optionally mirrored to a JSON file.
///
/// All state lives behind one lock, so "does the target still exist" and the
/// write that depends on it happen atomically. With a backing file, every
/// mutation rewrites the file (temp file + rename); the in-memory copy stays
/// authoritative for the running process if that write fails.
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    history_limit: usize,
    path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            history_limit,
            path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Opens a file-backed store, loading existing state if the file is present.
    pub async fn open(path: impl AsRef<Path>, history_limit: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut inner = Inner::default();

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let persisted: Persisted = serde_json::from_slice(&bytes).map_err(|e| {
                    StoreError::Unavailable(format!("Failed to parse {}: {}", path.display(), e))
                })?;
                for target in persisted.targets {
                    inner.results.insert(target.id, ResultRing::new(history_limit));
                    inner.targets.insert(target.id, target);
                }
                let mut orphaned = 0usize;
                for result in persisted.results {
                    match inner.results.get_mut(&result.target_id) {
                        Some(ring) => ring.push(result),
                        None => orphaned += 1,
                    }
                }
                info!(
                    path = %path.display(),
                    targets = inner.targets.len(),
                    orphaned,
                    "Loaded target store"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No existing store file, starting empty");
            }
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        }

        Ok(Self {
            inner: RwLock::new(inner),
            history_limit,
            path: Some(path),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn target_count(&self) -> usize {
        self.inner.read().await.targets.len()
    }

    async fn persist(&self) {
        let Some(ref path) = self.path else {
            return;
        };
        let _guard = self.persist_lock.lock().await;

        let bytes = {
            let inner = self.inner.read().await;
            let mut targets: Vec<MonitoredTarget> = inner.targets.values().cloned().collect();
            targets.sort_by_key(|t| t.created_at);
            let results = inner
                .results
                .values()
                .flat_map(|ring| ring.list_chronological())
                .collect();
            match serde_json::to_vec_pretty(&Persisted { targets, results }) {
                Ok(b) => b,
                Err(e) => {
                    error!(error = %e, "Failed to serialize target store");
                    return;
                }
            }
        };

        let tmp = path.with_extension("tmp");
        let written = async {
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, path).await
        }
        .await;
        if let Err(e) = written {
            error!(path = %path.display(), error = %e, "Failed to persist target store");
        } else {
            debug!(path = %path.display(), bytes = bytes.len(), "Persisted target store");
        }
    }
}

fn url_taken(inner: &Inner, url: &str, except: Option<TargetId>) -> bool {
    inner
        .targets
        .values()
        .any(|t| t.url == url && Some(t.id) != except)
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn list_targets(&self) -> Result<Vec<MonitoredTarget>, StoreError> {
        let inner = self.inner.read().await;
        let mut targets: Vec<_> = inner.targets.values().cloned().collect();
        targets.sort_by_key(|t| t.created_at);
        Ok(targets)
    }

    async fn get_target(&self, id: TargetId) -> Result<MonitoredTarget, StoreError> {
        self.inner
            .read()
            .await
            .targets
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_status(
        &self,
        id: TargetId,
        status: TargetStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.write().await;
            let target = inner.targets.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            // Overlapping probes may finish out of order. Status and timestamp
            // always come from the same, newest observation.
            if target.last_checked_at.is_none_or(|prev| prev <= checked_at) {
                target.current_status = status;
                target.last_checked_at = Some(checked_at);
            }
        }
        self.persist().await;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for MemoryStore {
    async fn append_result(&self, result: CheckResult) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.write().await;
            if !inner.targets.contains_key(&result.target_id) {
                return Err(StoreError::NotFound(result.target_id));
            }
            let limit = self.history_limit;
            inner
                .results
                .entry(result.target_id)
                .or_insert_with(|| ResultRing::new(limit))
                .push(result);
        }
        self.persist().await;
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn create_target(&self, new: NewTarget) -> Result<MonitoredTarget, StoreError> {
        let target = {
            let mut inner = self.inner.write().await;
            if url_taken(&inner, &new.url, None) {
                return Err(StoreError::Conflict(format!(
                    "{} is already being monitored",
                    new.url
                )));
            }
            let target = new.into_target();
            inner.targets.insert(target.id, target.clone());
            inner
                .results
                .insert(target.id, ResultRing::new(self.history_limit));
            target
        };
        self.persist().await;
        Ok(target)
    }

    async fn update_target(
        &self,
        id: TargetId,
        patch: TargetPatch,
    ) -> Result<MonitoredTarget, StoreError> {
        let updated = {
            let mut inner = self.inner.write().await;
            if let Some(ref url) = patch.url {
                if url_taken(&inner, url, Some(id)) {
                    return Err(StoreError::Conflict(format!(
                        "{} is already being monitored",
                        url
                    )));
                }
            }
            let target = inner.targets.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            patch.apply(target);
            target.clone()
        };
        self.persist().await;
        Ok(updated)
    }

    async fn delete_target(&self, id: TargetId) -> Result<MonitoredTarget, StoreError> {
        let removed = {
            let mut inner = self.inner.write().await;
            let removed = inner.targets.remove(&id).ok_or(StoreError::NotFound(id))?;
            inner.results.remove(&id);
            removed
        };
        self.persist().await;
        Ok(removed)
    }

    async fn list_results(
        &self,
        target: Option<TargetId>,
        limit: usize,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let inner = self.inner.read().await;
        match target {
            Some(id) => {
                if !inner.targets.contains_key(&id) {
                    return Err(StoreError::NotFound(id));
                }
                Ok(inner
                    .results
                    .get(&id)
                    .map(|ring| ring.list().take(limit).cloned().collect())
                    .unwrap_or_default())
            }
            None => {
                let mut all: Vec<CheckResult> = inner
                    .results
                    .values()
                    .flat_map(|ring| ring.list().cloned())
                    .collect();
                all.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
                all.truncate(limit);
                Ok(all)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::model::CheckOutcome;

    fn result_for(target_id: TargetId, outcome: CheckOutcome) -> CheckResult {
        CheckResult {
            id: Uuid::new_v4(),
            target_id,
            observed_at: Utc::now(),
            outcome,
            latency_ms: None,
            status_code: None,
            detail: None,
        }
    }

    #[tokio::test]
    async fn create_and_list_targets() {
        let store = MemoryStore::new(10);
        let a = store
            .create_target(NewTarget::new("http://a.test", 5))
            .await
            .unwrap();
        let b = store
            .create_target(NewTarget::new("http://b.test", 10))
            .await
            .unwrap();
        let listed = store.list_targets().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|t| t.id == a.id));
        assert!(listed.iter().any(|t| t.id == b.id));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_url() {
        let store = MemoryStore::new(10);
        store
            .create_target(NewTarget::new("http://a.test", 5))
            .await
            .unwrap();
        let err = store
            .create_target(NewTarget::new("http://a.test", 7))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_is_visible_immediately() {
        let store = MemoryStore::new(10);
        let t = store
            .create_target(NewTarget::new("http://a.test", 5))
            .await
            .unwrap();
        store.delete_target(t.id).await.unwrap();

        assert!(store.get_target(t.id).await.unwrap_err().is_not_found());
        let err = store
            .update_status(t.id, TargetStatus::Up, Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        let err = store
            .append_result(result_for(t.id, CheckOutcome::Success))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn results_are_newest_first_and_capped() {
        let store = MemoryStore::new(3);
        let t = store
            .create_target(NewTarget::new("http://a.test", 5))
            .await
            .unwrap();
        for _ in 0..5 {
            store
                .append_result(result_for(t.id, CheckOutcome::Failure))
                .await
                .unwrap();
        }
        store
            .append_result(result_for(t.id, CheckOutcome::Success))
            .await
            .unwrap();

        let results = store.list_results(Some(t.id), 10).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].outcome, CheckOutcome::Success);

        let limited = store.list_results(None, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn older_observation_never_overwrites_newer_status() {
        let store = MemoryStore::new(3);
        let t = store
            .create_target(NewTarget::new("http://a.test", 5))
            .await
            .unwrap();
        let later = Utc::now();
        let earlier = later - chrono::Duration::seconds(5);
        store.update_status(t.id, TargetStatus::Up, later).await.unwrap();
        store.update_status(t.id, TargetStatus::Down, earlier).await.unwrap();

        let t = store.get_target(t.id).await.unwrap();
        assert_eq!(t.last_checked_at, Some(later));
        assert_eq!(t.current_status, TargetStatus::Up);

        let t2 = store.get_target(t.id).await.unwrap();
        let newest = later + chrono::Duration::seconds(1);
        store.update_status(t2.id, TargetStatus::Down, newest).await.unwrap();
        let t2 = store.get_target(t2.id).await.unwrap();
        assert_eq!(t2.last_checked_at, Some(newest));
        assert_eq!(t2.current_status, TargetStatus::Down);
    }

    #[tokio::test]
    async fn update_rejects_url_of_other_target() {
        let store = MemoryStore::new(3);
        store
            .create_target(NewTarget::new("http://a.test", 5))
            .await
            .unwrap();
        let b = store
            .create_target(NewTarget::new("http://b.test", 5))
            .await
            .unwrap();
        let patch = TargetPatch {
            url: Some("http://a.test".into()),
            ..Default::default()
        };
        let err = store.update_target(b.id, patch).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let path = std::env::temp_dir().join(format!("uptime-store-{}.json", Uuid::new_v4()));

        let id = {
            let store = MemoryStore::open(&path, 10).await.unwrap();
            let t = store
                .create_target(NewTarget::new("http://a.test", 5).with_name("a"))
                .await
                .unwrap();
            store
                .append_result(result_for(t.id, CheckOutcome::Timeout))
                .await
                .unwrap();
            store
                .update_status(t.id, TargetStatus::Down, Utc::now())
                .await
                .unwrap();
            t.id
        };

        let reopened = MemoryStore::open(&path, 10).await.unwrap();
        let t = reopened.get_target(id).await.unwrap();
        assert_eq!(t.name, "a");
        assert_eq!(t.current_status, TargetStatus::Down);
        assert!(t.last_checked_at.is_some());
        let results = reopened.list_results(Some(id), 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, CheckOutcome::Timeout);

        let _ = std::fs::remove_file(&path);
    }
}
