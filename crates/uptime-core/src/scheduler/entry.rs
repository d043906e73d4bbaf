use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::model::TargetId;

/// In-memory timer for one target. Never persisted.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub target_id: TargetId,
    /// URL probed by the next dispatch; refreshed on every upsert.
    pub url: String,
    pub next_fire_at: Instant,
    /// Interval the entry was last armed with. A differing interval on
    /// upsert or reconcile means the entry must be re-armed.
    pub interval_at_arm_time: Duration,
    pub dispatched: u64,
}

impl ScheduleEntry {
    pub fn new(target_id: TargetId, url: impl Into<String>, next_fire_at: Instant, interval: Duration) -> Self {
        Self {
            target_id,
            url: url.into(),
            next_fire_at,
            interval_at_arm_time: interval,
            dispatched: 0,
        }
    }
}

/// Read-only view of a schedule entry.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleView {
    pub target_id: TargetId,
    pub url: String,
    pub interval_secs: f64,
    pub due_in_ms: u64,
    pub dispatched: u64,
}

/// Entries keyed by target plus an index ordered by fire time.
///
/// Every entry has exactly one index slot while armed; `pop_due` takes the
/// slot out and the caller must `reschedule` to put it back.
#[derive(Debug, Default)]
pub struct ScheduleTable {
    entries: HashMap<TargetId, ScheduleEntry>,
    index: BTreeSet<(Instant, TargetId)>,
}

impl ScheduleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: TargetId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: TargetId) -> Option<&ScheduleEntry> {
        self.entries.get(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.entries.keys().copied()
    }

    /// Inserts or replaces the entry for its target.
    pub fn arm(&mut self, entry: ScheduleEntry) {
        if let Some(old) = self.entries.remove(&entry.target_id) {
            self.index.remove(&(old.next_fire_at, old.target_id));
        }
        self.index.insert((entry.next_fire_at, entry.target_id));
        self.entries.insert(entry.target_id, entry);
    }

    pub fn disarm(&mut self, id: TargetId) -> Option<ScheduleEntry> {
        let entry = self.entries.remove(&id)?;
        self.index.remove(&(entry.next_fire_at, id));
        Some(entry)
    }

    /// Moves the entry to a new fire time. Returns false for unknown targets.
    pub fn reschedule(&mut self, id: TargetId, at: Instant) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        self.index.remove(&(entry.next_fire_at, id));
        entry.next_fire_at = at;
        self.index.insert((at, id));
        true
    }

    pub fn set_interval(&mut self, id: TargetId, interval: Duration) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.interval_at_arm_time = interval;
        }
    }

    pub fn set_url(&mut self, id: TargetId, url: &str) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.url != url => {
                entry.url = url.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn mark_dispatched(&mut self, id: TargetId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.dispatched += 1;
        }
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.index.first().map(|(at, _)| *at)
    }

    /// Takes the earliest entry due at or before `now` out of the index.
    pub fn pop_due(&mut self, now: Instant) -> Option<TargetId> {
        let (at, _) = self.index.first()?;
        if *at > now {
            return None;
        }
        self.index.pop_first().map(|(_, id)| id)
    }

    pub fn views(&self, now: Instant) -> Vec<ScheduleView> {
        let mut views: Vec<_> = self
            .entries
            .values()
            .map(|e| ScheduleView {
                target_id: e.target_id,
                url: e.url.clone(),
                interval_secs: e.interval_at_arm_time.as_secs_f64(),
                due_in_ms: e.next_fire_at.saturating_duration_since(now).as_millis() as u64,
                dispatched: e.dispatched,
            })
            .collect();
        views.sort_by_key(|v| v.due_in_ms);
        views
    }
}
