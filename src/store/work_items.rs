//! Durable per-property work items: phase status, retries, and ownership.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::model::{PhaseId, PhaseStatus, SCHEMA_VERSION};
use crate::store::atomic;

/// Maximum failures of a single phase before the property is permanently
/// skipped.
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub owner: String,
    #[serde(with = "time::serde::rfc3339")]
    pub acquired_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub address: String,
    pub phase_status: BTreeMap<PhaseId, PhaseStatus>,
    #[serde(default)]
    pub retry_counts: BTreeMap<PhaseId, u32>,
    pub lock: Option<LockInfo>,
    pub last_commit: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl WorkItem {
    pub fn new(address: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        WorkItem {
            address: address.into(),
            phase_status: PhaseId::ORDER
                .iter()
                .map(|p| (*p, PhaseStatus::Pending))
                .collect(),
            retry_counts: BTreeMap::new(),
            lock: None,
            last_commit: None,
            started_at: now,
            last_updated: now,
        }
    }

    pub fn status(&self, phase: PhaseId) -> PhaseStatus {
        self.phase_status
            .get(&phase)
            .copied()
            .unwrap_or(PhaseStatus::Pending)
    }

    pub fn retry_count(&self, phase: PhaseId) -> u32 {
        self.retry_counts.get(&phase).copied().unwrap_or(0)
    }

    /// First phase in execution order that is neither complete nor skipped,
    /// i.e. where a resumed run picks up.
    pub fn first_incomplete(&self) -> Option<PhaseId> {
        PhaseId::ORDER.iter().copied().find(|p| {
            !matches!(
                self.status(*p),
                PhaseStatus::Complete | PhaseStatus::Skipped
            )
        })
    }

    /// Whether any phase has exhausted its retries.
    pub fn exhausted(&self) -> bool {
        self.retry_counts.values().any(|c| *c >= MAX_RETRIES)
    }

    fn lock_expired(&self, expiry: Duration, now: OffsetDateTime) -> bool {
        match &self.lock {
            Some(lock) => {
                (now - lock.acquired_at).whole_seconds() >= expiry.as_secs() as i64
            }
            None => false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkItemsDoc {
    schema_version: u32,
    items: BTreeMap<String, WorkItem>,
}

impl Default for WorkItemsDoc {
    fn default() -> Self {
        WorkItemsDoc { schema_version: SCHEMA_VERSION, items: BTreeMap::new() }
    }
}

/// File-backed store of all work items. A single in-process mutex
/// serializes read-modify-write cycles; the atomic rename makes the file
/// itself the authority between processes.
#[derive(Debug)]
pub struct WorkItemStore {
    path: PathBuf,
    lock_expiry: Duration,
    inner: Mutex<WorkItemsDoc>,
}

impl WorkItemStore {
    pub fn open(path: PathBuf, lock_expiry: Duration) -> Result<Self> {
        let mut doc: WorkItemsDoc = atomic::read_document(&path)?.unwrap_or_default();
        if doc.schema_version != SCHEMA_VERSION {
            return Err(PipelineError::CorruptState(format!(
                "{}: schema version {} (expected {}); legacy state must be archived, not mixed",
                path.display(),
                doc.schema_version,
                SCHEMA_VERSION
            )));
        }

        // Stale in-progress items left behind by a crashed worker are reset
        // so the next run can reclaim them.
        let now = OffsetDateTime::now_utc();
        let mut reset = 0usize;
        for item in doc.items.values_mut() {
            if item.lock_expired(lock_expiry, now) {
                item.lock = None;
                for status in item.phase_status.values_mut() {
                    if *status == PhaseStatus::InProgress {
                        *status = PhaseStatus::Pending;
                        reset += 1;
                    }
                }
            }
        }
        if reset > 0 {
            info!(reset, "reset stale in-progress phases on load");
            atomic::write_document(&path, &doc)?;
        }

        Ok(WorkItemStore { path, lock_expiry, inner: Mutex::new(doc) })
    }

    fn persist(&self, doc: &WorkItemsDoc) -> Result<()> {
        atomic::write_document(&self.path, doc)
    }

    pub fn get_or_create(&self, address: &str) -> Result<WorkItem> {
        let mut doc = self.inner.lock();
        if !doc.items.contains_key(address) {
            doc.items.insert(address.to_string(), WorkItem::new(address));
            self.persist(&doc)?;
        }
        Ok(doc.items[address].clone())
    }

    pub fn item(&self, address: &str) -> Option<WorkItem> {
        self.inner.lock().items.get(address).cloned()
    }

    pub fn items(&self) -> Vec<WorkItem> {
        self.inner.lock().items.values().cloned().collect()
    }

    /// Attempts to take the per-property lock. Succeeds when no lock
    /// exists, the caller already owns it, or the previous lock expired.
    pub fn acquire(&self, address: &str, owner: &str) -> Result<bool> {
        let mut doc = self.inner.lock();
        let now = OffsetDateTime::now_utc();
        let item = doc
            .items
            .entry(address.to_string())
            .or_insert_with(|| WorkItem::new(address));
        let can_take = match &item.lock {
            None => true,
            Some(lock) => lock.owner == owner || item.lock_expired(self.lock_expiry, now),
        };
        if !can_take {
            debug!(address, owner, held_by = %item.lock.as_ref().map(|l| l.owner.as_str()).unwrap_or(""), "lock busy");
            return Ok(false);
        }
        item.lock = Some(LockInfo { owner: owner.to_string(), acquired_at: now });
        item.last_updated = now;
        self.persist(&doc)?;
        Ok(true)
    }

    pub fn release(&self, address: &str, owner: &str) -> Result<()> {
        let mut doc = self.inner.lock();
        if let Some(item) = doc.items.get_mut(address) {
            match &item.lock {
                Some(lock) if lock.owner == owner => {
                    item.lock = None;
                    item.last_updated = OffsetDateTime::now_utc();
                    self.persist(&doc)?;
                }
                Some(lock) => {
                    warn!(address, owner, held_by = %lock.owner, "release by non-owner ignored");
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Writes a phase checkpoint. Only the lock owner may write, and a
    /// complete or skipped phase never reverts.
    pub fn checkpoint(
        &self,
        address: &str,
        owner: &str,
        phase: PhaseId,
        status: PhaseStatus,
        note: Option<&str>,
    ) -> Result<()> {
        let mut doc = self.inner.lock();
        let item = doc
            .items
            .get_mut(address)
            .ok_or(PipelineError::NotFound("work item"))?;
        match &item.lock {
            Some(lock) if lock.owner == owner => {}
            Some(lock) => {
                return Err(PipelineError::LockHeld {
                    address: address.to_string(),
                    owner: lock.owner.clone(),
                })
            }
            None => {
                return Err(PipelineError::InvalidArgument(format!(
                    "checkpoint on unlocked item {address}"
                )))
            }
        }
        let current = item.status(phase);
        if matches!(current, PhaseStatus::Complete | PhaseStatus::Skipped)
            && status != current
        {
            warn!(address, phase = phase.as_str(), ?status, "checkpoint would revert terminal status; ignored");
            return Ok(());
        }
        item.phase_status.insert(phase, status);
        if let Some(note) = note {
            item.last_commit = Some(note.to_string());
        }
        item.last_updated = OffsetDateTime::now_utc();
        self.persist(&doc)?;
        Ok(())
    }

    /// Marks a phase failed and returns the new retry count.
    pub fn record_failure(&self, address: &str, owner: &str, phase: PhaseId) -> Result<u32> {
        let count = {
            let mut doc = self.inner.lock();
            let item = doc
                .items
                .get_mut(address)
                .ok_or(PipelineError::NotFound("work item"))?;
            match &item.lock {
                Some(lock) if lock.owner == owner => {}
                _ => {
                    return Err(PipelineError::InvalidArgument(format!(
                        "failure recorded without lock on {address}"
                    )))
                }
            }
            let count = item.retry_counts.entry(phase).or_insert(0);
            *count += 1;
            let count = *count;
            item.phase_status.insert(phase, PhaseStatus::Failed);
            item.last_updated = OffsetDateTime::now_utc();
            self.persist(&doc)?;
            count
        };
        Ok(count)
    }
}
