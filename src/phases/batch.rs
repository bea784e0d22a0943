//! Batch execution: a bounded pool of workers, each holding the store lock
//! on a distinct property while the phase driver runs it.

use std::collections::BTreeMap;
use std::process;
use std::sync::Arc;

use indicatif::ProgressBar;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::model::{PhaseId, Property};
use crate::phases::runner::{PhaseRunner, PropertyOutcome};
use crate::phases::RunMode;
use crate::store::WorkItemStore;

/// Stable-enough identity for lock ownership: pid plus host.
pub fn default_owner() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string());
    format!("casita-{}@{host}", process::id())
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BatchSummary {
    pub attempted: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped_locked: u32,
    pub cancelled: u32,
    pub tiers: BTreeMap<String, u32>,
}

impl BatchSummary {
    fn absorb(&mut self, outcome: &PropertyOutcome) {
        if outcome.cancelled {
            self.cancelled += 1;
        } else if outcome.aborted_at.is_some() {
            self.failed += 1;
        } else {
            self.completed += 1;
        }
        if let Some(tier) = outcome.tier {
            *self.tiers.entry(tier.as_str().to_string()).or_default() += 1;
        }
    }
}

enum TaskResult {
    Done(PropertyOutcome),
    SkippedLocked(String),
}

pub struct BatchRunner {
    runner: Arc<PhaseRunner>,
    work_items: Arc<WorkItemStore>,
    concurrency: usize,
    owner: String,
}

impl BatchRunner {
    pub fn new(
        runner: Arc<PhaseRunner>,
        work_items: Arc<WorkItemStore>,
        concurrency: usize,
        owner: String,
    ) -> Self {
        BatchRunner {
            runner,
            work_items,
            concurrency: concurrency.max(1),
            owner,
        }
    }

    /// Runs the batch. Per-property failures are absorbed into the
    /// summary; corrupt state aborts everything immediately.
    pub async fn run(
        &self,
        properties: Vec<Property>,
        mode: RunMode,
        skip: Vec<PhaseId>,
        progress: Option<ProgressBar>,
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary {
            attempted: properties.len() as u32,
            ..Default::default()
        };
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let skip = Arc::new(skip);
        let mut tasks = JoinSet::new();

        for property in properties {
            let semaphore = Arc::clone(&semaphore);
            let runner = Arc::clone(&self.runner);
            let work_items = Arc::clone(&self.work_items);
            let skip = Arc::clone(&skip);
            let owner = self.owner.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| PipelineError::InvalidArgument("worker pool closed".into()))?;
                let address = property.full_address.clone();
                if !work_items.acquire(&address, &owner)? {
                    return Ok(TaskResult::SkippedLocked(address));
                }
                let result = runner.run_property(&property, &owner, mode, &skip).await;
                if let Err(err) = work_items.release(&address, &owner) {
                    warn!(address = %address, %err, "lock release failed");
                }
                result.map(TaskResult::Done)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let task_result = match joined {
                Ok(result) => result,
                Err(err) => {
                    error!(%err, "worker panicked");
                    summary.failed += 1;
                    continue;
                }
            };
            match task_result {
                Ok(TaskResult::Done(outcome)) => {
                    if let Some(bar) = &progress {
                        bar.inc(1);
                    }
                    summary.absorb(&outcome);
                }
                Ok(TaskResult::SkippedLocked(address)) => {
                    info!(address = %address, "locked by another worker, skipped");
                    summary.skipped_locked += 1;
                }
                Err(err @ PipelineError::CorruptState(_)) => {
                    tasks.abort_all();
                    return Err(err);
                }
                Err(err) => {
                    warn!(%err, "property run failed");
                    summary.failed += 1;
                }
            }
        }
        if let Some(bar) = &progress {
            bar.finish_and_clear();
        }
        info!(
            attempted = summary.attempted,
            completed = summary.completed,
            failed = summary.failed,
            skipped_locked = summary.skipped_locked,
            cancelled = summary.cancelled,
            "batch finished"
        );
        Ok(summary)
    }
}
