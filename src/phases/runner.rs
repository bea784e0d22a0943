//! Sequential per-property phase driver.
//!
//! Each phase transition is checkpointed through the work-item store:
//! in-progress before the work, complete after it, failed (with a retry
//! increment) on error. Phases are idempotent, so a crashed run resumes at
//! the first phase that is not complete or skipped. P1 listing and map run
//! concurrently; everything else is strictly ordered.

use std::path::PathBuf;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::collab::{CountyRecords, MapService, ReportSink, VisualAssessor};
use crate::config::CostAssumptions;
use crate::error::{PipelineError, Result};
use crate::extract::orchestrator::ExtractionOrchestrator;
use crate::extract::ExtractStatus;
use crate::imaging::manifest::{address_hash, ImageManifest};
use crate::model::{EnrichmentRecord, PhaseId, PhaseStatus, Property, SourceTier, Tier};
use crate::phases::{cost, prerequisite, validator, RunMode};
use crate::score::{evaluate, score, KillSwitchPolicy};
use crate::store::work_items::MAX_RETRIES;
use crate::store::{EnrichmentStore, WorkItemStore};

#[derive(Clone)]
pub struct Collaborators {
    pub county: Arc<dyn CountyRecords>,
    pub map: Arc<dyn MapService>,
    pub visual: Arc<dyn VisualAssessor>,
    pub report: Arc<dyn ReportSink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyOutcome {
    pub address: String,
    pub tier: Option<Tier>,
    pub reached_synthesis: bool,
    /// Phase at which processing stopped early, if any.
    pub aborted_at: Option<PhaseId>,
    pub exhausted: bool,
    pub cancelled: bool,
}

pub struct PhaseRunner {
    work_items: Arc<WorkItemStore>,
    enrichment: Arc<EnrichmentStore>,
    extraction: Arc<ExtractionOrchestrator>,
    collaborators: Collaborators,
    images_root: PathBuf,
    policy: KillSwitchPolicy,
    cost: CostAssumptions,
    cancel: watch::Receiver<bool>,
}

impl PhaseRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        work_items: Arc<WorkItemStore>,
        enrichment: Arc<EnrichmentStore>,
        extraction: Arc<ExtractionOrchestrator>,
        collaborators: Collaborators,
        images_root: PathBuf,
        policy: KillSwitchPolicy,
        cost: CostAssumptions,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        PhaseRunner {
            work_items,
            enrichment,
            extraction,
            collaborators,
            images_root,
            policy,
            cost,
            cancel,
        }
    }

    pub fn work_items(&self) -> &Arc<WorkItemStore> {
        &self.work_items
    }

    pub fn enrichment(&self) -> &Arc<EnrichmentStore> {
        &self.enrichment
    }

    fn images_dir(&self, address: &str) -> PathBuf {
        self.images_root.join(address_hash(address))
    }

    fn image_count(&self, address: &str) -> Result<u32> {
        let manifest = ImageManifest::load_or_new(&self.images_dir(address), address)?;
        Ok(manifest.images.len() as u32)
    }

    fn record_or_empty(&self, address: &str) -> EnrichmentRecord {
        self.enrichment
            .get(address)
            .unwrap_or_else(|| EnrichmentRecord::new(address))
    }

    /// Drives one property through all phases. The caller must hold the
    /// work-item lock as `owner` for the duration.
    pub async fn run_property(
        &self,
        property: &Property,
        owner: &str,
        mode: RunMode,
        skip: &[PhaseId],
    ) -> Result<PropertyOutcome> {
        let address = property.full_address.clone();
        self.work_items.get_or_create(&address)?;
        let mut outcome = PropertyOutcome {
            address: address.clone(),
            tier: None,
            reached_synthesis: false,
            aborted_at: None,
            exhausted: false,
            cancelled: false,
        };

        let mut idx = 0;
        while idx < PhaseId::ORDER.len() {
            let phase = PhaseId::ORDER[idx];
            idx += 1;

            if *self.cancel.borrow() {
                info!(address = %address, "cancelled, stopping at next checkpoint");
                outcome.cancelled = true;
                break;
            }
            let item = self
                .work_items
                .item(&address)
                .ok_or(PipelineError::NotFound("work item"))?;
            if matches!(
                item.status(phase),
                PhaseStatus::Complete | PhaseStatus::Skipped
            ) {
                continue;
            }
            if skip.contains(&phase) {
                self.work_items.checkpoint(
                    &address,
                    owner,
                    phase,
                    PhaseStatus::Skipped,
                    Some("skipped by flag"),
                )?;
                continue;
            }
            if item.retry_count(phase) >= MAX_RETRIES {
                info!(address = %address, phase = phase.as_str(), "retries exhausted, phase permanently skipped");
                self.work_items.checkpoint(
                    &address,
                    owner,
                    phase,
                    PhaseStatus::Skipped,
                    Some("retries exhausted"),
                )?;
                outcome.exhausted = true;
                continue;
            }

            let images = self.image_count(&address)?;
            if let Err(reason) = prerequisite(&item, phase, images) {
                match mode {
                    RunMode::Strict => {
                        warn!(address = %address, phase = phase.as_str(), reason = %reason, "prerequisite failed, aborting (strict)");
                        outcome.aborted_at = Some(phase);
                        break;
                    }
                    RunMode::Lenient => {
                        info!(address = %address, phase = phase.as_str(), reason = %reason, "prerequisite failed, phase skipped");
                        self.work_items.checkpoint(
                            &address,
                            owner,
                            phase,
                            PhaseStatus::Skipped,
                            Some(&reason),
                        )?;
                        continue;
                    }
                }
            }

            if matches!(phase, PhaseId::P2AExterior | PhaseId::P2BInterior) {
                let record = self.record_or_empty(&address);
                if let Err(blocked) =
                    validator::pre_spawn_check(&self.images_dir(&address), images, &record)
                {
                    warn!(address = %address, phase = phase.as_str(), %blocked, "assessment refused");
                    match mode {
                        RunMode::Strict => {
                            outcome.aborted_at = Some(phase);
                            break;
                        }
                        RunMode::Lenient => {
                            self.work_items.checkpoint(
                                &address,
                                owner,
                                phase,
                                PhaseStatus::Skipped,
                                Some(&blocked),
                            )?;
                            continue;
                        }
                    }
                }
            }

            // Listing and map extraction are independent; run them as a
            // concurrent pair when both are due.
            if phase == PhaseId::P1Listing
                && idx < PhaseId::ORDER.len()
                && PhaseId::ORDER[idx] == PhaseId::P1Map
                && item.status(PhaseId::P1Map) == PhaseStatus::Pending
                && !skip.contains(&PhaseId::P1Map)
                && item.retry_count(PhaseId::P1Map) < MAX_RETRIES
                && prerequisite(&item, PhaseId::P1Map, images).is_ok()
            {
                self.work_items.checkpoint(
                    &address,
                    owner,
                    PhaseId::P1Listing,
                    PhaseStatus::InProgress,
                    None,
                )?;
                self.work_items.checkpoint(
                    &address,
                    owner,
                    PhaseId::P1Map,
                    PhaseStatus::InProgress,
                    None,
                )?;
                let (listing, map) = tokio::join!(
                    self.exec_phase(property, PhaseId::P1Listing),
                    self.exec_phase(property, PhaseId::P1Map)
                );
                let abort_listing =
                    self.finish_phase(&address, owner, PhaseId::P1Listing, listing, mode)?;
                let abort_map = self.finish_phase(&address, owner, PhaseId::P1Map, map, mode)?;
                idx += 1; // past P1_map
                if abort_listing || abort_map {
                    outcome.aborted_at = Some(phase);
                    break;
                }
                continue;
            }

            self.work_items
                .checkpoint(&address, owner, phase, PhaseStatus::InProgress, None)?;
            let result = self.exec_phase(property, phase).await;
            if self.finish_phase(&address, owner, phase, result, mode)? {
                outcome.aborted_at = Some(phase);
                break;
            }
        }

        if let Some(item) = self.work_items.item(&address) {
            outcome.reached_synthesis = item.status(PhaseId::P3Synthesis) == PhaseStatus::Complete;
        }
        outcome.tier = self.enrichment.get(&address).and_then(|r| r.tier);
        Ok(outcome)
    }

    /// Records the phase result. Returns true when the property should be
    /// aborted (strict-mode failure). Fatal store errors propagate.
    fn finish_phase(
        &self,
        address: &str,
        owner: &str,
        phase: PhaseId,
        result: Result<String>,
        mode: RunMode,
    ) -> Result<bool> {
        match result {
            Ok(note) => {
                self.work_items.checkpoint(
                    address,
                    owner,
                    phase,
                    PhaseStatus::Complete,
                    Some(&note),
                )?;
                Ok(false)
            }
            Err(PipelineError::CorruptState(message)) => {
                Err(PipelineError::CorruptState(message))
            }
            Err(err) => {
                let retries = self.work_items.record_failure(address, owner, phase)?;
                warn!(
                    address = %address,
                    phase = phase.as_str(),
                    retries,
                    %err,
                    "phase failed"
                );
                Ok(mode == RunMode::Strict)
            }
        }
    }

    async fn exec_phase(&self, property: &Property, phase: PhaseId) -> Result<String> {
        let address = &property.full_address;
        match phase {
            PhaseId::P0County => {
                let fields = self.collaborators.county.lookup(property).await?;
                let stats = self.enrichment.apply_fields(
                    address,
                    "county",
                    SourceTier::County,
                    0.95,
                    &fields,
                )?;
                Ok(format!("county: {} fields applied", stats.applied))
            }
            PhaseId::P05Cost => {
                let record = self.record_or_empty(address);
                match cost::monthly_cost(&record, &self.cost) {
                    Some(monthly) => {
                        let mut fields = std::collections::BTreeMap::new();
                        fields.insert(
                            "monthly_cost".to_string(),
                            serde_json::to_value(monthly)?,
                        );
                        self.enrichment.apply_fields(
                            address,
                            "cost_model",
                            SourceTier::Default,
                            0.5,
                            &fields,
                        )?;
                        Ok(format!("monthly cost ${:.0}", monthly.total))
                    }
                    None => Ok("cost model skipped: no price".to_string()),
                }
            }
            PhaseId::P1Listing => {
                let summary = self.extraction.run(property).await?;
                if summary.status == ExtractStatus::Failed {
                    if summary.sources_ok.is_empty() && !summary.skipped_blocked.is_empty() {
                        return Err(PipelineError::NoSources);
                    }
                    return Err(PipelineError::Http(
                        "no listing source produced data".to_string(),
                    ));
                }
                Ok(format!(
                    "extracted {} images ({} dup), sources ok: {}",
                    summary.manifest.total_downloaded,
                    summary.manifest.duplicates_rejected,
                    summary.sources_ok.join(",")
                ))
            }
            PhaseId::P1Map => {
                let fields = self.collaborators.map.enrich(property).await?;
                let stats = self.enrichment.apply_fields(
                    address,
                    "map",
                    SourceTier::County,
                    0.8,
                    &fields,
                )?;
                Ok(format!("map: {} fields applied", stats.applied))
            }
            PhaseId::P2AExterior => {
                let fields = self
                    .collaborators
                    .visual
                    .assess_exterior(property, &self.images_dir(address))
                    .await?;
                let stats = self.enrichment.apply_fields(
                    address,
                    "visual_exterior",
                    SourceTier::Manual,
                    0.7,
                    &fields,
                )?;
                Ok(format!("exterior: {} fields applied", stats.applied))
            }
            PhaseId::P2BInterior => {
                let fields = self
                    .collaborators
                    .visual
                    .assess_interior(property, &self.images_dir(address))
                    .await?;
                let stats = self.enrichment.apply_fields(
                    address,
                    "visual_interior",
                    SourceTier::Manual,
                    0.7,
                    &fields,
                )?;
                Ok(format!("interior: {} fields applied", stats.applied))
            }
            PhaseId::P3Synthesis => {
                let record = self.record_or_empty(address);
                let current_year = OffsetDateTime::now_utc().year();
                let outcome = evaluate(&record, current_year, &self.policy);
                let breakdown = score(&record, outcome.verdict);
                self.enrichment.update(address, |r| {
                    r.kill_switch_verdict = Some(outcome.verdict);
                    r.kill_switch_severity = Some(outcome.severity);
                    r.kill_switch_failures = outcome.failures.clone();
                    r.score_section_a = Some(breakdown.section_a);
                    r.score_section_b = Some(breakdown.section_b);
                    r.score_section_c = Some(breakdown.section_c);
                    r.total_score = Some(breakdown.total);
                    r.tier = Some(breakdown.tier);
                    r.defaults_used = Some(breakdown.defaults_used);
                    r.data_quality = Some(breakdown.data_quality);
                })?;
                Ok(format!(
                    "verdict {:?}, score {:.0}, tier {}",
                    outcome.verdict,
                    breakdown.total,
                    breakdown.tier.as_str()
                ))
            }
            PhaseId::P4Report => {
                let record = self
                    .enrichment
                    .get(address)
                    .ok_or(PipelineError::NotFound("enrichment record"))?;
                self.collaborators.report.emit(&record).await?;
                Ok("report emitted".to_string())
            }
        }
    }
}
