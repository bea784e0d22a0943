//! Facade wiring the stores, extraction stack, collaborators, and the
//! phase driver into one openable pipeline.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::info;

use crate::cli::import_export;
use crate::collab::{JsonReportSink, Unconfigured};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::extract::assessor::AssessorApi;
use crate::extract::circuit::CircuitBreaker;
use crate::extract::client::StealthClient;
use crate::extract::orchestrator::ExtractionOrchestrator;
use crate::extract::rate::RateLimiter;
use crate::extract::records::RecordsExtractor;
use crate::extract::redfin::RedfinExtractor;
use crate::extract::zillow::ZillowExtractor;
use crate::extract::SourceExtractor;
use crate::imaging::lsh::{HashIndex, PersistedIndex};
use crate::imaging::manifest::ImageManifest;
use crate::model::{EnrichmentRecord, PhaseId, Property};
use crate::phases::batch::{default_owner, BatchRunner, BatchSummary};
use crate::phases::runner::{Collaborators, PhaseRunner};
use crate::phases::validator::{self, ValidationReport};
use crate::phases::RunMode;
use crate::score::KillSwitchPolicy;
use crate::store::{atomic, EnrichmentStore, FolderLookup, WorkItemStore};

pub struct Pipeline {
    config: PipelineConfig,
    work_items: Arc<WorkItemStore>,
    enrichment: Arc<EnrichmentStore>,
    folders: Arc<FolderLookup>,
    batch: BatchRunner,
    cancel_tx: watch::Sender<bool>,
    started_at: OffsetDateTime,
}

impl Pipeline {
    /// Opens the pipeline with the default collaborator wiring: the
    /// assessor API as county records, a JSON report sink, and everything
    /// else unconfigured (their phases skip in lenient mode).
    pub fn open(config: PipelineConfig) -> Result<Self> {
        let client = Arc::new(StealthClient::new(&config)?);
        let county = Arc::new(AssessorApi::new(
            Arc::clone(&client),
            RateLimiter::new(config.rate_budget(crate::extract::assessor::SOURCE)),
            config.assessor_token.clone(),
        ));
        let collaborators = Collaborators {
            county,
            map: Arc::new(Unconfigured("map service")),
            visual: Arc::new(Unconfigured("visual assessor")),
            report: Arc::new(JsonReportSink::new(config.reports_dir.clone())),
        };
        Self::open_with(config, collaborators)
    }

    /// Opens the pipeline with explicit collaborators (tests use mocks).
    pub fn open_with(config: PipelineConfig, collaborators: Collaborators) -> Result<Self> {
        let index = match atomic::read_document::<PersistedIndex>(&config.hash_index_path())? {
            Some(doc) => HashIndex::from_document(doc)?,
            None => HashIndex::new(config.lsh_bands, config.hamming_threshold),
        };
        let index = Arc::new(Mutex::new(index));

        let client = Arc::new(StealthClient::new(&config)?);
        let sources: Vec<Arc<dyn SourceExtractor>> = vec![
            Arc::new(ZillowExtractor::new(
                Arc::clone(&client),
                RateLimiter::new(config.rate_budget(crate::extract::zillow::SOURCE)),
            )),
            Arc::new(RedfinExtractor::new(
                Arc::clone(&client),
                RateLimiter::new(config.rate_budget(crate::extract::redfin::SOURCE)),
            )),
            Arc::new(RecordsExtractor::new(
                Arc::clone(&client),
                RateLimiter::new(config.rate_budget(crate::extract::records::SOURCE)),
            )),
            Arc::new(AssessorApi::new(
                Arc::clone(&client),
                RateLimiter::new(config.rate_budget(crate::extract::assessor::SOURCE)),
                config.assessor_token.clone(),
            )),
        ];
        Self::assemble(config, collaborators, sources, index)
    }

    /// Final assembly step; tests inject mock sources here.
    pub fn assemble(
        config: PipelineConfig,
        collaborators: Collaborators,
        sources: Vec<Arc<dyn SourceExtractor>>,
        index: Arc<Mutex<HashIndex>>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        fs::create_dir_all(&config.images_dir)?;
        fs::create_dir_all(&config.reports_dir)?;

        let work_items = Arc::new(WorkItemStore::open(
            config.work_items_path(),
            config.lock_expiry,
        )?);
        let enrichment = Arc::new(EnrichmentStore::open(
            config.enrichment_path(),
            config.conflicts_path(),
        )?);
        let folders = Arc::new(FolderLookup::open(config.folders_path())?);

        let circuit = Arc::new(CircuitBreaker::new(
            config.circuit_failure_threshold,
            config.circuit_cooldown,
            config.session_idle_reset,
        ));
        let extraction = Arc::new(ExtractionOrchestrator::new(
            sources,
            circuit,
            index,
            config.hash_index_path(),
            Arc::clone(&enrichment),
            Arc::clone(&folders),
            config.images_dir.clone(),
            config.max_image_dim,
        ));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let runner = Arc::new(PhaseRunner::new(
            Arc::clone(&work_items),
            Arc::clone(&enrichment),
            extraction,
            collaborators,
            config.images_dir.clone(),
            KillSwitchPolicy {
                hoa_unknown_passes: config.hoa_unknown_passes,
            },
            config.cost,
            cancel_rx,
        ));
        let batch = BatchRunner::new(
            runner,
            Arc::clone(&work_items),
            config.concurrency,
            default_owner(),
        );

        Ok(Pipeline {
            config,
            work_items,
            enrichment,
            folders,
            batch,
            cancel_tx,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    /// Removes checkpoint state so the next run starts fresh. Enrichment
    /// and images are kept; only phase progress is cleared.
    pub fn clear_checkpoints(config: &PipelineConfig) -> Result<()> {
        for path in [
            config.work_items_path(),
            atomic::with_suffix(&config.work_items_path(), ".bak"),
        ] {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        info!("checkpoints cleared");
        Ok(())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn work_items(&self) -> &Arc<WorkItemStore> {
        &self.work_items
    }

    pub fn enrichment(&self) -> &Arc<EnrichmentStore> {
        &self.enrichment
    }

    /// Signals cancellation; workers stop at their next checkpoint.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub async fn run_batch(
        &self,
        properties: Vec<Property>,
        mode: RunMode,
        skip: Vec<PhaseId>,
        progress: Option<indicatif::ProgressBar>,
    ) -> Result<BatchSummary> {
        self.batch.run(properties, mode, skip, progress).await
    }

    /// Joins the roster with enrichment records: everything that reached
    /// synthesis, ranked by total score. Strict mode omits failed
    /// properties instead of listing them as FAILED.
    pub fn ranked_entries(
        &self,
        properties: &[Property],
        strict: bool,
    ) -> Vec<(Property, EnrichmentRecord)> {
        let mut entries: Vec<(Property, EnrichmentRecord)> = properties
            .iter()
            .filter_map(|property| {
                let record = self.enrichment.get(&property.full_address)?;
                record.tier?;
                if strict && record.kill_switch_verdict == Some(crate::model::Verdict::Fail) {
                    return None;
                }
                Some((property.clone(), record))
            })
            .collect();
        entries.sort_by(|a, b| {
            b.1.total_score
                .unwrap_or(0.0)
                .partial_cmp(&a.1.total_score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries
    }

    pub fn write_ranked_csv(&self, entries: &[(Property, EnrichmentRecord)]) -> Result<PathBuf> {
        let path = self.config.data_dir.join("ranked.csv");
        let rows = import_export::write_ranked(
            &path,
            entries.iter().map(|(p, r)| (p, r)),
        )?;
        info!(rows, path = %path.display(), "ranked CSV written");
        Ok(path)
    }

    /// Writes the per-run aggregate of image manifests and the field
    /// lineage export.
    pub fn export_run_outputs(&self) -> Result<()> {
        let mut manifests = Vec::new();
        for (address, folder) in self.folders.entries() {
            let dir = self.config.images_dir.join(&folder);
            let manifest = ImageManifest::load_or_new(&dir, &address)?;
            if manifest.total_downloaded > 0 || manifest.duplicates_rejected > 0 {
                manifests.push(manifest);
            }
        }
        if !manifests.is_empty() {
            let path = self
                .config
                .manifests_dir()
                .join(format!("run-{}.json", self.started_at.unix_timestamp()));
            atomic::write_document(&path, &manifests)?;
        }
        self.enrichment.export_lineage(&self.config.lineage_path())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<ValidationReport> {
        validator::check_state(&self.enrichment)
    }
}
