//! Drives one property through the enabled sources in priority order:
//! circuit gating, extraction, perceptual-hash dedup, atomic image
//! persistence, and field merging. Sources are strictly sequential within
//! a property; fanout lives inside each source's image downloads.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::extract::circuit::{CircuitBreaker, Gate};
use crate::extract::{Blocker, ExtractStatus, FetchedImage, SourceExtractor};
use crate::imaging::hash::{difference_hash, perceptual_hash, to_hex};
use crate::imaging::lsh::{HashEntry, HashIndex};
use crate::imaging::manifest::{address_hash, standardize_image, ImageManifest, ImageRecord};
use crate::model::{Property, SewerType};
use crate::store::atomic;
use crate::store::enrichment::EnrichmentStore;
use crate::store::folders::FolderLookup;

#[derive(Debug, Clone)]
pub struct ExtractionSummary {
    pub status: ExtractStatus,
    pub sources_ok: Vec<String>,
    pub skipped_blocked: Vec<String>,
    pub manifest: ImageManifest,
}

pub struct ExtractionOrchestrator {
    sources: Vec<Arc<dyn SourceExtractor>>,
    circuit: Arc<CircuitBreaker>,
    index: Arc<Mutex<HashIndex>>,
    index_path: PathBuf,
    enrichment: Arc<EnrichmentStore>,
    folders: Arc<FolderLookup>,
    images_root: PathBuf,
    max_image_dim: u32,
}

impl ExtractionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sources: Vec<Arc<dyn SourceExtractor>>,
        circuit: Arc<CircuitBreaker>,
        index: Arc<Mutex<HashIndex>>,
        index_path: PathBuf,
        enrichment: Arc<EnrichmentStore>,
        folders: Arc<FolderLookup>,
        images_root: PathBuf,
        max_image_dim: u32,
    ) -> Self {
        ExtractionOrchestrator {
            sources,
            circuit,
            index,
            index_path,
            enrichment,
            folders,
            images_root,
            max_image_dim,
        }
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Runs extraction for one property. Idempotent: sources already
    /// recorded complete in the manifest checkpoint are not re-attempted,
    /// so a crashed run resumes at the first incomplete source.
    pub async fn run(&self, property: &Property) -> Result<ExtractionSummary> {
        let address = &property.full_address;
        let folder_name = address_hash(address);
        let folder = self.images_root.join(&folder_name);
        fs::create_dir_all(&folder)?;
        self.folders.record(address, &folder_name)?;

        let mut manifest = ImageManifest::load_or_new(&folder, address)?;
        let mut sources_ok = Vec::new();
        let mut skipped_blocked = Vec::new();

        for source in &self.sources {
            let name = source.name();
            if manifest.source_complete(name) {
                debug!(address = %address, source = name, "source already complete, resuming past it");
                sources_ok.push(name.to_string());
                continue;
            }
            if self.circuit.check(name) == Gate::Blocked {
                info!(address = %address, source = name, "skipped_blocked: circuit open");
                skipped_blocked.push(name.to_string());
                continue;
            }

            let outcome = source.extract(property).await;
            if outcome.blocker != Blocker::None {
                self.circuit.record_failure(name, outcome.blocker.is_hard());
            } else if outcome.status == ExtractStatus::Failed {
                self.circuit.record_failure(name, false);
            } else {
                self.circuit.record_success(name);
            }

            for image in &outcome.images {
                self.ingest_image(&mut manifest, &folder, name, image)?;
            }
            if !outcome.fields.is_empty() {
                let stats = self.enrichment.apply_fields(
                    address,
                    name,
                    source.tier(),
                    source.confidence(),
                    &outcome.fields,
                )?;
                debug!(
                    address = %address,
                    source = name,
                    applied = stats.applied,
                    superseded = stats.superseded,
                    conflicts = stats.conflicts,
                    "fields merged"
                );
            }
            match outcome.status {
                ExtractStatus::Ok => {
                    manifest.mark_source_complete(name);
                    sources_ok.push(name.to_string());
                }
                ExtractStatus::Partial => {
                    manifest.mark_source_complete(name);
                }
                ExtractStatus::Failed => {
                    debug!(address = %address, source = name, blocker = ?outcome.blocker, "source failed");
                }
            }
            manifest.save(&folder)?;
        }

        manifest.save(&folder)?;
        self.persist_index()?;

        let status = self.final_status(address, &sources_ok, &manifest);
        Ok(ExtractionSummary { status, sources_ok, skipped_blocked, manifest })
    }

    /// Status rule: ok needs at least one successful source plus the
    /// kill-switch-critical fields (hoa, beds, a sewer hint).
    fn final_status(
        &self,
        address: &str,
        sources_ok: &[String],
        manifest: &ImageManifest,
    ) -> ExtractStatus {
        let record = self.enrichment.get(address);
        let critical = record
            .as_ref()
            .map(|r| {
                r.hoa_fee.is_some() && r.beds.is_some() && r.sewer_type != SewerType::Unknown
            })
            .unwrap_or(false);
        if !sources_ok.is_empty() && critical {
            ExtractStatus::Ok
        } else if record.map(|r| !r.provenance.is_empty()).unwrap_or(false)
            || manifest.total_downloaded > 0
        {
            ExtractStatus::Partial
        } else {
            ExtractStatus::Failed
        }
    }

    fn ingest_image(
        &self,
        manifest: &mut ImageManifest,
        folder: &std::path::Path,
        source: &'static str,
        image: &FetchedImage,
    ) -> Result<()> {
        let (standardized, png) = match standardize_image(&image.bytes, self.max_image_dim) {
            Ok(out) => out,
            Err(err) => {
                warn!(url = %image.url, %err, "undecodable image dropped");
                return Ok(());
            }
        };
        let phash = perceptual_hash(&standardized);
        let dhash = difference_hash(&standardized);

        // Dedup and registration happen under one index lock so two
        // workers cannot both admit the same image.
        let mut index = self.index.lock();
        let duplicate = index
            .find_duplicate(phash, Some(&manifest.address))
            .or_else(|| index.find_duplicate(phash, None));
        if let Some((original, distance)) = duplicate {
            debug!(url = %image.url, original = %original, distance, "duplicate rejected");
            manifest.duplicates_rejected += 1;
            return Ok(());
        }

        let seq = manifest.next_seq();
        let file = folder.join(format!("{seq:03}_{source}.png"));
        let image_id = format!("{}/{seq:03}_{source}", manifest.address_hash);
        atomic::write_bytes(&file, &png)?;
        if let Err(err) = index.register(
            &image_id,
            HashEntry {
                phash,
                dhash,
                address: manifest.address.clone(),
                source: source.to_string(),
            },
        ) {
            warn!(image_id = %image_id, %err, "hash registration rejected, dropping bytes");
            let _ = fs::remove_file(&file);
            manifest.duplicates_rejected += 1;
            return Ok(());
        }
        drop(index);

        manifest.images.push(ImageRecord {
            image_id,
            perceptual_hash: to_hex(phash),
            difference_hash: to_hex(dhash),
            property_address: manifest.address.clone(),
            source: source.to_string(),
            bytes_path: file,
            fetched_at: time::OffsetDateTime::now_utc(),
        });
        manifest.total_downloaded += 1;
        Ok(())
    }

    /// Index persistence is batched at the end of each extraction run.
    pub fn persist_index(&self) -> Result<()> {
        let doc = self.index.lock().to_document();
        atomic::write_document(&self.index_path, &doc)
    }
}
