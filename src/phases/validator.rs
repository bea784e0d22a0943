//! Pre-spawn gate for the visual-assessment phases plus the cross-layer
//! contract checks behind `casita validate`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::model::EnrichmentRecord;
use crate::store::enrichment::{current_value, EnrichmentStore, KNOWN_FIELDS};

/// Gate run before spawning a visual assessment. Failures come back as a
/// structured `BLOCKED: <reason>` the orchestrator logs and surfaces.
pub fn pre_spawn_check(
    images_dir: &Path,
    image_count: u32,
    record: &EnrichmentRecord,
) -> std::result::Result<(), String> {
    if !images_dir.is_dir() {
        return Err(format!("BLOCKED: image folder {} missing", images_dir.display()));
    }
    if image_count == 0 {
        return Err("BLOCKED: no images for assessment".to_string());
    }
    if record.year_built.is_none() {
        return Err("BLOCKED: year_built missing from context".to_string());
    }
    if record.lot_sqft.is_none() {
        return Err("BLOCKED: lot_sqft missing from context".to_string());
    }
    Ok(())
}

/// Field names a source produced that have no declared target. Logged by
/// callers, never fatal.
pub fn orphan_fields(fields: &BTreeMap<String, Value>) -> Vec<String> {
    fields
        .keys()
        .filter(|name| !KNOWN_FIELDS.contains(&name.as_str()))
        .cloned()
        .collect()
}

/// Known fields carrying a value without a provenance stamp.
pub fn provenance_gaps(record: &EnrichmentRecord) -> Vec<String> {
    KNOWN_FIELDS
        .iter()
        .filter(|field| {
            current_value(record, field).is_some() && !record.provenance.contains_key(**field)
        })
        .map(|field| field.to_string())
        .collect()
}

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub records_checked: usize,
    pub round_trip_ok: bool,
    pub provenance_gaps: BTreeMap<String, Vec<String>>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.round_trip_ok && self.provenance_gaps.is_empty()
    }
}

/// Contract checks over the persisted enrichment state: save/load
/// round-trip equality and provenance coverage of every non-default field.
pub fn check_state(enrichment: &EnrichmentStore) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();
    let records = enrichment.records();
    report.records_checked = records.len();
    report.round_trip_ok = match enrichment.verify_round_trip() {
        Ok(()) => true,
        Err(err) => {
            warn!(%err, "round-trip verification failed");
            false
        }
    };
    for record in &records {
        let gaps = provenance_gaps(record);
        if !gaps.is_empty() {
            report.provenance_gaps.insert(record.address.clone(), gaps);
        }
    }
    Ok(report)
}
