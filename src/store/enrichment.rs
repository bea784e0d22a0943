//! Enrichment records: the merged field bag per property, with provenance
//! tracking, precedence rules, and a conflict log.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::model::{
    EnrichmentRecord, FieldConflict, MonthlyCost, Orientation, Provenance, SewerType,
    SolarStatus, SourceTier, SCHEMA_VERSION,
};
use crate::store::atomic;

/// Every field name an extractor or collaborator may legitimately produce.
/// Anything else is an orphan: kept in `extras`, logged, never fatal.
pub const KNOWN_FIELDS: &[&str] = &[
    "price",
    "beds",
    "baths",
    "sqft",
    "price_per_sqft",
    "description",
    "hoa_fee",
    "lot_sqft",
    "year_built",
    "garage_spaces",
    "has_pool",
    "livable_sqft",
    "sewer_type",
    "solar_status",
    "school_rating",
    "distance_to_grocery_miles",
    "distance_to_highway_miles",
    "orientation",
    "commute_minutes",
    "safety_score",
    "walk_score",
    "monthly_cost",
    "roof_age",
    "hvac_age",
    "pool_equipment_age",
    "kitchen",
    "master",
    "light",
    "ceilings",
    "fireplace",
    "laundry",
    "aesthetics",
];

/// What happened to one incoming field during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOutcome {
    /// Value stored, provenance stamped.
    Applied,
    /// Incoming value equals the stored one; nothing written.
    Unchanged,
    /// A higher-precedence value is already present.
    Superseded,
    /// A manual value disagreed; kept and logged.
    Conflict,
    /// Unknown field name; parked in `extras`.
    Orphan,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyStats {
    pub applied: u32,
    pub unchanged: u32,
    pub superseded: u32,
    pub conflicts: u32,
    pub orphans: Vec<String>,
}

/// Merges one field into the record under the precedence rules: a value is
/// replaced only by a strictly higher tier, or by the same tier at strictly
/// higher confidence. Disagreements with a kept manual value are appended
/// to `record.conflicts` instead of applied.
pub fn apply_field(
    record: &mut EnrichmentRecord,
    field: &str,
    value: &Value,
    prov: Provenance,
) -> FieldOutcome {
    if !KNOWN_FIELDS.contains(&field) {
        record.extras.insert(field.to_string(), value.clone());
        return FieldOutcome::Orphan;
    }

    let current = current_value(record, field);
    if current.as_ref() == Some(value) {
        return FieldOutcome::Unchanged;
    }

    if let Some(existing) = record.provenance.get(field) {
        let wins = prov.tier > existing.tier
            || (prov.tier == existing.tier && prov.confidence > existing.confidence);
        if !wins {
            if existing.tier == SourceTier::Manual && current.is_some() {
                record.conflicts.push(FieldConflict {
                    field: field.to_string(),
                    kept_source: existing.source_id.clone(),
                    incoming_source: prov.source_id.clone(),
                    kept: current.unwrap_or(Value::Null),
                    incoming: value.clone(),
                    at: prov.fetched_at,
                });
                return FieldOutcome::Conflict;
            }
            return FieldOutcome::Superseded;
        }
        // A manual value losing to a later manual value is still a
        // disagreement worth keeping on the record.
        if existing.tier == SourceTier::Manual {
            record.conflicts.push(FieldConflict {
                field: field.to_string(),
                kept_source: prov.source_id.clone(),
                incoming_source: existing.source_id.clone(),
                kept: value.clone(),
                incoming: current.unwrap_or(Value::Null),
                at: prov.fetched_at,
            });
        }
    }

    if !set_value(record, field, value) {
        warn!(field, %value, "field value has wrong shape, ignored");
        return FieldOutcome::Superseded;
    }
    record.provenance.insert(field.to_string(), prov);
    FieldOutcome::Applied
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').replace(',', "").parse().ok(),
        _ => None,
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    as_f64(value).map(|f| f.round() as u32)
}

fn as_i32(value: &Value) -> Option<i32> {
    as_f64(value).map(|f| f.round() as i32)
}

fn set_value(record: &mut EnrichmentRecord, field: &str, value: &Value) -> bool {
    macro_rules! set_num {
        ($slot:expr) => {
            match as_f64(value) {
                Some(v) => {
                    $slot = Some(v);
                    true
                }
                None => false,
            }
        };
    }
    match field {
        "price" => set_num!(record.price),
        "beds" => match as_u32(value) {
            Some(v) => {
                record.beds = Some(v);
                true
            }
            None => false,
        },
        "baths" => set_num!(record.baths),
        "sqft" => set_num!(record.sqft),
        "price_per_sqft" => set_num!(record.price_per_sqft),
        "description" => match value.as_str() {
            Some(s) => {
                record.description = Some(s.to_string());
                true
            }
            None => false,
        },
        "hoa_fee" => set_num!(record.hoa_fee),
        "lot_sqft" => set_num!(record.lot_sqft),
        "year_built" => match as_i32(value) {
            Some(v) => {
                record.year_built = Some(v);
                true
            }
            None => false,
        },
        "garage_spaces" => match as_u32(value) {
            Some(v) => {
                record.garage_spaces = Some(v);
                true
            }
            None => false,
        },
        "has_pool" => match value.as_bool() {
            Some(v) => {
                record.has_pool = Some(v);
                true
            }
            None => false,
        },
        "livable_sqft" => set_num!(record.livable_sqft),
        "sewer_type" => match serde_json::from_value::<SewerType>(value.clone()) {
            Ok(v) => {
                record.sewer_type = v;
                true
            }
            Err(_) => false,
        },
        "solar_status" => match serde_json::from_value::<SolarStatus>(value.clone()) {
            Ok(v) => {
                record.solar_status = v;
                true
            }
            Err(_) => false,
        },
        "school_rating" => set_num!(record.school_rating),
        "distance_to_grocery_miles" => set_num!(record.distance_to_grocery_miles),
        "distance_to_highway_miles" => set_num!(record.distance_to_highway_miles),
        "orientation" => match serde_json::from_value::<Orientation>(value.clone()) {
            Ok(v) => {
                record.orientation = v;
                true
            }
            Err(_) => false,
        },
        "commute_minutes" => set_num!(record.commute_minutes),
        "safety_score" => set_num!(record.safety_score),
        "walk_score" => set_num!(record.walk_score),
        "monthly_cost" => match serde_json::from_value::<MonthlyCost>(value.clone()) {
            Ok(v) => {
                record.monthly_cost = Some(v);
                true
            }
            Err(_) => false,
        },
        "roof_age" => set_num!(record.roof_age),
        "hvac_age" => set_num!(record.hvac_age),
        "pool_equipment_age" => set_num!(record.pool_equipment_age),
        "kitchen" => set_num!(record.visual.kitchen),
        "master" => set_num!(record.visual.master),
        "light" => set_num!(record.visual.light),
        "ceilings" => set_num!(record.visual.ceilings),
        "fireplace" => set_num!(record.visual.fireplace),
        "laundry" => set_num!(record.visual.laundry),
        "aesthetics" => set_num!(record.visual.aesthetics),
        _ => false,
    }
}

/// Current value of a known field as JSON, for idempotence and conflict
/// records. `None` when unset.
pub fn current_value(record: &EnrichmentRecord, field: &str) -> Option<Value> {
    fn num(v: Option<f64>) -> Option<Value> {
        v.map(|v| serde_json::json!(v))
    }
    match field {
        "price" => num(record.price),
        "beds" => record.beds.map(|v| serde_json::json!(v)),
        "baths" => num(record.baths),
        "sqft" => num(record.sqft),
        "price_per_sqft" => num(record.price_per_sqft),
        "description" => record.description.as_ref().map(|v| serde_json::json!(v)),
        "hoa_fee" => num(record.hoa_fee),
        "lot_sqft" => num(record.lot_sqft),
        "year_built" => record.year_built.map(|v| serde_json::json!(v)),
        "garage_spaces" => record.garage_spaces.map(|v| serde_json::json!(v)),
        "has_pool" => record.has_pool.map(|v| serde_json::json!(v)),
        "livable_sqft" => num(record.livable_sqft),
        "sewer_type" => match record.sewer_type {
            SewerType::Unknown => None,
            v => serde_json::to_value(v).ok(),
        },
        "solar_status" => match record.solar_status {
            SolarStatus::Unknown => None,
            v => serde_json::to_value(v).ok(),
        },
        "school_rating" => num(record.school_rating),
        "distance_to_grocery_miles" => num(record.distance_to_grocery_miles),
        "distance_to_highway_miles" => num(record.distance_to_highway_miles),
        "orientation" => match record.orientation {
            Orientation::Unknown => None,
            v => serde_json::to_value(v).ok(),
        },
        "commute_minutes" => num(record.commute_minutes),
        "safety_score" => num(record.safety_score),
        "walk_score" => num(record.walk_score),
        "monthly_cost" => record.monthly_cost.map(|v| serde_json::json!(v)),
        "roof_age" => num(record.roof_age),
        "hvac_age" => num(record.hvac_age),
        "pool_equipment_age" => num(record.pool_equipment_age),
        "kitchen" => num(record.visual.kitchen),
        "master" => num(record.visual.master),
        "light" => num(record.visual.light),
        "ceilings" => num(record.visual.ceilings),
        "fireplace" => num(record.visual.fireplace),
        "laundry" => num(record.visual.laundry),
        "aesthetics" => num(record.visual.aesthetics),
        _ => None,
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EnrichmentDoc {
    schema_version: u32,
    records: BTreeMap<String, EnrichmentRecord>,
}

impl Default for EnrichmentDoc {
    fn default() -> Self {
        EnrichmentDoc { schema_version: SCHEMA_VERSION, records: BTreeMap::new() }
    }
}

/// File-backed store of all enrichment records.
#[derive(Debug)]
pub struct EnrichmentStore {
    path: PathBuf,
    conflict_log: PathBuf,
    inner: Mutex<EnrichmentDoc>,
}

impl EnrichmentStore {
    pub fn open(path: PathBuf, conflict_log: PathBuf) -> Result<Self> {
        let doc: EnrichmentDoc = atomic::read_document(&path)?.unwrap_or_default();
        if doc.schema_version != SCHEMA_VERSION {
            return Err(PipelineError::CorruptState(format!(
                "{}: schema version {} (expected {}); 500-point era records are refused, not rescaled",
                path.display(),
                doc.schema_version,
                SCHEMA_VERSION
            )));
        }
        Ok(EnrichmentStore { path, conflict_log, inner: Mutex::new(doc) })
    }

    fn persist(&self, doc: &EnrichmentDoc) -> Result<()> {
        atomic::write_document(&self.path, doc)
    }

    pub fn get(&self, address: &str) -> Option<EnrichmentRecord> {
        self.inner.lock().records.get(address).cloned()
    }

    pub fn records(&self) -> Vec<EnrichmentRecord> {
        self.inner.lock().records.values().cloned().collect()
    }

    /// Mutates one record in place and persists the document.
    pub fn update<F>(&self, address: &str, mutate: F) -> Result<EnrichmentRecord>
    where
        F: FnOnce(&mut EnrichmentRecord),
    {
        let mut doc = self.inner.lock();
        let record = doc
            .records
            .entry(address.to_string())
            .or_insert_with(|| EnrichmentRecord::new(address));
        mutate(record);
        let out = record.clone();
        self.persist(&doc)?;
        Ok(out)
    }

    /// Merges a batch of fields from one source, stamping provenance and
    /// appending any conflicts to the conflict log.
    pub fn apply_fields(
        &self,
        address: &str,
        source_id: &str,
        tier: SourceTier,
        confidence: f64,
        fields: &BTreeMap<String, Value>,
    ) -> Result<ApplyStats> {
        let fetched_at = OffsetDateTime::now_utc();
        let mut stats = ApplyStats::default();
        let mut new_conflicts = Vec::new();
        {
            let mut doc = self.inner.lock();
            let record = doc
                .records
                .entry(address.to_string())
                .or_insert_with(|| EnrichmentRecord::new(address));
            for (field, value) in fields {
                let before = record.conflicts.len();
                let prov = Provenance {
                    source_id: source_id.to_string(),
                    tier,
                    fetched_at,
                    confidence,
                };
                match apply_field(record, field, value, prov) {
                    FieldOutcome::Applied => stats.applied += 1,
                    FieldOutcome::Unchanged => stats.unchanged += 1,
                    FieldOutcome::Superseded => stats.superseded += 1,
                    FieldOutcome::Conflict => stats.conflicts += 1,
                    FieldOutcome::Orphan => stats.orphans.push(field.clone()),
                }
                new_conflicts.extend(record.conflicts[before..].iter().cloned());
            }
            self.persist(&doc)?;
        }
        for conflict in &new_conflicts {
            self.append_conflict(conflict)?;
        }
        if !stats.orphans.is_empty() {
            debug!(address, source_id, orphans = ?stats.orphans, "orphan fields parked in extras");
        }
        Ok(stats)
    }

    fn append_conflict(&self, conflict: &FieldConflict) -> Result<()> {
        if let Some(parent) = self.conflict_log.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.conflict_log)?;
        writeln!(file, "{}", serde_json::to_string(conflict)?)?;
        Ok(())
    }

    /// Field lineage keyed address -> field -> provenance.
    pub fn export_lineage(&self, path: &Path) -> Result<()> {
        let doc = self.inner.lock();
        let lineage: BTreeMap<&String, &BTreeMap<String, Provenance>> = doc
            .records
            .iter()
            .map(|(addr, record)| (addr, &record.provenance))
            .collect();
        atomic::write_document(path, &lineage)
    }

    /// Re-reads the file and checks it deep-equals the in-memory state.
    pub fn verify_round_trip(&self) -> Result<()> {
        let doc = self.inner.lock();
        match atomic::read_document::<EnrichmentDoc>(&self.path)? {
            None if doc.records.is_empty() => Ok(()),
            None => Err(PipelineError::NotFound("enrichment file")),
            Some(reloaded) if reloaded.records == doc.records => Ok(()),
            Some(_) => Err(PipelineError::CorruptState(format!(
                "{}: reloaded records differ from in-memory state",
                self.path.display()
            ))),
        }
    }
}
