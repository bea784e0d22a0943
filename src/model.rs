//! Data model for candidate properties and their enrichment records.
//!
//! # Key Types
//!
//! - [`Property`] - A candidate property as read from the input roster
//! - [`EnrichmentRecord`] - The accumulating per-property field bag
//! - [`Provenance`] / [`SourceTier`] - Where a field value came from
//! - [`PhaseId`] / [`PhaseStatus`] - The pipeline phase state machine
//! - [`Verdict`] / [`Tier`] - Kill-switch and final classification results

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Schema version stamped on every persisted state document.
///
/// Version 1 used the retired 500-point scale; loading it is refused rather
/// than rescaled.
pub const SCHEMA_VERSION: u32 = 2;

/// Normalizes a street address into the canonical identity form: uppercased,
/// whitespace collapsed, trailing punctuation stripped.
pub fn normalize_address(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', ',', ';'])
        .trim()
        .to_uppercase()
}

/// A candidate property as parsed from one roster CSV row.
///
/// `full_address` is the primary key throughout the pipeline and is stored
/// normalized (see [`normalize_address`]). The remaining columns are the
/// listing-supplied seed values; everything else is collected by the phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub full_address: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    /// Display form of the asking price, e.g. `$450,000`.
    pub price: String,
    pub price_num: Option<f64>,
    pub beds: Option<u32>,
    pub baths: Option<f64>,
    pub sqft: Option<f64>,
    pub price_per_sqft: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SewerType {
    City,
    Septic,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SolarStatus {
    Owned,
    Leased,
    None,
    #[default]
    Unknown,
}

/// Compass orientation of the rear of the house.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Orientation {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
    #[serde(rename = "unknown")]
    #[default]
    Unknown,
}

/// Kill-switch verdict for a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Warning,
    Fail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Warning => "WARNING",
            Verdict::Fail => "FAIL",
        }
    }
}

/// Final classification bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Unicorn,
    Contender,
    Pass,
    Failed,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Unicorn => "UNICORN",
            Tier::Contender => "CONTENDER",
            Tier::Pass => "PASS",
            Tier::Failed => "FAILED",
        }
    }
}

/// Pipeline phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PhaseId {
    #[serde(rename = "P0_county")]
    P0County,
    #[serde(rename = "P05_cost")]
    P05Cost,
    #[serde(rename = "P1_listing")]
    P1Listing,
    #[serde(rename = "P1_map")]
    P1Map,
    #[serde(rename = "P2A_exterior")]
    P2AExterior,
    #[serde(rename = "P2B_interior")]
    P2BInterior,
    #[serde(rename = "P3_synthesis")]
    P3Synthesis,
    #[serde(rename = "P4_report")]
    P4Report,
}

impl PhaseId {
    /// All phases in execution order.
    pub const ORDER: [PhaseId; 8] = [
        PhaseId::P0County,
        PhaseId::P05Cost,
        PhaseId::P1Listing,
        PhaseId::P1Map,
        PhaseId::P2AExterior,
        PhaseId::P2BInterior,
        PhaseId::P3Synthesis,
        PhaseId::P4Report,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseId::P0County => "P0_county",
            PhaseId::P05Cost => "P05_cost",
            PhaseId::P1Listing => "P1_listing",
            PhaseId::P1Map => "P1_map",
            PhaseId::P2AExterior => "P2A_exterior",
            PhaseId::P2BInterior => "P2B_interior",
            PhaseId::P3Synthesis => "P3_synthesis",
            PhaseId::P4Report => "P4_report",
        }
    }

    pub fn parse(s: &str) -> Option<PhaseId> {
        PhaseId::ORDER.iter().copied().find(|p| p.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Skipped,
    Failed,
}

/// Source precedence tier. Higher tiers win on merge; manual research is
/// never silently overwritten.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    #[default]
    Default,
    Listing,
    County,
    Manual,
}

/// Where a field value came from and how much we trust it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: String,
    pub tier: SourceTier,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    pub confidence: f64,
}

/// A precedence conflict kept for later reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    pub kept_source: String,
    pub incoming_source: String,
    pub kept: serde_json::Value,
    pub incoming: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// Monthly carrying cost with its breakdown, all in dollars per month.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MonthlyCost {
    pub total: f64,
    pub principal_interest: f64,
    pub property_tax: f64,
    pub insurance: f64,
    pub hoa: f64,
    pub utilities: f64,
}

/// The seven interior scores returned by the visual assessor, each 1-10.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct VisualScores {
    pub kitchen: Option<f64>,
    pub master: Option<f64>,
    pub light: Option<f64>,
    pub ceilings: Option<f64>,
    pub fireplace: Option<f64>,
    pub laundry: Option<f64>,
    pub aesthetics: Option<f64>,
}

/// The accumulating per-property field bag.
///
/// Fields are grouped by origin: listing-supplied, county-authoritative,
/// researched, and derived. Within a run fields are append-only; a value is
/// replaced only by a higher-precedence source, and disagreements with
/// manual research are recorded in `conflicts` instead of applied.
/// Unrecognized extractor output lands in `extras`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EnrichmentRecord {
    pub address: String,

    // Listing-supplied.
    pub price: Option<f64>,
    pub beds: Option<u32>,
    pub baths: Option<f64>,
    pub sqft: Option<f64>,
    pub price_per_sqft: Option<f64>,
    pub description: Option<String>,
    /// Monthly HOA fee; zero means no HOA, `None` means not yet known.
    pub hoa_fee: Option<f64>,

    // County-authoritative.
    pub lot_sqft: Option<f64>,
    pub year_built: Option<i32>,
    pub garage_spaces: Option<u32>,
    pub has_pool: Option<bool>,
    pub livable_sqft: Option<f64>,

    // Researched.
    #[serde(default)]
    pub sewer_type: SewerType,
    #[serde(default)]
    pub solar_status: SolarStatus,
    pub school_rating: Option<f64>,
    pub distance_to_grocery_miles: Option<f64>,
    pub distance_to_highway_miles: Option<f64>,
    #[serde(default)]
    pub orientation: Orientation,
    pub commute_minutes: Option<f64>,
    pub safety_score: Option<f64>,
    pub walk_score: Option<f64>,
    pub monthly_cost: Option<MonthlyCost>,
    pub roof_age: Option<f64>,
    pub hvac_age: Option<f64>,
    pub pool_equipment_age: Option<f64>,
    #[serde(default)]
    pub visual: VisualScores,

    // Derived.
    pub kill_switch_verdict: Option<Verdict>,
    pub kill_switch_severity: Option<f64>,
    #[serde(default)]
    pub kill_switch_failures: Vec<String>,
    pub score_section_a: Option<f64>,
    pub score_section_b: Option<f64>,
    pub score_section_c: Option<f64>,
    pub total_score: Option<f64>,
    pub tier: Option<Tier>,
    pub defaults_used: Option<u32>,
    pub data_quality: Option<f64>,

    #[serde(default)]
    pub extras: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub provenance: BTreeMap<String, Provenance>,
    #[serde(default)]
    pub conflicts: Vec<FieldConflict>,
}

impl EnrichmentRecord {
    pub fn new(address: impl Into<String>) -> Self {
        EnrichmentRecord {
            address: address.into(),
            ..Default::default()
        }
    }
}
