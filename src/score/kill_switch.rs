//! Hard and soft buyer criteria.
//!
//! Hard criteria short-circuit to FAIL. Soft criteria accumulate severity;
//! 3.0 fails, 1.5 warns. Unknown soft inputs pass with a missing-data note
//! and contribute nothing. The failure list is emitted in a fixed
//! evaluation order so identical inputs produce identical output.

use serde::Serialize;

use crate::model::{EnrichmentRecord, SewerType, Verdict};

pub const SEVERITY_FAIL: f64 = 3.0;
pub const SEVERITY_WARN: f64 = 1.5;

const WEIGHT_SEWER: f64 = 2.5;
const WEIGHT_NEW_BUILD: f64 = 2.0;
const WEIGHT_GARAGE: f64 = 1.5;
const WEIGHT_LOT: f64 = 1.0;

const LOT_MIN_SQFT: f64 = 7_000.0;
const LOT_MAX_SQFT: f64 = 15_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KillSwitchPolicy {
    /// Lenient reading of the no-HOA rule: whether an unknown fee passes.
    /// The strict default fails it.
    pub hoa_unknown_passes: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KillSwitchOutcome {
    pub verdict: Verdict,
    pub severity: f64,
    pub failures: Vec<String>,
    pub missing_data: Vec<String>,
}

pub fn verdict_for_severity(severity: f64) -> Verdict {
    if severity >= SEVERITY_FAIL {
        Verdict::Fail
    } else if severity >= SEVERITY_WARN {
        Verdict::Warning
    } else {
        Verdict::Pass
    }
}

/// Evaluates the kill switch. `current_year` is resolved by the caller at
/// evaluation time so the new-build rule never goes stale.
pub fn evaluate(
    record: &EnrichmentRecord,
    current_year: i32,
    policy: &KillSwitchPolicy,
) -> KillSwitchOutcome {
    let mut missing_data = Vec::new();

    // Hard criteria, in order; the first failure short-circuits.
    let hard_failure = hard_hoa(record, policy, &mut missing_data)
        .or_else(|| hard_beds(record))
        .or_else(|| hard_baths(record));
    if let Some(failure) = hard_failure {
        return KillSwitchOutcome {
            verdict: Verdict::Fail,
            severity: 0.0,
            failures: vec![failure],
            missing_data,
        };
    }

    let mut severity = 0.0;
    let mut failures = Vec::new();
    let mut soft = |hit: Option<String>, weight: f64| {
        if let Some(message) = hit {
            severity += weight;
            failures.push(message);
        }
    };

    match record.sewer_type {
        SewerType::City => {}
        SewerType::Septic => soft(Some("sewer is septic, not city".to_string()), WEIGHT_SEWER),
        SewerType::Unknown => missing_data.push("sewer_type".to_string()),
    }
    match record.year_built {
        Some(year) if year >= current_year => soft(
            Some(format!("new build ({year})")),
            WEIGHT_NEW_BUILD,
        ),
        Some(_) => {}
        None => missing_data.push("year_built".to_string()),
    }
    match record.garage_spaces {
        Some(spaces) if spaces < 2 => soft(
            Some(format!("garage has {spaces} space(s), need 2")),
            WEIGHT_GARAGE,
        ),
        Some(_) => {}
        None => missing_data.push("garage_spaces".to_string()),
    }
    match record.lot_sqft {
        Some(lot) if !(LOT_MIN_SQFT..=LOT_MAX_SQFT).contains(&lot) => soft(
            Some(format!("lot {lot:.0} sqft outside 7000-15000")),
            WEIGHT_LOT,
        ),
        Some(_) => {}
        None => missing_data.push("lot_sqft".to_string()),
    }

    KillSwitchOutcome {
        verdict: verdict_for_severity(severity),
        severity,
        failures,
        missing_data,
    }
}

fn hard_hoa(
    record: &EnrichmentRecord,
    policy: &KillSwitchPolicy,
    missing_data: &mut Vec<String>,
) -> Option<String> {
    match record.hoa_fee {
        Some(fee) if fee == 0.0 => None,
        Some(fee) => Some(format!("hoa_fee ${fee:.0}/mo, must be 0")),
        None if policy.hoa_unknown_passes => {
            missing_data.push("hoa_fee".to_string());
            None
        }
        None => Some("hoa_fee unknown, strict policy fails it".to_string()),
    }
}

fn hard_beds(record: &EnrichmentRecord) -> Option<String> {
    match record.beds {
        Some(beds) if beds >= 4 => None,
        Some(beds) => Some(format!("{beds} beds, need 4")),
        None => Some("beds unknown".to_string()),
    }
}

fn hard_baths(record: &EnrichmentRecord) -> Option<String> {
    match record.baths {
        Some(baths) if baths >= 2.0 => None,
        Some(baths) => Some(format!("{baths} baths, need 2.0")),
        None => Some("baths unknown".to_string()),
    }
}
