//! Weighted section scorer, 600 points total.
//!
//! Every sub-criterion maps its input to 0-10 and is multiplied by an
//! integer weight. Section caps: Location & Environment 230, Lot & Systems
//! 180, Interior & Features 190. Missing non-kill-switch inputs score the
//! neutral 5.0 and are counted in `defaults_used`; missing kill-switch
//! inputs (year built, lot size) are never defaulted and contribute
//! nothing.

use serde::Serialize;

use crate::model::{EnrichmentRecord, Orientation, Tier, Verdict};

pub const MAX_TOTAL: f64 = 600.0;
pub const MAX_SECTION_A: f64 = 230.0;
pub const MAX_SECTION_B: f64 = 180.0;
pub const MAX_SECTION_C: f64 = 190.0;

pub const UNICORN_FLOOR: f64 = 480.0;
pub const CONTENDER_FLOOR: f64 = 360.0;

const NEUTRAL: f64 = 5.0;

// Section A weights (sum 23 -> 230 points).
const W_SCHOOL: f64 = 6.0;
const W_HIGHWAY: f64 = 4.0;
const W_SAFETY: f64 = 5.0;
const W_GROCERY: f64 = 3.0;
const W_WALKABILITY: f64 = 2.0;
const W_ORIENTATION: f64 = 3.0;

// Section B weights (sum 18 -> 180 points).
const W_ROOF: f64 = 5.0;
const W_BACKYARD: f64 = 5.0;
const W_PLUMBING: f64 = 4.0;
const W_POOL: f64 = 4.0;

// Section C weights (sum 19 -> 190 points).
const W_KITCHEN: f64 = 4.0;
const W_MASTER: f64 = 3.0;
const W_LIGHT: f64 = 3.0;
const W_CEILINGS: f64 = 2.0;
const W_FIREPLACE: f64 = 1.0;
const W_LAUNDRY: f64 = 2.0;
const W_AESTHETICS: f64 = 4.0;

/// Count of sub-criteria feeding `data_quality`.
const REQUIRED_INPUTS: u32 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub section_a: f64,
    pub section_b: f64,
    pub section_c: f64,
    pub total: f64,
    pub tier: Tier,
    pub defaults_used: u32,
    pub data_quality: f64,
}

pub fn tier_for(total: f64, verdict: Verdict) -> Tier {
    if verdict == Verdict::Fail {
        Tier::Failed
    } else if total > UNICORN_FLOOR {
        Tier::Unicorn
    } else if total >= CONTENDER_FLOOR {
        Tier::Contender
    } else {
        Tier::Pass
    }
}

/// Scores a record. Pure: the record is read-only and the kill-switch
/// verdict only affects the tier, never the inputs.
pub fn score(record: &EnrichmentRecord, verdict: Verdict) -> ScoreBreakdown {
    let mut defaults_used = 0u32;
    let mut sub = |value: Option<f64>| -> f64 {
        match value {
            Some(v) => v.clamp(0.0, 10.0),
            None => {
                defaults_used += 1;
                NEUTRAL
            }
        }
    };
    // Kill-switch criteria (year_built, lot_sqft) are never defaulted: a
    // missing one contributes nothing and is reported only through
    // data_quality.
    let mut kill_switch_missing = 0u32;
    let mut required = |value: Option<f64>| -> f64 {
        match value {
            Some(v) => v.clamp(0.0, 10.0),
            None => {
                kill_switch_missing += 1;
                0.0
            }
        }
    };

    let section_a = sub(record.school_rating) * W_SCHOOL
        + sub(record.distance_to_highway_miles.map(highway_score)) * W_HIGHWAY
        + sub(record.safety_score) * W_SAFETY
        + sub(record.distance_to_grocery_miles.map(grocery_score)) * W_GROCERY
        + sub(record.walk_score.map(|w| w / 10.0)) * W_WALKABILITY
        + sub(orientation_score(record.orientation)) * W_ORIENTATION;

    // Backyard only defaults when the kill-switch half (the lot) is known
    // and the structure size is the missing piece.
    let backyard = match (record.lot_sqft, record.sqft) {
        (Some(lot), Some(sqft)) => required(Some(backyard_score(lot - 0.6 * sqft))),
        (Some(_), None) => sub(None),
        (None, _) => required(None),
    };
    let section_b = sub(record.roof_age.map(roof_age_score)) * W_ROOF
        + backyard * W_BACKYARD
        + required(record.year_built.map(plumbing_score)) * W_PLUMBING
        + sub(pool_score(record.has_pool, record.pool_equipment_age)) * W_POOL;

    let visual = &record.visual;
    let section_c = sub(visual.kitchen) * W_KITCHEN
        + sub(visual.master) * W_MASTER
        + sub(visual.light) * W_LIGHT
        + sub(visual.ceilings) * W_CEILINGS
        + sub(visual.fireplace) * W_FIREPLACE
        + sub(visual.laundry) * W_LAUNDRY
        + sub(visual.aesthetics) * W_AESTHETICS;

    let total = section_a + section_b + section_c;
    let populated = REQUIRED_INPUTS - defaults_used - kill_switch_missing;
    ScoreBreakdown {
        section_a,
        section_b,
        section_c,
        total,
        tier: tier_for(total, verdict),
        defaults_used,
        data_quality: populated as f64 / REQUIRED_INPUTS as f64,
    }
}

fn highway_score(miles: f64) -> f64 {
    if miles >= 2.0 {
        10.0
    } else if miles >= 1.0 {
        8.0
    } else if miles >= 0.5 {
        5.0
    } else if miles >= 0.25 {
        3.0
    } else {
        1.0
    }
}

fn grocery_score(miles: f64) -> f64 {
    if miles <= 0.5 {
        10.0
    } else if miles <= 1.0 {
        8.0
    } else if miles <= 2.0 {
        6.0
    } else if miles <= 3.0 {
        4.0
    } else {
        2.0
    }
}

/// A north-facing backyard is gold in the desert; west exposure bakes.
fn orientation_score(orientation: Orientation) -> Option<f64> {
    match orientation {
        Orientation::N => Some(10.0),
        Orientation::S => Some(9.0),
        Orientation::NE | Orientation::NW => Some(8.0),
        Orientation::E => Some(7.0),
        Orientation::SE => Some(6.0),
        Orientation::SW => Some(5.0),
        Orientation::W => Some(3.0),
        Orientation::Unknown => None,
    }
}

fn roof_age_score(age: f64) -> f64 {
    if age <= 5.0 {
        10.0
    } else if age <= 10.0 {
        8.0
    } else if age <= 15.0 {
        6.0
    } else if age <= 20.0 {
        4.0
    } else {
        2.0
    }
}

fn backyard_score(backyard_sqft: f64) -> f64 {
    if backyard_sqft >= 8_000.0 {
        10.0
    } else if backyard_sqft >= 6_000.0 {
        8.0
    } else if backyard_sqft >= 4_000.0 {
        6.0
    } else if backyard_sqft >= 2_500.0 {
        4.0
    } else {
        2.0
    }
}

/// Plumbing/electrical proxy from construction era.
fn plumbing_score(year_built: i32) -> f64 {
    if year_built >= 1990 {
        10.0
    } else if year_built >= 1975 {
        7.0
    } else if year_built >= 1960 {
        5.0
    } else {
        3.0
    }
}

/// No pool scores a clean 10: nothing to maintain or replace.
fn pool_score(has_pool: Option<bool>, equipment_age: Option<f64>) -> Option<f64> {
    match has_pool {
        None => None,
        Some(false) => Some(10.0),
        Some(true) => equipment_age.map(|age| {
            if age <= 3.0 {
                10.0
            } else if age <= 7.0 {
                7.0
            } else if age <= 12.0 {
                4.0
            } else {
                2.0
            }
        }),
    }
}
