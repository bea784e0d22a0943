#![allow(missing_docs)]

//! End-to-end scoring scenarios over fully-populated enrichment records.

use casita::model::{EnrichmentRecord, Orientation, SewerType, Tier, Verdict, VisualScores};
use casita::score::{evaluate, score, verdict_for_severity, KillSwitchPolicy};

/// A record that passes every criterion and maxes every sub-score.
fn dream_house() -> EnrichmentRecord {
    let mut record = EnrichmentRecord::new("4226 E WOOD ST, PHOENIX, AZ 85040");
    // Kill-switch inputs.
    record.hoa_fee = Some(0.0);
    record.beds = Some(4);
    record.baths = Some(2.0);
    record.sewer_type = SewerType::City;
    record.year_built = Some(1999);
    record.garage_spaces = Some(2);
    record.lot_sqft = Some(9_000.0);
    // Location & environment.
    record.school_rating = Some(10.0);
    record.distance_to_highway_miles = Some(2.5);
    record.safety_score = Some(10.0);
    record.distance_to_grocery_miles = Some(0.4);
    record.walk_score = Some(100.0);
    record.orientation = Orientation::N;
    // Lot & systems.
    record.roof_age = Some(3.0);
    record.sqft = Some(1_500.0);
    record.has_pool = Some(false);
    // Interior.
    record.visual = VisualScores {
        kitchen: Some(10.0),
        master: Some(10.0),
        light: Some(10.0),
        ceilings: Some(10.0),
        fireplace: Some(10.0),
        laundry: Some(10.0),
        aesthetics: Some(10.0),
    };
    record
}

#[test]
fn perfect_property_is_a_unicorn() {
    let record = dream_house();
    let outcome = evaluate(&record, 2026, &KillSwitchPolicy::default());
    assert_eq!(outcome.verdict, Verdict::Pass);
    assert_eq!(outcome.severity, 0.0);

    let breakdown = score(&record, outcome.verdict);
    assert_eq!(breakdown.total, 600.0);
    assert_eq!(breakdown.tier, Tier::Unicorn);
}

#[test]
fn any_hoa_fee_fails_regardless_of_score() {
    let mut record = dream_house();
    record.hoa_fee = Some(200.0);
    let outcome = evaluate(&record, 2026, &KillSwitchPolicy::default());
    assert_eq!(outcome.verdict, Verdict::Fail);

    let breakdown = score(&record, outcome.verdict);
    assert_eq!(breakdown.total, 600.0);
    assert_eq!(breakdown.tier, Tier::Failed);
}

#[test]
fn septic_and_new_build_stack_to_a_fail() {
    let mut record = dream_house();
    record.sewer_type = SewerType::Septic;
    record.year_built = Some(2024);
    let outcome = evaluate(&record, 2024, &KillSwitchPolicy::default());
    assert_eq!(outcome.severity, 4.5);
    assert_eq!(outcome.verdict, Verdict::Fail);
}

#[test]
fn septic_alone_warns_but_still_scores() {
    let mut record = dream_house();
    record.sewer_type = SewerType::Septic;
    let outcome = evaluate(&record, 2026, &KillSwitchPolicy::default());
    assert_eq!(outcome.severity, 2.5);
    assert_eq!(outcome.verdict, Verdict::Warning);

    let breakdown = score(&record, outcome.verdict);
    assert_eq!(breakdown.tier, Tier::Unicorn);
}

#[test]
fn verdict_thresholds_sit_exactly_on_the_documented_boundaries() {
    assert_eq!(verdict_for_severity(1.49), Verdict::Pass);
    assert_eq!(verdict_for_severity(1.50), Verdict::Warning);
    assert_eq!(verdict_for_severity(2.90), Verdict::Warning);
    assert_eq!(verdict_for_severity(3.00), Verdict::Fail);
}

#[test]
fn kill_switch_does_not_alter_scoring_inputs() {
    let record = dream_house();
    let before = record.clone();
    let outcome = evaluate(&record, 2026, &KillSwitchPolicy::default());
    assert_eq!(record, before);
    let with_filter = score(&record, outcome.verdict);
    let without_filter = score(&before, Verdict::Pass);
    assert_eq!(with_filter.total, without_filter.total);
    assert_eq!(with_filter.section_a, without_filter.section_a);
}

#[test]
fn partially_known_record_reports_defaults_and_quality() {
    let mut record = dream_house();
    record.school_rating = None;
    record.walk_score = None;
    record.visual.fireplace = None;
    let breakdown = score(&record, Verdict::Pass);
    assert_eq!(breakdown.defaults_used, 3);
    assert!((breakdown.data_quality - 14.0 / 17.0).abs() < 1e-9);
    // Neutral 5s: school 6*5, walk 2*5, fireplace 1*5.
    assert_eq!(breakdown.total, 600.0 - (5.0 * 6.0 + 5.0 * 2.0 + 5.0 * 1.0));
}

#[test]
fn section_scores_stay_within_caps_on_hostile_inputs() {
    let mut record = dream_house();
    record.school_rating = Some(400.0);
    record.walk_score = Some(1_000.0);
    record.visual.kitchen = Some(-3.0);
    let breakdown = score(&record, Verdict::Pass);
    assert!(breakdown.section_a <= 230.0);
    assert!(breakdown.section_b <= 180.0);
    assert!(breakdown.section_c <= 190.0);
    assert!(breakdown.total <= 600.0);
    assert!(breakdown.total >= 0.0);
}
