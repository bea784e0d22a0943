//! Pure evaluation over a finished enrichment record: the kill-switch
//! filter and the weighted section scorer. Nothing in here touches disk or
//! network; same inputs always produce the same outputs.

pub mod kill_switch;
pub mod scorer;

pub use kill_switch::{evaluate, verdict_for_severity, KillSwitchOutcome, KillSwitchPolicy};
pub use scorer::{score, tier_for, ScoreBreakdown};
