//! The per-property phase state machine: prerequisite table, pre-spawn
//! validation, the sequential phase driver, and the batch worker pool.

pub mod batch;
pub mod cost;
pub mod runner;
pub mod validator;

pub use batch::{BatchRunner, BatchSummary};
pub use runner::{Collaborators, PhaseRunner, PropertyOutcome};

use crate::model::{PhaseId, PhaseStatus};
use crate::store::work_items::WorkItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Any prerequisite failure or phase failure aborts the property.
    Strict,
    /// Prerequisite failures skip the phase with a logged reason.
    Lenient,
}

/// Prerequisite predicate for each phase, evaluated against the work item
/// and the extracted-image count.
pub fn prerequisite(item: &WorkItem, phase: PhaseId, images: u32) -> Result<(), String> {
    let status = |p: PhaseId| item.status(p);
    let complete = |p: PhaseId| status(p) == PhaseStatus::Complete;
    match phase {
        PhaseId::P0County => Ok(()),
        PhaseId::P05Cost => complete(PhaseId::P0County)
            .then_some(())
            .ok_or_else(|| "county phase not complete".to_string()),
        PhaseId::P1Listing | PhaseId::P1Map => {
            (status(PhaseId::P0County) != PhaseStatus::Failed)
                .then_some(())
                .ok_or_else(|| "county phase failed".to_string())
        }
        PhaseId::P2AExterior => {
            if !complete(PhaseId::P1Listing) {
                Err("listing phase not complete".to_string())
            } else if images == 0 {
                Err("no images extracted".to_string())
            } else {
                Ok(())
            }
        }
        PhaseId::P2BInterior => complete(PhaseId::P2AExterior)
            .then_some(())
            .ok_or_else(|| "exterior assessment not complete".to_string()),
        PhaseId::P3Synthesis => {
            if !complete(PhaseId::P0County) {
                Err("county phase not complete".to_string())
            } else if !complete(PhaseId::P1Listing) && !complete(PhaseId::P1Map) {
                Err("neither listing nor map phase complete".to_string())
            } else {
                Ok(())
            }
        }
        PhaseId::P4Report => complete(PhaseId::P3Synthesis)
            .then_some(())
            .ok_or_else(|| "synthesis not complete".to_string()),
    }
}
