//! # Casita - Residential Property Analysis Pipeline
//!
//! Casita drives candidate properties through a durable, crash-resilient,
//! multi-phase pipeline: county records, cost modeling, stealth listing
//! extraction with perceptual-hash image dedup, map enrichment, visual
//! assessment, kill-switch filtering, and a weighted 600-point score with
//! tier classification.
//!
//! ## Quick Start
//!
//! ```rust
//! use casita::model::EnrichmentRecord;
//! use casita::score::{evaluate, score, KillSwitchPolicy};
//!
//! let mut record = EnrichmentRecord::new("4226 E WOOD ST, PHOENIX, AZ 85040");
//! record.hoa_fee = Some(0.0);
//! record.beds = Some(4);
//! record.baths = Some(2.5);
//! record.sewer_type = casita::model::SewerType::City;
//!
//! let outcome = evaluate(&record, 2026, &KillSwitchPolicy::default());
//! let breakdown = score(&record, outcome.verdict);
//! println!("{} -> {}", record.address, breakdown.tier.as_str());
//! ```
//!
//! ## Architecture
//!
//! - **Store layer**: atomically-written JSON documents with backup
//!   fallback (work items, enrichment records, hash index, folder lookup)
//! - **Imaging layer**: DCT perceptual hashes and a banded LSH index for
//!   near-duplicate rejection
//! - **Extraction layer**: per-source stealth fetchers behind a circuit
//!   breaker and rate budgets
//! - **Phase layer**: the per-property state machine, checkpointing, and
//!   the batch worker pool
//! - **Score layer**: pure kill-switch and section scoring

pub mod cli;
pub mod collab;
pub mod config;
pub mod error;
pub mod extract;
pub mod imaging;
pub mod logging;
pub mod model;
pub mod phases;
pub mod pipeline;
pub mod score;
pub mod store;

// Re-export the main public API.
pub use crate::config::PipelineConfig;
pub use crate::error::{PipelineError, Result};
pub use crate::model::{
    EnrichmentRecord, Orientation, PhaseId, PhaseStatus, Property, SewerType, SolarStatus,
    SourceTier, Tier, Verdict,
};
pub use crate::phases::{BatchSummary, RunMode};
pub use crate::pipeline::Pipeline;
