//! Source extraction: the uniform extractor contract, the stealth HTTP
//! client, per-source rate budgets and circuit breaking, and the
//! orchestrator that drives a property through the enabled sources.
//!
//! Extractors are pure I/O: they fetch and parse, returning a tagged
//! [`ExtractOutcome`], and never persist anything. Blockers travel in the
//! outcome record, not as errors.

pub mod assessor;
pub mod circuit;
pub mod client;
pub mod orchestrator;
pub mod rate;
pub mod records;
pub mod redfin;
pub mod zillow;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::model::{Property, SourceTier};

pub use circuit::{BreakerState, CircuitBreaker, CircuitSnapshot, Gate};
pub use client::StealthClient;
pub use orchestrator::{ExtractionOrchestrator, ExtractionSummary};
pub use rate::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Blocker {
    #[default]
    None,
    Captcha,
    RateLimited,
    NotFound,
    Network,
    Parse,
}

impl Blocker {
    /// Blockers that open the circuit immediately rather than after
    /// repeated failures.
    pub fn is_hard(&self) -> bool {
        matches!(self, Blocker::Captcha | Blocker::RateLimited)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractStatus {
    Ok,
    Partial,
    Failed,
}

/// A downloaded gallery image, already at full resolution.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub url: String,
    pub bytes: Vec<u8>,
}

/// What one source produced for one property.
#[derive(Debug, Clone)]
pub struct ExtractOutcome {
    pub images: Vec<FetchedImage>,
    pub fields: BTreeMap<String, Value>,
    pub status: ExtractStatus,
    pub blocker: Blocker,
    pub attempted_at: OffsetDateTime,
}

impl ExtractOutcome {
    pub fn blocked(blocker: Blocker) -> Self {
        ExtractOutcome {
            images: Vec::new(),
            fields: BTreeMap::new(),
            status: ExtractStatus::Failed,
            blocker,
            attempted_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_results(images: Vec<FetchedImage>, fields: BTreeMap<String, Value>) -> Self {
        let status = if fields.is_empty() && images.is_empty() {
            ExtractStatus::Failed
        } else if fields.is_empty() || images.is_empty() {
            ExtractStatus::Partial
        } else {
            ExtractStatus::Ok
        };
        ExtractOutcome {
            images,
            fields,
            status,
            blocker: Blocker::None,
            attempted_at: OffsetDateTime::now_utc(),
        }
    }
}

#[async_trait]
pub trait SourceExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    /// Precedence tier the source's fields merge at.
    fn tier(&self) -> SourceTier;
    /// Field confidence for provenance stamping.
    fn confidence(&self) -> f64 {
        0.7
    }
    async fn extract(&self, property: &Property) -> ExtractOutcome;
}

/// Minimal percent-encoding for query-string values.
pub(crate) fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' => out.push(c),
            ' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{:02X}", c as u32)),
        }
    }
    out
}

/// Parses the JSON value embedded in a page right after `marker`, skipping
/// an optional `=` and whitespace. Listing sites ship their state this way
/// inside a script tag; serde stops cleanly at the end of the value, so no
/// closing-tag scan is needed.
pub(crate) fn embedded_json(html: &str, marker: &str) -> Option<Value> {
    let start = html.find(marker)? + marker.len();
    let rest = html[start..].trim_start_matches(|c: char| c == '=' || c.is_whitespace());
    serde_json::Deserializer::from_str(rest)
        .into_iter::<Value>()
        .next()?
        .ok()
}

/// Depth-first search for the first object containing `key`.
pub(crate) fn find_object_with<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if map.contains_key(key) {
                return Some(value);
            }
            map.values().find_map(|v| find_object_with(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| find_object_with(v, key)),
        _ => None,
    }
}

/// Collects every string in the tree for which `pred` holds.
pub(crate) fn collect_strings(value: &Value, pred: &dyn Fn(&str) -> bool, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if pred(s) {
                out.push(s.clone());
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect_strings(v, pred, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_strings(v, pred, out);
            }
        }
        _ => {}
    }
}
