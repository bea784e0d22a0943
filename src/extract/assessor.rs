//! County assessor API client. Unlike the scraped sources this is a
//! sanctioned JSON endpoint with a token; it doubles as the
//! [`CountyRecords`] collaborator for the county phase.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::collab::CountyRecords;
use crate::error::{PipelineError, Result};
use crate::extract::client::StealthClient;
use crate::extract::rate::RateLimiter;
use crate::extract::{percent_encode, Blocker, ExtractOutcome, ExtractStatus, SourceExtractor};
use crate::model::{Property, SourceTier};

pub const SOURCE: &str = "assessor";

pub struct AssessorApi {
    client: Arc<StealthClient>,
    limiter: RateLimiter,
    token: Option<String>,
}

impl AssessorApi {
    pub fn new(client: Arc<StealthClient>, limiter: RateLimiter, token: Option<String>) -> Self {
        AssessorApi { client, limiter, token }
    }

    fn search_url(property: &Property) -> String {
        format!(
            "https://mcassessor.maricopa.gov/search/property/?q={}",
            percent_encode(&property.full_address)
        )
    }

    async fn fetch_fields(&self, property: &Property) -> Result<BTreeMap<String, Value>> {
        let token = self
            .token
            .as_deref()
            .ok_or(PipelineError::NotConfigured("assessor API token"))?;
        if self.limiter.throttle().await.is_err() {
            return Err(PipelineError::Http("assessor daily budget spent".to_string()));
        }
        let url = Self::search_url(property);
        let body = self
            .client
            .get_text_with(&url, None, &[("authorization", token)])
            .await
            .map_err(|failure| PipelineError::Http(format!("{failure:?}")))?;
        let payload: Value = serde_json::from_str(&body)?;
        Ok(parse_payload(&payload))
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace(',', "").trim().parse().ok(),
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "yes" | "y" | "true" => Some(true),
            "no" | "n" | "false" | "none" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_payload(payload: &Value) -> BTreeMap<String, Value> {
    let parcel = payload["RealProperty"]
        .as_array()
        .and_then(|items| items.first())
        .unwrap_or(payload);

    let mut fields = BTreeMap::new();
    for (ours, theirs) in [
        ("lot_sqft", "LotSize"),
        ("year_built", "ConstructionYear"),
        ("livable_sqft", "LivableSpace"),
        ("garage_spaces", "GarageStalls"),
    ] {
        if let Some(value) = parcel.get(theirs).and_then(coerce_f64) {
            fields.insert(ours.to_string(), serde_json::json!(value));
        }
    }
    if let Some(pool) = parcel.get("Pool").and_then(coerce_bool) {
        fields.insert("has_pool".to_string(), serde_json::json!(pool));
    }
    fields
}

#[async_trait]
impl SourceExtractor for AssessorApi {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn tier(&self) -> SourceTier {
        SourceTier::County
    }

    fn confidence(&self) -> f64 {
        0.9
    }

    async fn extract(&self, property: &Property) -> ExtractOutcome {
        match self.fetch_fields(property).await {
            Ok(fields) if fields.is_empty() => ExtractOutcome::blocked(Blocker::Parse),
            Ok(fields) => {
                let mut outcome = ExtractOutcome::with_results(Vec::new(), fields);
                outcome.status = ExtractStatus::Ok;
                outcome
            }
            Err(PipelineError::NotConfigured(what)) => {
                warn!(what, "assessor skipped");
                ExtractOutcome::blocked(Blocker::None)
            }
            Err(_) => ExtractOutcome::blocked(Blocker::Network),
        }
    }
}

#[async_trait]
impl CountyRecords for AssessorApi {
    async fn lookup(&self, property: &Property) -> Result<BTreeMap<String, Value>> {
        self.fetch_fields(property).await
    }
}
