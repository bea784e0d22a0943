//! Public-records extractor: label/value scrape of the county records
//! aggregator page. This is where the sewer hint comes from, which the
//! kill-switch cares about more than anything a listing says.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::extract::client::StealthClient;
use crate::extract::rate::RateLimiter;
use crate::extract::{percent_encode, Blocker, ExtractOutcome, SourceExtractor};
use crate::model::{Property, SourceTier};

pub const SOURCE: &str = "records";

pub struct RecordsExtractor {
    client: Arc<StealthClient>,
    limiter: RateLimiter,
}

impl RecordsExtractor {
    pub fn new(client: Arc<StealthClient>, limiter: RateLimiter) -> Self {
        RecordsExtractor { client, limiter }
    }

    fn search_url(property: &Property) -> String {
        format!(
            "https://www.countyoffice.org/property-records-search/?q={}",
            percent_encode(&property.full_address)
        )
    }
}

/// Visible text following a label, with tags skipped. Stops at the first
/// non-empty run of text.
fn text_after_label(html: &str, label: &str) -> Option<String> {
    let idx = html.find(label)? + label.len();
    let mut out = String::new();
    let mut in_tag = false;
    for c in html[idx..].chars().take(400) {
        match c {
            '<' => {
                if !out
                    .trim_matches(|c: char| c == ':' || c.is_whitespace())
                    .is_empty()
                {
                    break;
                }
                in_tag = true;
            }
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    let text = out
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_start_matches([':', ' '])
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}

/// Leading number of a value like `9,148 sq ft` or `0.21 acres`, converted
/// to square feet when the unit is acres.
fn parse_area(text: &str) -> Option<f64> {
    let token: String = text
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .filter(|c| *c != ',')
        .collect();
    let value: f64 = token.parse().ok()?;
    if text.to_lowercase().contains("acre") {
        Some(value * 43_560.0)
    } else {
        Some(value)
    }
}

fn parse_sewer(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    if lower.contains("septic") {
        Some("septic")
    } else if lower.contains("city")
        || lower.contains("public")
        || lower.contains("municipal")
        || lower.contains("sewer")
    {
        Some("city")
    } else {
        None
    }
}

fn parse_page(html: &str) -> BTreeMap<String, Value> {
    let mut fields = BTreeMap::new();
    if let Some(sewer) = text_after_label(html, "Sewer").as_deref().and_then(parse_sewer) {
        fields.insert("sewer_type".to_string(), serde_json::json!(sewer));
    }
    if let Some(lot) = text_after_label(html, "Lot Size").as_deref().and_then(parse_area) {
        fields.insert("lot_sqft".to_string(), serde_json::json!(lot));
    }
    if let Some(year) = text_after_label(html, "Year Built")
        .and_then(|text| text.chars().take(4).collect::<String>().parse::<i32>().ok())
    {
        fields.insert("year_built".to_string(), serde_json::json!(year));
    }
    fields
}

#[async_trait]
impl SourceExtractor for RecordsExtractor {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn tier(&self) -> SourceTier {
        SourceTier::County
    }

    fn confidence(&self) -> f64 {
        0.8
    }

    async fn extract(&self, property: &Property) -> ExtractOutcome {
        if let Err(blocker) = self.limiter.throttle().await {
            return ExtractOutcome::blocked(blocker);
        }
        let url = Self::search_url(property);
        let html = match self.client.get_text(&url, None).await {
            Ok(html) => html,
            Err(failure) => return ExtractOutcome::blocked(failure.blocker()),
        };
        let fields = parse_page(&html);
        if fields.is_empty() {
            return ExtractOutcome::blocked(Blocker::Parse);
        }
        ExtractOutcome::with_results(Vec::new(), fields)
    }
}
