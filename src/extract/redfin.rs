//! Redfin listing extractor. The stingray autocomplete endpoint resolves
//! the address to a listing path (responses carry the `{}&&` anti-JSON
//! prefix); the listing page's server state provides fields and the photo
//! gallery.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::extract::client::StealthClient;
use crate::extract::rate::RateLimiter;
use crate::extract::{
    collect_strings, embedded_json, find_object_with, percent_encode, Blocker, ExtractOutcome,
    SourceExtractor,
};
use crate::model::{Property, SourceTier};

pub const SOURCE: &str = "redfin";

const STATE_MARKER: &str = "root.__reactServerState.InitialContext";

pub struct RedfinExtractor {
    client: Arc<StealthClient>,
    limiter: RateLimiter,
}

impl RedfinExtractor {
    pub fn new(client: Arc<StealthClient>, limiter: RateLimiter) -> Self {
        RedfinExtractor { client, limiter }
    }

    fn autocomplete_url(property: &Property) -> String {
        format!(
            "https://www.redfin.com/stingray/do/location-autocomplete?location={}&v=2",
            percent_encode(&property.full_address)
        )
    }
}

/// Stingray responses are prefixed with `{}&&` to defeat naive JSON
/// hijacking; the payload follows.
fn strip_jsonp(body: &str) -> Option<Value> {
    let json = body.strip_prefix("{}&&").unwrap_or(body);
    serde_json::from_str(json).ok()
}

fn listing_path(payload: &Value) -> Option<String> {
    let row = find_object_with(payload, "url")?;
    let path = row["url"].as_str()?;
    path.starts_with('/').then(|| path.to_string())
}

/// Full-size photo assets live under `bigphoto`; the gallery serves
/// `islphoto` thumbnails of the same id.
fn full_resolution_url(url: &str) -> String {
    url.replace("/islphoto/", "/bigphoto/")
}

fn num(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::Object(map) => map.get("value").filter(|v| v.is_number()).cloned(),
        _ => None,
    }
}

fn parse_page(html: &str) -> Option<(BTreeMap<String, Value>, Vec<String>)> {
    let state = embedded_json(html, STATE_MARKER)?;
    let home = find_object_with(&state, "beds")?;

    let mut fields = BTreeMap::new();
    for (ours, theirs) in [
        ("price", "price"),
        ("beds", "beds"),
        ("baths", "baths"),
        ("sqft", "sqFt"),
        ("hoa_fee", "hoaDues"),
        ("year_built", "yearBuilt"),
        ("lot_sqft", "lotSize"),
    ] {
        if let Some(value) = home.get(theirs).and_then(|v| num(v)) {
            fields.insert(ours.to_string(), value);
        }
    }
    if let Some(remarks) = find_object_with(&state, "marketingRemarks") {
        if let Some(text) = remarks["marketingRemarks"]
            .as_array()
            .and_then(|items| items.first())
            .and_then(|item| item["marketingRemark"].as_str())
        {
            fields.insert("description".to_string(), serde_json::json!(text));
        }
    }

    let mut thumbs = Vec::new();
    collect_strings(
        &state,
        &|s| s.contains("ssl.cdn-redfin.com/photo") && s.ends_with(".jpg"),
        &mut thumbs,
    );
    let mut seen = std::collections::HashSet::new();
    let photos: Vec<String> = thumbs
        .iter()
        .map(|thumb| full_resolution_url(thumb))
        .filter(|url| seen.insert(url.clone()))
        .collect();

    Some((fields, photos))
}

#[async_trait]
impl SourceExtractor for RedfinExtractor {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn tier(&self) -> SourceTier {
        SourceTier::Listing
    }

    async fn extract(&self, property: &Property) -> ExtractOutcome {
        if let Err(blocker) = self.limiter.throttle().await {
            return ExtractOutcome::blocked(blocker);
        }
        let autocomplete = Self::autocomplete_url(property);
        let body = match self.client.get_text(&autocomplete, None).await {
            Ok(body) => body,
            Err(failure) => return ExtractOutcome::blocked(failure.blocker()),
        };
        let Some(path) = strip_jsonp(&body).as_ref().and_then(listing_path) else {
            debug!(address = %property.full_address, "address not resolvable on redfin");
            return ExtractOutcome::blocked(Blocker::NotFound);
        };

        if let Err(blocker) = self.limiter.throttle().await {
            return ExtractOutcome::blocked(blocker);
        }
        let listing_url = format!("https://www.redfin.com{path}");
        let html = match self
            .client
            .get_text(&listing_url, Some(autocomplete.as_str()))
            .await
        {
            Ok(html) => html,
            Err(failure) => return ExtractOutcome::blocked(failure.blocker()),
        };
        let Some((fields, photo_urls)) = parse_page(&html) else {
            return ExtractOutcome::blocked(Blocker::Parse);
        };
        let images = Arc::clone(&self.client)
            .fetch_images(photo_urls, Some(listing_url))
            .await;
        ExtractOutcome::with_results(images, fields)
    }
}
