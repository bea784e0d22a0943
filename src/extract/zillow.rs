//! Zillow listing extractor. Fields and the photo gallery come from the
//! `__NEXT_DATA__` state blob; gallery thumbnails are rewritten to the
//! full-resolution asset before download, so the thumbnail itself is never
//! fetched.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::extract::client::StealthClient;
use crate::extract::rate::RateLimiter;
use crate::extract::{
    collect_strings, embedded_json, find_object_with, Blocker, ExtractOutcome, SourceExtractor,
};
use crate::model::{Property, SourceTier};

pub const SOURCE: &str = "zillow";

const NEXT_DATA_MARKER: &str = r#"id="__NEXT_DATA__" type="application/json">"#;

pub struct ZillowExtractor {
    client: Arc<StealthClient>,
    limiter: RateLimiter,
}

impl ZillowExtractor {
    pub fn new(client: Arc<StealthClient>, limiter: RateLimiter) -> Self {
        ZillowExtractor { client, limiter }
    }

    fn search_url(property: &Property) -> String {
        let slug = property
            .full_address
            .to_lowercase()
            .replace([',', '.'], "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-");
        format!("https://www.zillow.com/homes/{slug}_rb/")
    }
}

/// Rewrites a gallery thumbnail to the full-resolution asset. The photo id
/// in the path is monotonically assigned, so only the size suffix changes.
fn full_resolution_url(url: &str) -> String {
    match url.rfind("-cc_ft_") {
        Some(pos) => format!("{}-uncropped_scaled_within_1536_1152.jpg", &url[..pos]),
        None => url.to_string(),
    }
}

fn parse_page(html: &str) -> Option<(BTreeMap<String, Value>, Vec<String>)> {
    let state = embedded_json(html, NEXT_DATA_MARKER)?;
    let home = find_object_with(&state, "homeInfo")
        .map(|obj| &obj["homeInfo"])
        .or_else(|| find_object_with(&state, "bedrooms"))?;

    let mut fields = BTreeMap::new();
    let mut put = |name: &str, value: Option<Value>| {
        if let Some(value) = value {
            fields.insert(name.to_string(), value);
        }
    };
    put("price", home.get("price").cloned().filter(Value::is_number));
    put("beds", home.get("bedrooms").cloned().filter(Value::is_number));
    put("baths", home.get("bathrooms").cloned().filter(Value::is_number));
    put("sqft", home.get("livingArea").cloned().filter(Value::is_number));
    put(
        "hoa_fee",
        home.get("monthlyHoaFee").cloned().filter(Value::is_number),
    );
    put(
        "description",
        home.get("description").cloned().filter(Value::is_string),
    );
    if let (Some(lot), Some(unit)) = (
        home.get("lotAreaValue").and_then(Value::as_f64),
        home.get("lotAreaUnit").and_then(Value::as_str),
    ) {
        let sqft = if unit.eq_ignore_ascii_case("acres") {
            lot * 43_560.0
        } else {
            lot
        };
        fields.insert("lot_sqft".to_string(), serde_json::json!(sqft));
    }

    let mut thumbs = Vec::new();
    collect_strings(
        &state,
        &|s| s.contains("photos.zillowstatic.com") && s.ends_with(".jpg"),
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
impl SourceExtractor for ZillowExtractor {
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
        let url = Self::search_url(property);
        let html = match self.client.get_text(&url, None).await {
            Ok(html) => html,
            Err(failure) => return ExtractOutcome::blocked(failure.blocker()),
        };
        let Some((fields, photo_urls)) = parse_page(&html) else {
            debug!(address = %property.full_address, "no parsable listing state");
            return ExtractOutcome::blocked(Blocker::Parse);
        };
        let images = Arc::clone(&self.client)
            .fetch_images(photo_urls, Some(url))
            .await;
        ExtractOutcome::with_results(images, fields)
    }
}
