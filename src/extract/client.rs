//! Shared stealth HTTP client: realistic browser headers, optional proxy,
//! per-request timeout, blocker classification, and the bounded-fanout
//! image downloader.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy, StatusCode};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::extract::{Blocker, FetchedImage};

/// Substrings that identify a bot-challenge interstitial in a 403 body.
const CHALLENGE_MARKERS: &[&str] = &[
    "px-captcha",
    "perimeterx",
    "_incapsula_",
    "challenge-platform",
    "datadome",
    "are you a human",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    Blocked(Blocker),
    Network(String),
}

impl FetchFailure {
    pub fn blocker(&self) -> Blocker {
        match self {
            FetchFailure::Blocked(blocker) => *blocker,
            FetchFailure::Network(_) => Blocker::Network,
        }
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchFailure>;

pub struct StealthClient {
    inner: Client,
    download_fanout: usize,
}

impl StealthClient {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent)
            .unwrap_or(HeaderValue::from_static("Mozilla/5.0")));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(
            "sec-ch-ua",
            HeaderValue::from_static(
                "\"Not/A)Brand\";v=\"8\", \"Chromium\";v=\"126\", \"Google Chrome\";v=\"126\"",
            ),
        );
        headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
        headers.insert("sec-ch-ua-platform", HeaderValue::from_static("\"Windows\""));
        headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
        headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .redirect(Policy::limited(5))
            .gzip(true);
        if let Some(proxy) = &config.proxy_url {
            builder = builder.proxy(Proxy::all(proxy)?);
        }
        Ok(StealthClient {
            inner: builder.build()?,
            download_fanout: config.downloads_per_source,
        })
    }

    async fn get(
        &self,
        url: &str,
        referer: Option<&str>,
        extra: &[(&str, &str)],
    ) -> FetchResult<reqwest::Response> {
        let mut request = self.inner.get(url);
        if let Some(referer) = referer {
            request = request.header("referer", referer);
        }
        for (name, value) in extra {
            request = request.header(*name, *value);
        }
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                FetchFailure::Network(format!("timeout: {url}"))
            } else {
                FetchFailure::Network(err.to_string())
            }
        })?;
        classify(response).await
    }

    pub async fn get_text(&self, url: &str, referer: Option<&str>) -> FetchResult<String> {
        let response = self.get(url, referer, &[]).await?;
        response
            .text()
            .await
            .map_err(|err| FetchFailure::Network(err.to_string()))
    }

    pub async fn get_text_with(
        &self,
        url: &str,
        referer: Option<&str>,
        extra: &[(&str, &str)],
    ) -> FetchResult<String> {
        let response = self.get(url, referer, extra).await?;
        response
            .text()
            .await
            .map_err(|err| FetchFailure::Network(err.to_string()))
    }

    pub async fn get_bytes(&self, url: &str, referer: Option<&str>) -> FetchResult<Vec<u8>> {
        let response = self.get(url, referer, &[]).await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|err| FetchFailure::Network(err.to_string()))
    }

    /// Downloads image URLs with a bounded fanout. Each download gets one
    /// retry; an image that fails twice is dropped as lost.
    pub async fn fetch_images(
        self: Arc<Self>,
        urls: Vec<String>,
        referer: Option<String>,
    ) -> Vec<FetchedImage> {
        let semaphore = Arc::new(Semaphore::new(self.download_fanout.max(1)));
        let mut handles = Vec::with_capacity(urls.len());
        for url in urls {
            let client = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let referer = referer.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.ok()?;
                for attempt in 0..2 {
                    match client.get_bytes(&url, referer.as_deref()).await {
                        Ok(bytes) => return Some(FetchedImage { url, bytes }),
                        Err(failure) if attempt == 0 => {
                            debug!(%url, ?failure, "image download failed, retrying");
                        }
                        Err(failure) => {
                            warn!(%url, ?failure, "image lost after retry");
                        }
                    }
                }
                None
            }));
        }
        let mut images = Vec::new();
        for handle in handles {
            if let Ok(Some(image)) = handle.await {
                images.push(image);
            }
        }
        images
    }
}

async fn classify(response: reqwest::Response) -> FetchResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::FORBIDDEN => {
            let body = response.text().await.unwrap_or_default().to_lowercase();
            if CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker)) {
                Err(FetchFailure::Blocked(Blocker::Captcha))
            } else {
                Err(FetchFailure::Network("403 without challenge".to_string()))
            }
        }
        StatusCode::TOO_MANY_REQUESTS => Err(FetchFailure::Blocked(Blocker::RateLimited)),
        StatusCode::NOT_FOUND => Err(FetchFailure::Blocked(Blocker::NotFound)),
        _ => Err(FetchFailure::Network(format!("status {status}"))),
    }
}
