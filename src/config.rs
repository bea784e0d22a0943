//! Pipeline configuration: defaults, optional TOML file, environment
//! overrides. CLI flags are applied on top by the binary.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Per-source request budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateBudget {
    pub requests_per_second: f64,
    pub daily_cap: u32,
}

/// Assumptions for the monthly carrying-cost model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostAssumptions {
    /// Annual mortgage rate, e.g. 0.0675.
    pub annual_rate: f64,
    /// Down payment as a fraction of price.
    pub down_payment_pct: f64,
    /// Annual property tax as a fraction of assessed value.
    pub tax_rate: f64,
    pub insurance_monthly: f64,
    pub utilities_monthly: f64,
}

impl Default for CostAssumptions {
    fn default() -> Self {
        Self {
            annual_rate: 0.0675,
            down_payment_pct: 0.20,
            tax_rate: 0.0066,
            insurance_monthly: 145.0,
            utilities_monthly: 280.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root for state files (work items, enrichment, hash index, lineage).
    pub data_dir: PathBuf,
    /// Root for per-property image folders.
    pub images_dir: PathBuf,
    /// Root for per-property report files.
    pub reports_dir: PathBuf,

    /// Properties processed concurrently.
    pub concurrency: usize,
    /// Concurrent image downloads within one source.
    pub downloads_per_source: usize,
    pub lock_expiry: Duration,
    pub request_timeout: Duration,

    pub circuit_failure_threshold: u32,
    pub circuit_cooldown: Duration,
    pub session_idle_reset: Duration,

    /// Hamming distance at or below which two perceptual hashes are the
    /// same image.
    pub hamming_threshold: u32,
    pub lsh_bands: usize,
    pub max_image_dim: u32,

    /// Whether an unknown HOA fee passes the hard criterion. The strict
    /// default treats unknown as failing.
    pub hoa_unknown_passes: bool,

    pub assessor_token: Option<String>,
    pub proxy_url: Option<String>,
    pub user_agent: String,
    pub rate_budgets: BTreeMap<String, RateBudget>,
    pub cost: CostAssumptions,
}

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

fn default_rate_budgets() -> BTreeMap<String, RateBudget> {
    let mut budgets = BTreeMap::new();
    budgets.insert(
        "zillow".to_string(),
        RateBudget { requests_per_second: 0.5, daily_cap: 200 },
    );
    budgets.insert(
        "redfin".to_string(),
        RateBudget { requests_per_second: 0.5, daily_cap: 200 },
    );
    budgets.insert(
        "records".to_string(),
        RateBudget { requests_per_second: 1.0, daily_cap: 500 },
    );
    budgets.insert(
        "assessor".to_string(),
        RateBudget { requests_per_second: 2.0, daily_cap: 1000 },
    );
    budgets
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("casita");
        Self {
            data_dir: base.join("state"),
            images_dir: base.join("processed"),
            reports_dir: base.join("reports"),
            concurrency: 3,
            downloads_per_source: 4,
            lock_expiry: Duration::from_secs(30 * 60),
            request_timeout: Duration::from_secs(30),
            circuit_failure_threshold: 3,
            circuit_cooldown: Duration::from_secs(30 * 60),
            session_idle_reset: Duration::from_secs(30 * 60),
            hamming_threshold: 8,
            lsh_bands: 8,
            max_image_dim: 1024,
            hoa_unknown_passes: false,
            assessor_token: None,
            proxy_url: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rate_budgets: default_rate_budgets(),
            cost: CostAssumptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads the optional TOML config file, then applies environment
    /// overrides. `explicit` wins over the default location
    /// (`<config dir>/casita/config.toml`).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| dirs::config_dir().map(|base| base.join("casita").join("config.toml")));
        if let Some(path) = path {
            if path.exists() {
                let raw: RawConfig = toml::from_str(&fs::read_to_string(&path)?)
                    .map_err(|e| PipelineError::InvalidArgument(format!(
                        "config {}: {e}",
                        path.display()
                    )))?;
                raw.apply(&mut config);
            }
        }
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(token) = env::var("ASSESSOR_API_TOKEN") {
            if !token.is_empty() {
                self.assessor_token = Some(token);
            }
        }
        for key in ["CASITA_PROXY", "HTTPS_PROXY", "HTTP_PROXY"] {
            if let Ok(proxy) = env::var(key) {
                if !proxy.is_empty() {
                    self.proxy_url = Some(proxy);
                    break;
                }
            }
        }
        if let Ok(dir) = env::var("CASITA_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("CASITA_IMAGES_DIR") {
            self.images_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("CASITA_REPORTS_DIR") {
            self.reports_dir = PathBuf::from(dir);
        }
        if let Ok(n) = env::var("CASITA_CONCURRENCY") {
            if let Ok(n) = n.parse::<usize>() {
                self.concurrency = n.max(1);
            }
        }
    }

    pub fn work_items_path(&self) -> PathBuf {
        self.data_dir.join("work_items.json")
    }

    pub fn enrichment_path(&self) -> PathBuf {
        self.data_dir.join("enrichment.json")
    }

    pub fn hash_index_path(&self) -> PathBuf {
        self.data_dir.join("hash_index.json")
    }

    pub fn folders_path(&self) -> PathBuf {
        self.data_dir.join("address_folders.json")
    }

    pub fn conflicts_path(&self) -> PathBuf {
        self.data_dir.join("conflicts.jsonl")
    }

    pub fn lineage_path(&self) -> PathBuf {
        self.data_dir.join("lineage.json")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.data_dir.join("manifests")
    }

    pub fn rate_budget(&self, source: &str) -> RateBudget {
        self.rate_budgets
            .get(source)
            .copied()
            .unwrap_or(RateBudget { requests_per_second: 0.5, daily_cap: 200 })
    }
}

/// TOML overlay; every field optional so the file can set only what it
/// cares about.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    data_dir: Option<PathBuf>,
    images_dir: Option<PathBuf>,
    reports_dir: Option<PathBuf>,
    concurrency: Option<usize>,
    downloads_per_source: Option<usize>,
    lock_expiry_minutes: Option<u64>,
    request_timeout_secs: Option<u64>,
    circuit_failure_threshold: Option<u32>,
    circuit_cooldown_minutes: Option<u64>,
    hamming_threshold: Option<u32>,
    lsh_bands: Option<usize>,
    max_image_dim: Option<u32>,
    hoa_unknown_passes: Option<bool>,
    user_agent: Option<String>,
    proxy_url: Option<String>,
    rate_budgets: Option<BTreeMap<String, RateBudget>>,
    cost: Option<CostAssumptions>,
}

impl RawConfig {
    fn apply(self, config: &mut PipelineConfig) {
        if let Some(v) = self.data_dir {
            config.data_dir = v;
        }
        if let Some(v) = self.images_dir {
            config.images_dir = v;
        }
        if let Some(v) = self.reports_dir {
            config.reports_dir = v;
        }
        if let Some(v) = self.concurrency {
            config.concurrency = v.max(1);
        }
        if let Some(v) = self.downloads_per_source {
            config.downloads_per_source = v.max(1);
        }
        if let Some(v) = self.lock_expiry_minutes {
            config.lock_expiry = Duration::from_secs(v * 60);
        }
        if let Some(v) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.circuit_failure_threshold {
            config.circuit_failure_threshold = v;
        }
        if let Some(v) = self.circuit_cooldown_minutes {
            config.circuit_cooldown = Duration::from_secs(v * 60);
        }
        if let Some(v) = self.hamming_threshold {
            config.hamming_threshold = v;
        }
        if let Some(v) = self.lsh_bands {
            config.lsh_bands = v;
        }
        if let Some(v) = self.max_image_dim {
            config.max_image_dim = v;
        }
        if let Some(v) = self.hoa_unknown_passes {
            config.hoa_unknown_passes = v;
        }
        if let Some(v) = self.user_agent {
            config.user_agent = v;
        }
        if let Some(v) = self.proxy_url {
            config.proxy_url = Some(v);
        }
        if let Some(v) = self.rate_budgets {
            config.rate_budgets.extend(v);
        }
        if let Some(v) = self.cost {
            config.cost = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overlay_only_touches_named_fields() {
        let raw: RawConfig = toml::from_str(
            r#"
            concurrency = 5
            hamming_threshold = 6
            [rate_budgets.zillow]
            requests_per_second = 0.25
            daily_cap = 50
            "#,
        )
        .unwrap();
        let mut config = PipelineConfig::default();
        raw.apply(&mut config);
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.hamming_threshold, 6);
        assert_eq!(config.rate_budget("zillow").daily_cap, 50);
        // Untouched fields keep their defaults.
        assert_eq!(config.lsh_bands, 8);
        assert_eq!(config.rate_budget("redfin").daily_cap, 200);
    }
}
