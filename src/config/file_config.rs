use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub catalog_api_url: Option<String>,
    pub catalog_api_token: Option<String>,
    pub catalog_timeout_sec: Option<u64>,
    pub musicbrainz_user_agent: Option<String>,
    pub read_pool_size: Option<usize>,

    // Feature configs
    pub rate_budget: Option<RateBudgetConfig>,
    pub backfill: Option<BackfillFileConfig>,
    pub cache: Option<CacheConfig>,
    pub candidates: Option<CandidatesConfig>,
    pub stats: Option<StatsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RateBudgetConfig {
    pub capacity: Option<f64>,
    pub refill_per_sec: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackfillFileConfig {
    pub reserve_tokens: Option<f64>,
    pub attempt_ttl_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub memory_ttl_secs: Option<u64>,
    pub memory_max_entries: Option<usize>,
    pub prep_job_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CandidatesConfig {
    pub oversample_factor: Option<usize>,
    pub random_fetch_window: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct StatsConfig {
    /// Allowed drift between `requested - cached` and `from_upstream`.
    pub tolerance: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
