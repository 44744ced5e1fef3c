mod file_config;

pub use file_config::{
    BackfillFileConfig, CacheConfig, CandidatesConfig, FileConfig, RateBudgetConfig, StatsConfig,
};

use crate::backfill::BackfillConfig;
use crate::candidates::CandidateSourceConfig;
use crate::orchestrator::MemoryCacheConfig;
use crate::upstream::TokenBucketConfig;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CATALOG_API_URL: &str = "https://api.spotify.com/v1";
pub const DEFAULT_MUSICBRAINZ_USER_AGENT: &str =
    "PezzottifyDiscovery/0.1 (https://github.com/lelloman/pezzottify)";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub catalog_api_url: Option<String>,
    pub catalog_api_token: Option<String>,
    pub catalog_timeout_sec: u64,
    pub musicbrainz_user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub catalog_api_url: String,
    pub catalog_api_token: Option<String>,
    pub catalog_timeout_sec: u64,
    pub musicbrainz_user_agent: String,
    pub read_pool_size: usize,

    // Feature configs (with defaults)
    pub rate_budget: RateBudgetSettings,
    pub backfill: BackfillSettings,
    pub cache: CacheSettings,
    pub candidates: CandidateSettings,
    pub stats_tolerance: u64,
}

impl DiscoveryConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let catalog_api_url = file
            .catalog_api_url
            .or_else(|| cli.catalog_api_url.clone())
            .unwrap_or_else(|| DEFAULT_CATALOG_API_URL.to_string());
        let catalog_api_token = file
            .catalog_api_token
            .or_else(|| cli.catalog_api_token.clone());
        let catalog_timeout_sec = file.catalog_timeout_sec.unwrap_or(cli.catalog_timeout_sec);
        let musicbrainz_user_agent = file
            .musicbrainz_user_agent
            .or_else(|| cli.musicbrainz_user_agent.clone())
            .unwrap_or_else(|| DEFAULT_MUSICBRAINZ_USER_AGENT.to_string());
        let read_pool_size = file.read_pool_size.unwrap_or(4);

        let defaults = RateBudgetSettings::default();
        let rb_file = file.rate_budget.unwrap_or_default();
        let rate_budget = RateBudgetSettings {
            capacity: rb_file.capacity.unwrap_or(defaults.capacity),
            refill_per_sec: rb_file.refill_per_sec.unwrap_or(defaults.refill_per_sec),
        };
        if rate_budget.capacity <= 0.0 || rate_budget.refill_per_sec < 0.0 {
            bail!(
                "Invalid rate budget: capacity {} refill {}",
                rate_budget.capacity,
                rate_budget.refill_per_sec
            );
        }

        let defaults = BackfillSettings::default();
        let bf_file = file.backfill.unwrap_or_default();
        let backfill = BackfillSettings {
            reserve_tokens: bf_file.reserve_tokens.unwrap_or(defaults.reserve_tokens),
            attempt_ttl_secs: bf_file.attempt_ttl_secs.unwrap_or(defaults.attempt_ttl_secs),
            sweep_interval_secs: bf_file
                .sweep_interval_secs
                .unwrap_or(defaults.sweep_interval_secs),
        };
        if backfill.sweep_interval_secs == 0 {
            bail!("backfill.sweep_interval_secs must be greater than zero");
        }

        let defaults = CacheSettings::default();
        let cache_file = file.cache.unwrap_or_default();
        let cache = CacheSettings {
            memory_ttl_secs: cache_file.memory_ttl_secs.unwrap_or(defaults.memory_ttl_secs),
            memory_max_entries: cache_file
                .memory_max_entries
                .unwrap_or(defaults.memory_max_entries),
            prep_job_ttl_secs: cache_file
                .prep_job_ttl_secs
                .unwrap_or(defaults.prep_job_ttl_secs),
        };

        let defaults = CandidateSettings::default();
        let cand_file = file.candidates.unwrap_or_default();
        let candidates = CandidateSettings {
            oversample_factor: cand_file
                .oversample_factor
                .unwrap_or(defaults.oversample_factor),
            random_fetch_window: cand_file
                .random_fetch_window
                .unwrap_or(defaults.random_fetch_window),
        };
        if candidates.oversample_factor == 0 {
            bail!("candidates.oversample_factor must be at least 1");
        }

        let stats_tolerance = file
            .stats
            .and_then(|s| s.tolerance)
            .unwrap_or(DEFAULT_STATS_TOLERANCE);

        Ok(Self {
            db_dir,
            catalog_api_url,
            catalog_api_token,
            catalog_timeout_sec,
            musicbrainz_user_agent,
            read_pool_size,
            rate_budget,
            backfill,
            cache,
            candidates,
            stats_tolerance,
        })
    }

    pub fn discovery_db_path(&self) -> PathBuf {
        self.db_dir.join("discovery.db")
    }

    pub fn token_bucket_config(&self) -> TokenBucketConfig {
        TokenBucketConfig {
            capacity: self.rate_budget.capacity,
            refill_per_sec: self.rate_budget.refill_per_sec,
        }
    }

    pub fn backfill_config(&self) -> BackfillConfig {
        BackfillConfig {
            reserve_tokens: self.backfill.reserve_tokens,
            attempt_ttl: Duration::from_secs(self.backfill.attempt_ttl_secs),
            sweep_interval: Duration::from_secs(self.backfill.sweep_interval_secs),
        }
    }

    pub fn memory_cache_config(&self) -> MemoryCacheConfig {
        MemoryCacheConfig {
            ttl: Duration::from_secs(self.cache.memory_ttl_secs),
            max_entries: self.cache.memory_max_entries,
        }
    }

    pub fn prep_job_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.prep_job_ttl_secs)
    }

    pub fn candidate_config(&self) -> CandidateSourceConfig {
        CandidateSourceConfig {
            oversample_factor: self.candidates.oversample_factor,
            random_fetch_window: self.candidates.random_fetch_window,
        }
    }
}

pub const DEFAULT_STATS_TOLERANCE: u64 = 5;

#[derive(Debug, Clone)]
pub struct RateBudgetSettings {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl Default for RateBudgetSettings {
    fn default() -> Self {
        Self {
            capacity: 100.0,
            refill_per_sec: 3.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackfillSettings {
    pub reserve_tokens: f64,
    pub attempt_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            reserve_tokens: 10.0,
            attempt_ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub memory_ttl_secs: u64,
    pub memory_max_entries: usize,
    pub prep_job_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_ttl_secs: 900,
            memory_max_entries: 10_000,
            prep_job_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandidateSettings {
    pub oversample_factor: usize,
    pub random_fetch_window: usize,
}

impl Default for CandidateSettings {
    fn default() -> Self {
        Self {
            oversample_factor: 4,
            random_fetch_window: 200,
        }
    }
}
