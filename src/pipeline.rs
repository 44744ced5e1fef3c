//! Process-wide owner of every pipeline component.
//!
//! Built once at startup and handed around by reference. Nothing in the
//! crate keeps module-level mutable state besides the metrics registry.

use crate::backfill::BackfillService;
use crate::candidates::CandidateSource;
use crate::config::DiscoveryConfig;
use crate::discovery_store::{CandidateTrack, DiscoveryStore, SqliteDiscoveryStore};
use crate::orchestrator::{MemoryCache, TieredLookup};
use crate::prep_jobs::PrepJobCache;
use crate::relationship_graph::ArtistRelationshipGraph;
use crate::stats::{StageReport, StatisticsTracker, StatsMismatch};
use crate::upstream::{
    CatalogClient, HttpCatalogClient, MetadataRegistry, MusicBrainzClient, RateBudget,
    TokenBucket,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Collaborators the pipeline is built around.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<dyn DiscoveryStore>,
    pub catalog: Arc<dyn CatalogClient>,
    pub registry: Arc<dyn MetadataRegistry>,
    pub budget: Arc<dyn RateBudget>,
}

impl PipelineDeps {
    /// Production collaborators: SQLite under `db_dir`, the HTTP catalog and
    /// MusicBrainz, sharing one token bucket.
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self> {
        let db_path = config.discovery_db_path();
        let store: Arc<dyn DiscoveryStore> = Arc::new(
            SqliteDiscoveryStore::new(&db_path, config.read_pool_size)
                .with_context(|| format!("Failed to open discovery store at {:?}", db_path))?,
        );
        let budget: Arc<dyn RateBudget> = Arc::new(TokenBucket::new(config.token_bucket_config()));
        let catalog: Arc<dyn CatalogClient> = Arc::new(HttpCatalogClient::new(
            &config.catalog_api_url,
            config.catalog_api_token.clone(),
            config.catalog_timeout_sec,
            budget.clone(),
        )?);
        let registry: Arc<dyn MetadataRegistry> =
            Arc::new(MusicBrainzClient::new(&config.musicbrainz_user_agent)?);
        Ok(Self {
            store,
            catalog,
            registry,
            budget,
        })
    }
}

pub struct DiscoveryPipeline {
    store: Arc<dyn DiscoveryStore>,
    budget: Arc<dyn RateBudget>,
    tracker: StatisticsTracker,
    graph: Arc<ArtistRelationshipGraph>,
    lookup: TieredLookup,
    candidates: CandidateSource,
    backfill: BackfillService,
    prep_jobs: PrepJobCache<Vec<CandidateTrack>>,
    prep_job_ttl: Duration,
    stats_tolerance: u64,
}

impl DiscoveryPipeline {
    pub fn new(config: &DiscoveryConfig, deps: PipelineDeps) -> Self {
        let tracker = StatisticsTracker::new();
        let backfill = BackfillService::new(
            deps.store.clone(),
            deps.catalog.clone(),
            deps.registry.clone(),
            deps.budget.clone(),
            tracker.clone(),
            config.backfill_config(),
        );
        let graph = Arc::new(ArtistRelationshipGraph::new(
            deps.store.clone(),
            tracker.clone(),
        ));
        let cache = Arc::new(MemoryCache::new(config.memory_cache_config()));
        let lookup = TieredLookup::new(
            deps.store.clone(),
            deps.catalog.clone(),
            graph.clone(),
            cache,
            tracker.clone(),
        )
        .with_backfill(backfill.clone());
        let candidates = CandidateSource::new(
            deps.store.clone(),
            tracker.clone(),
            config.candidate_config(),
        )
        .with_backfill(Arc::new(backfill.clone()));

        info!(
            "Discovery pipeline ready (cache ttl {}s, reserve {} tokens)",
            config.cache.memory_ttl_secs, config.backfill.reserve_tokens
        );

        Self {
            store: deps.store,
            budget: deps.budget,
            tracker,
            graph,
            lookup,
            candidates,
            backfill,
            prep_jobs: PrepJobCache::new(),
            prep_job_ttl: config.prep_job_ttl(),
            stats_tolerance: config.stats_tolerance,
        }
    }

    /// Resolve production collaborators from the config and build on them.
    pub fn open(config: &DiscoveryConfig) -> Result<Self> {
        let deps = PipelineDeps::from_config(config)?;
        Ok(Self::new(config, deps))
    }

    pub fn store(&self) -> &Arc<dyn DiscoveryStore> {
        &self.store
    }

    pub fn budget(&self) -> &Arc<dyn RateBudget> {
        &self.budget
    }

    pub fn tracker(&self) -> &StatisticsTracker {
        &self.tracker
    }

    pub fn graph(&self) -> &ArtistRelationshipGraph {
        &self.graph
    }

    pub fn lookup(&self) -> &TieredLookup {
        &self.lookup
    }

    pub fn candidates(&self) -> &CandidateSource {
        &self.candidates
    }

    pub fn backfill(&self) -> &BackfillService {
        &self.backfill
    }

    pub fn prep_jobs(&self) -> &PrepJobCache<Vec<CandidateTrack>> {
        &self.prep_jobs
    }

    pub fn prep_job_ttl(&self) -> Duration {
        self.prep_job_ttl
    }

    /// Accounting drift beyond the configured tolerance.
    pub fn validate_statistics(&self) -> Vec<StatsMismatch> {
        self.tracker.validate_statistics(self.stats_tolerance)
    }

    /// Snapshot of this pipeline's counters as a mergeable stage report.
    pub fn stage_report(&self) -> StageReport {
        StageReport::from_tracker(&self.tracker)
    }

    /// Start background maintenance. Stops when `cancel` fires.
    pub fn start_background(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.backfill.start_sweeper(cancel)
    }
}
