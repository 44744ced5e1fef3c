//! Pezzottify Discovery Library
//!
//! Tiered candidate sourcing and caching for the discovery game: lookups
//! cascade from process memory to the SQLite store to the upstream catalog,
//! candidate strategies read only the local store, and missing metadata is
//! backfilled in the background under a shared rate budget.

pub mod backfill;
pub mod candidates;
pub mod config;
pub mod discovery_store;
pub mod orchestrator;
pub mod pipeline;
pub mod prep_jobs;
pub mod relationship_graph;
pub mod sqlite_persistence;
pub mod stats;
pub mod tasks;
pub mod upstream;

// Re-export commonly used types for convenience
pub use config::{CliConfig, DiscoveryConfig, FileConfig};
pub use discovery_store::{DiscoveryStore, SqliteDiscoveryStore};
pub use orchestrator::{LookupOutcome, Tier, TieredLookup};
pub use pipeline::{DiscoveryPipeline, PipelineDeps};
pub use stats::{StatisticsTracker, StageReport};
