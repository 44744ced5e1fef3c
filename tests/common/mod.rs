//! Common test infrastructure
//!
//! Seeded SQLite stores, counting fakes for the external services, and a
//! pipeline wired to both. Tests should only import from this module.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestPipeline, UPSTREAM_TRACK_ID};
//!
//! #[tokio::test]
//! async fn test_track_lookup() {
//!     let env = TestPipeline::new();
//!     let outcome = env.pipeline.lookup().get_track(UPSTREAM_TRACK_ID).await;
//!     assert!(outcome.value.is_none());
//! }
//! ```
#![allow(dead_code)]

mod constants;
mod fakes;
mod fixtures;

pub use constants::*;
pub use fakes::{FakeCatalog, FakeRegistry, FixedBudget};
pub use fixtures::{
    artist_profile, complete_track, profiled_artist_names, seed_store, seeded_store, test_config,
    TestPipeline,
};

/// Let detached write-backs and backfills run to completion.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}
