//! End-to-end tests for the tiered lookup cascade and its accounting

mod common;

use common::*;
use pezzottify_discovery::stats::{merge_reports, OperationType, ScoringSummary};
use pezzottify_discovery::Tier;

#[tokio::test]
async fn test_artist_lookup_walks_the_tiers_in_order() {
    let env = TestPipeline::new();
    let lookup = env.pipeline.lookup();

    // Seeded store answers first, then memory.
    let first = lookup.get_artist_profile("artist-2").await;
    assert_eq!(first.tier, Tier::Database);
    assert_eq!(first.value.as_ref().unwrap().name, "Artist 2");
    let second = lookup.get_artist_profile("artist-2").await;
    assert_eq!(second.tier, Tier::Memory);
    assert_eq!(second.value, first.value);
    assert_eq!(env.catalog.calls(), 0);

    // Unknown locally: upstream, then memory.
    let mut upstream = artist_profile(42);
    upstream.artist_id = UPSTREAM_ARTIST_ID.to_string();
    upstream.name = UPSTREAM_ARTIST_NAME.to_string();
    env.catalog.add_artist(upstream.clone());

    let third = lookup.get_artist_profile(UPSTREAM_ARTIST_ID).await;
    assert_eq!(third.tier, Tier::Upstream);
    assert_eq!(third.value, Some(upstream.clone()));
    let fourth = lookup.get_artist_profile(UPSTREAM_ARTIST_ID).await;
    assert_eq!(fourth.tier, Tier::Memory);
    assert_eq!(env.catalog.calls(), 1);

    // The write-back lands in the store eventually.
    settle().await;
    assert_eq!(
        env.store.get_artist_profile(UPSTREAM_ARTIST_ID).unwrap(),
        Some(upstream)
    );
}

#[tokio::test]
async fn test_upstream_failure_is_a_miss_not_an_error() {
    let env = TestPipeline::new();
    env.catalog.set_failing(true);

    let outcome = env.pipeline.lookup().get_track(UPSTREAM_TRACK_ID).await;
    assert_eq!(outcome.tier, Tier::Miss);
    assert!(outcome.value.is_none());

    let top = env
        .pipeline
        .lookup()
        .get_artist_top_tracks("nobody", 5)
        .await;
    assert_eq!(top.tier, Tier::Miss);
    assert!(top.value.is_empty());
}

#[tokio::test]
async fn test_upstream_track_is_written_back() {
    let env = TestPipeline::new();
    let track = complete_track(UPSTREAM_TRACK_ID, UPSTREAM_ARTIST_NAME, "shoegaze", 64);
    env.catalog.add_track(track.clone());

    let outcome = env.pipeline.lookup().get_track(UPSTREAM_TRACK_ID).await;
    assert_eq!(outcome.tier, Tier::Upstream);
    settle().await;

    assert_eq!(env.store.get_track(UPSTREAM_TRACK_ID).unwrap(), Some(track));
}

#[tokio::test]
async fn test_every_lookup_is_counted_once() {
    let env = TestPipeline::new();
    let lookup = env.pipeline.lookup();
    env.catalog.add_artist(artist_profile(77));
    env.catalog.set_popular(vec![artist_profile(77)]);

    lookup.get_artist_profile("artist-1").await; // database
    lookup.get_artist_profile("artist-1").await; // memory
    lookup.get_artist_profile("artist-77").await; // upstream
    lookup.get_artist_top_tracks("artist-1", 3).await; // database
    lookup.search_artists_by_genre("jazz", 5).await; // database
    lookup.search_artists_by_genre("jazz", 5).await; // memory

    let stats = env.pipeline.tracker().get_statistics();
    let artists = stats.operations.get(OperationType::ArtistProfile);
    assert_eq!(artists.requested, 3);
    assert_eq!(artists.cached, 2);
    assert_eq!(artists.from_upstream, 1);
    assert_eq!(artists.api_calls, 1);
    let search = stats.operations.get(OperationType::Search);
    assert_eq!(search.requested, 2);
    assert_eq!(search.cached, 2);

    assert_eq!(stats.total_requests, 6);
    assert_eq!(stats.total_cache_hits, 5);
    assert!(stats.cache_hit_rate <= 1.0);
    assert_eq!(stats.total_api_calls, 1);
    assert!(env.pipeline.validate_statistics().is_empty());
}

#[tokio::test]
async fn test_stage_reports_merge_with_identity() {
    let env = TestPipeline::new();
    env.pipeline.lookup().get_artist_profile("artist-3").await;

    let report = env.pipeline.stage_report();
    assert_eq!(merge_reports(Some(report.clone()), None), Some(report.clone()));
    assert_eq!(merge_reports(None, Some(report.clone())), Some(report.clone()));
    assert_eq!(merge_reports(None, None), None);

    let scored = env.pipeline.stage_report().with_scoring(ScoringSummary {
        target_artist_id: Some("artist-3".to_string()),
        strategy: "closer".to_string(),
        candidates_scored: 12,
        top_score: 1.5,
    });
    let merged = merge_reports(Some(scored), Some(report.clone())).unwrap();
    // Snapshot fields fall back to the earlier stage, counters add up.
    assert_eq!(merged.scoring.0.as_ref().unwrap().candidates_scored, 12);
    let artists = merged.statistics();
    assert_eq!(
        artists.operations.get(OperationType::ArtistProfile).requested,
        2
    );

    // Re-merging re-sums: not idempotent for accumulating fields.
    let twice = merge_reports(Some(merged.clone()), Some(merged.clone())).unwrap();
    assert_eq!(
        twice
            .statistics()
            .operations
            .get(OperationType::ArtistProfile)
            .requested,
        4
    );
}
