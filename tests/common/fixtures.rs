//! Seeded stores and pipelines wired to the fakes

use super::constants::*;
use super::fakes::{FakeCatalog, FakeRegistry, FixedBudget};
use pezzottify_discovery::config::{CliConfig, DiscoveryConfig};
use pezzottify_discovery::discovery_store::{
    ArtistProfile, DiscoveryStore, SqliteDiscoveryStore, TrackRecord,
};
use pezzottify_discovery::{DiscoveryPipeline, PipelineDeps};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

pub fn artist_profile(i: usize) -> ArtistProfile {
    ArtistProfile {
        artist_id: format!("artist-{}", i),
        name: format!("Artist {}", i),
        genres: ARTIST_GENRES[i % ARTIST_GENRES.len()]
            .iter()
            .map(|g| g.to_string())
            .collect(),
        popularity: (i * 10).min(100) as u8,
        followers: Some(1000 * i as u64),
        images: vec![],
    }
}

/// A fully described track: nothing left to backfill.
pub fn complete_track(id: &str, artist: &str, genre: &str, popularity: u8) -> TrackRecord {
    let mut track = TrackRecord::new(id, &format!("Song {}", id), artist);
    track.album_name = Some(format!("Album of {}", artist));
    track.duration_ms = Some(200_000);
    track.popularity = Some(popularity);
    track.external_url = Some(format!("https://open.example/track/{}", id));
    track.genre = Some(genre.to_string());
    track.release_year = Some(2000);
    track
}

pub fn profiled_artist_names() -> HashSet<String> {
    (0..PROFILED_ARTIST_COUNT)
        .map(|i| format!("Artist {}", i))
        .collect()
}

/// Profiled artists with their tracks, plus unprofiled artists whose tracks
/// are the most popular in the store.
pub fn seed_store(store: &dyn DiscoveryStore) {
    for i in 0..PROFILED_ARTIST_COUNT {
        let profile = artist_profile(i);
        store.upsert_artist_profile(&profile).unwrap();
        for j in 0..TRACKS_PER_ARTIST {
            let mut track = complete_track(
                &format!("t{}-{}", i, j),
                &profile.name,
                &profile.genres[0],
                (i * 10 + j) as u8,
            );
            track.artist_id = Some(profile.artist_id.clone());
            store.upsert_track(&track).unwrap();
        }
    }
    for ghost in UNPROFILED_ARTISTS {
        for j in 0..TRACKS_PER_ARTIST {
            let id = format!("{}-{}", ghost.replace(' ', "").to_lowercase(), j);
            store
                .upsert_track(&complete_track(&id, ghost, "rock", UNPROFILED_POPULARITY))
                .unwrap();
        }
    }
}

pub fn seeded_store() -> (TempDir, Arc<dyn DiscoveryStore>) {
    let dir = TempDir::new().unwrap();
    let store = SqliteDiscoveryStore::new(dir.path().join("discovery.db"), 2).unwrap();
    seed_store(&store);
    (dir, Arc::new(store))
}

pub fn test_config(dir: &TempDir) -> DiscoveryConfig {
    let cli = CliConfig {
        db_dir: Some(dir.path().to_path_buf()),
        catalog_timeout_sec: 5,
        ..Default::default()
    };
    DiscoveryConfig::resolve(&cli, None).unwrap()
}

/// A pipeline over a seeded SQLite store and counting fakes.
pub struct TestPipeline {
    pub pipeline: DiscoveryPipeline,
    pub store: Arc<dyn DiscoveryStore>,
    pub catalog: Arc<FakeCatalog>,
    pub registry: Arc<FakeRegistry>,
    pub budget: Arc<FixedBudget>,
    _dir: TempDir,
}

impl TestPipeline {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store: Arc<dyn DiscoveryStore> = Arc::new(
            SqliteDiscoveryStore::new(config.discovery_db_path(), 2).unwrap(),
        );
        seed_store(store.as_ref());

        let catalog = Arc::new(FakeCatalog::new());
        let registry = Arc::new(FakeRegistry::new());
        let budget = Arc::new(FixedBudget::new(100.0));
        let deps = PipelineDeps {
            store: store.clone(),
            catalog: catalog.clone(),
            registry: registry.clone(),
            budget: budget.clone(),
        };
        let pipeline = DiscoveryPipeline::new(&config, deps);

        Self {
            pipeline,
            store,
            catalog,
            registry,
            budget,
            _dir: dir,
        }
    }

    /// Total calls made to both external services.
    pub fn network_calls(&self) -> usize {
        self.catalog.calls() + self.registry.calls()
    }
}
