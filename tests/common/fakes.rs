//! Hand-written collaborators that count the calls made to them

use async_trait::async_trait;
use pezzottify_discovery::discovery_store::{ArtistProfile, TrackRecord};
use pezzottify_discovery::upstream::{
    CatalogClient, MetadataRegistry, RateBudget, RateBudgetStatus, RegistryRecording,
    UpstreamError, UpstreamResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory upstream catalog.
#[derive(Default)]
pub struct FakeCatalog {
    artists: Mutex<HashMap<String, ArtistProfile>>,
    tracks: Mutex<HashMap<String, TrackRecord>>,
    top_tracks: Mutex<HashMap<String, Vec<TrackRecord>>>,
    related: Mutex<HashMap<String, Vec<ArtistProfile>>>,
    popular: Mutex<Vec<ArtistProfile>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_artist(&self, profile: ArtistProfile) {
        self.artists
            .lock()
            .unwrap()
            .insert(profile.artist_id.clone(), profile);
    }

    pub fn add_track(&self, track: TrackRecord) {
        self.tracks
            .lock()
            .unwrap()
            .insert(track.track_id.clone(), track);
    }

    pub fn set_top_tracks(&self, artist_id: &str, tracks: Vec<TrackRecord>) {
        self.top_tracks
            .lock()
            .unwrap()
            .insert(artist_id.to_string(), tracks);
    }

    pub fn set_related(&self, artist_id: &str, related: Vec<ArtistProfile>) {
        self.related
            .lock()
            .unwrap()
            .insert(artist_id.to_string(), related);
    }

    pub fn set_popular(&self, artists: Vec<ArtistProfile>) {
        *self.popular.lock().unwrap() = artists;
    }

    /// Every call fails with a network error while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> UpstreamResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError::Network("catalog unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn get_artist(&self, artist_id: &str) -> UpstreamResult<Option<ArtistProfile>> {
        self.enter()?;
        Ok(self.artists.lock().unwrap().get(artist_id).cloned())
    }

    async fn get_track(&self, track_id: &str) -> UpstreamResult<Option<TrackRecord>> {
        self.enter()?;
        Ok(self.tracks.lock().unwrap().get(track_id).cloned())
    }

    async fn get_artist_top_tracks(&self, artist_id: &str) -> UpstreamResult<Vec<TrackRecord>> {
        self.enter()?;
        Ok(self
            .top_tracks
            .lock()
            .unwrap()
            .get(artist_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_related_artists(&self, artist_id: &str) -> UpstreamResult<Vec<ArtistProfile>> {
        self.enter()?;
        Ok(self
            .related
            .lock()
            .unwrap()
            .get(artist_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_popular_artists(&self, limit: usize) -> UpstreamResult<Vec<ArtistProfile>> {
        self.enter()?;
        Ok(self.popular.lock().unwrap().iter().take(limit).cloned().collect())
    }

    async fn search_artists_by_genre(
        &self,
        genre: &str,
        limit: usize,
    ) -> UpstreamResult<Vec<ArtistProfile>> {
        self.enter()?;
        let genre = genre.to_lowercase();
        Ok(self
            .artists
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.genres.iter().any(|g| g.to_lowercase().contains(&genre)))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// In-memory metadata registry keyed by lower-cased (artist, title).
#[derive(Default)]
pub struct FakeRegistry {
    recordings: Mutex<HashMap<(String, String), RegistryRecording>>,
    calls: AtomicUsize,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_recording(&self, artist: &str, title: &str, date: Option<&str>, tags: &[&str]) {
        self.recordings.lock().unwrap().insert(
            (artist.to_lowercase(), title.to_lowercase()),
            RegistryRecording {
                first_release_date: date.map(str::to_string),
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataRegistry for FakeRegistry {
    async fn lookup_recording(
        &self,
        artist_name: &str,
        track_name: &str,
    ) -> anyhow::Result<Option<RegistryRecording>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .recordings
            .lock()
            .unwrap()
            .get(&(artist_name.to_lowercase(), track_name.to_lowercase()))
            .cloned())
    }
}

/// Budget whose remaining tokens are set by the test.
pub struct FixedBudget {
    remaining: Mutex<f64>,
}

impl FixedBudget {
    pub fn new(remaining: f64) -> Self {
        Self {
            remaining: Mutex::new(remaining),
        }
    }

    pub fn set_remaining(&self, remaining: f64) {
        *self.remaining.lock().unwrap() = remaining;
    }
}

impl RateBudget for FixedBudget {
    fn status(&self) -> RateBudgetStatus {
        RateBudgetStatus {
            remaining: *self.remaining.lock().unwrap(),
            capacity: 100.0,
            refill_per_sec: 0.0,
        }
    }

    fn try_acquire(&self) -> bool {
        let mut remaining = self.remaining.lock().unwrap();
        if *remaining >= 1.0 {
            *remaining -= 1.0;
            true
        } else {
            false
        }
    }
}
