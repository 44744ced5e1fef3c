//! Local-store candidate strategies.
//!
//! Every strategy reads only the persistent store and only surfaces tracks
//! whose artist has a profile row (except the absolute fallback). Exclusions
//! are applied by the store before its row limit; each strategy then
//! over-fetches and may still return fewer candidates than asked for,
//! including none. Store failures are logged and yield an empty result.

mod fallback;
mod genre;
mod proximity;
mod random;

pub use genre::PopularityRange;

use crate::backfill::BackfillService;
use crate::discovery_store::{
    ArtistProfile, CandidateTrack, DiscoveryStore, TrackRecord, TrackWindowQuery,
};
use crate::stats::StatisticsTracker;
use crate::tasks::run_blocking;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Tuning for the candidate strategies.
#[derive(Debug, Clone)]
pub struct CandidateSourceConfig {
    /// How many rows to read per wanted result before filtering.
    pub oversample_factor: usize,
    /// Minimum size of the random window read by the random strategy.
    pub random_fetch_window: usize,
}

impl Default for CandidateSourceConfig {
    fn default() -> Self {
        Self {
            oversample_factor: 4,
            random_fetch_window: 200,
        }
    }
}

/// What the caller wants from a strategy.
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    /// Target number of distinct artists.
    pub needed_artists: usize,
    /// Tracks kept per artist.
    pub tracks_per_artist: usize,
    /// Artists already in the pool, matched case-insensitively.
    pub existing_artist_names: HashSet<String>,
    pub exclude_track_ids: HashSet<String>,
}

impl CandidateQuery {
    pub fn new(needed_artists: usize) -> Self {
        Self {
            needed_artists,
            tracks_per_artist: 1,
            existing_artist_names: HashSet::new(),
            exclude_track_ids: HashSet::new(),
        }
    }

    pub fn tracks_per_artist(mut self, n: usize) -> Self {
        self.tracks_per_artist = n.max(1);
        self
    }

    pub fn existing_artists<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.existing_artist_names = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_lowercase())
            .collect();
        self
    }

    pub fn exclude_tracks<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_track_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    fn is_existing(&self, lower_name: &str) -> bool {
        self.existing_artist_names.contains(lower_name)
    }

    /// A random store window that already leaves out excluded tracks and,
    /// with `skip_existing`, artists already in the pool.
    fn window(&self, limit: usize, skip_existing: bool) -> TrackWindowQuery {
        let exclude_artist_names = if skip_existing {
            self.existing_artist_names.iter().cloned().collect()
        } else {
            Vec::new()
        };
        TrackWindowQuery {
            exclude_track_ids: self.exclude_track_ids.iter().cloned().collect(),
            exclude_artist_names,
            ..TrackWindowQuery::random(limit)
        }
    }
}

/// Rows dropped while assembling candidates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rejections {
    pub excluded: usize,
    pub existing: usize,
    pub unprofiled: usize,
    pub malformed: usize,
}

/// Runs the local-store strategies against one store.
pub struct CandidateSource {
    store: Arc<dyn DiscoveryStore>,
    tracker: StatisticsTracker,
    config: CandidateSourceConfig,
    backfill: Option<Arc<BackfillService>>,
}

impl CandidateSource {
    pub fn new(
        store: Arc<dyn DiscoveryStore>,
        tracker: StatisticsTracker,
        config: CandidateSourceConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            config,
            backfill: None,
        }
    }

    /// Schedule metadata backfill for candidates seen with missing fields.
    pub fn with_backfill(mut self, backfill: Arc<BackfillService>) -> Self {
        self.backfill = Some(backfill);
        self
    }

    fn oversample(&self, wanted: usize) -> usize {
        wanted.max(1) * self.config.oversample_factor.max(1)
    }

    /// Time a store read on the blocking pool and turn failures into an
    /// empty result.
    async fn read<T, F>(&self, label: &str, f: F) -> T
    where
        T: Default + Send + 'static,
        F: FnOnce(&dyn DiscoveryStore) -> anyhow::Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        let start = Instant::now();
        let result = run_blocking(move || f(store.as_ref())).await;
        self.tracker
            .record_db_query(label, start.elapsed().as_millis() as u64);
        match result {
            Ok(value) => value,
            Err(err) => {
                warn!("Candidate store read {} failed: {:#}", label, err);
                T::default()
            }
        }
    }

    /// Profiles for the artists credited on `tracks`, keyed by lower-cased name.
    async fn profiles_for(&self, tracks: &[TrackRecord]) -> HashMap<String, ArtistProfile> {
        let mut names: Vec<String> = tracks
            .iter()
            .map(|t| t.artist_name.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        names.sort();
        names.dedup();
        if names.is_empty() {
            return HashMap::new();
        }
        self.read("candidates_profiles_by_names", move |s| {
            s.get_artist_profiles_by_names(&names)
        })
        .await
    }

    /// Walk `tracks` in order, keeping at most `per_artist` tracks for each of
    /// at most `query.needed_artists` profiled artists.
    fn assemble(
        &self,
        strategy: &str,
        tracks: Vec<TrackRecord>,
        profiles: &HashMap<String, ArtistProfile>,
        query: &CandidateQuery,
        per_artist: usize,
        skip_existing: bool,
    ) -> Vec<CandidateTrack> {
        let mut rejections = Rejections::default();
        let mut per_artist_count: HashMap<String, usize> = HashMap::new();
        let mut out = Vec::new();

        for track in tracks {
            if query.exclude_track_ids.contains(&track.track_id) {
                rejections.excluded += 1;
                continue;
            }
            let lower = track.artist_name.trim().to_lowercase();
            if lower.is_empty() || track.track_id.is_empty() {
                rejections.malformed += 1;
                continue;
            }
            if skip_existing && query.is_existing(&lower) {
                rejections.existing += 1;
                continue;
            }
            let Some(profile) = profiles.get(&lower) else {
                rejections.unprofiled += 1;
                continue;
            };

            let count = per_artist_count.get(&profile.artist_id).copied();
            match count {
                Some(n) if n >= per_artist => continue,
                None if per_artist_count.len() >= query.needed_artists => continue,
                _ => {}
            }
            *per_artist_count.entry(profile.artist_id.clone()).or_insert(0) += 1;

            self.observe(&track);
            out.push(CandidateTrack {
                artist_id: profile.artist_id.clone(),
                artist_name: profile.name.clone(),
                track,
            });
        }

        debug!(
            "Strategy {}: {} candidates from {} artists ({:?})",
            strategy,
            out.len(),
            per_artist_count.len(),
            rejections
        );
        out
    }

    /// Fire-and-forget enrichment for a track missing metadata.
    fn observe(&self, track: &TrackRecord) {
        if let Some(backfill) = &self.backfill {
            if track.needs_metadata() || track.needs_details() {
                backfill.schedule_track_backfill(track);
            }
        }
    }
}

/// Lower-cased, trimmed, non-empty genre tags.
fn lower_genres(genres: &[String]) -> Vec<String> {
    genres
        .iter()
        .map(|g| g.trim().to_lowercase())
        .filter(|g| !g.is_empty())
        .collect()
}
