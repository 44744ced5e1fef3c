//! Memory, then persistent store, then upstream: the lookup cascade for each
//! entity type.

use super::memory_cache::{CacheKind, CachedValue, MemoryCache};
use crate::backfill::BackfillService;
use crate::discovery_store::{
    ArtistProfile, DiscoveryStore, RelationshipEdge, RelationshipType, TrackRecord,
};
use crate::relationship_graph::{genre_similarity_edges, ranked_edges, ArtistRelationshipGraph};
use crate::stats::{metrics, CacheLevel, OperationType, StatisticsTracker};
use crate::tasks::{run_blocking, spawn_detached_blocking};
use crate::upstream::{CatalogClient, UpstreamResult};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Popularity distance accepted by the popularity fallback for related artists.
const RELATED_POPULARITY_WINDOW: i32 = 20;

/// Which tier satisfied a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Memory,
    Database,
    Upstream,
    Miss,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Memory => "memory",
            Tier::Database => "database",
            Tier::Upstream => "upstream",
            Tier::Miss => "miss",
        }
    }
}

/// A lookup result tagged with the tier that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupOutcome<T> {
    pub value: T,
    pub tier: Tier,
}

impl<T> LookupOutcome<T> {
    fn new(value: T, tier: Tier) -> Self {
        Self { value, tier }
    }
}

/// Non-empty check used to decide whether a tier produced a result.
trait Found {
    fn found(&self) -> bool;
}

impl<T> Found for Option<T> {
    fn found(&self) -> bool {
        self.is_some()
    }
}

impl<T> Found for Vec<T> {
    fn found(&self) -> bool {
        !self.is_empty()
    }
}

/// The lookup façade. Every public method enters the cascade once.
pub struct TieredLookup {
    store: Arc<dyn DiscoveryStore>,
    catalog: Arc<dyn CatalogClient>,
    graph: Arc<ArtistRelationshipGraph>,
    cache: Arc<MemoryCache>,
    tracker: StatisticsTracker,
    backfill: Option<BackfillService>,
}

impl TieredLookup {
    pub fn new(
        store: Arc<dyn DiscoveryStore>,
        catalog: Arc<dyn CatalogClient>,
        graph: Arc<ArtistRelationshipGraph>,
        cache: Arc<MemoryCache>,
        tracker: StatisticsTracker,
    ) -> Self {
        Self {
            store,
            catalog,
            graph,
            cache,
            tracker,
            backfill: None,
        }
    }

    pub fn with_backfill(mut self, backfill: BackfillService) -> Self {
        self.backfill = Some(backfill);
        self
    }

    pub fn cache(&self) -> &MemoryCache {
        &self.cache
    }

    // =========================================================================
    // Tier helpers
    // =========================================================================

    fn memory<T>(
        &self,
        op: OperationType,
        kind: CacheKind,
        key: &str,
        extract: impl FnOnce(CachedValue) -> Option<T>,
    ) -> Option<T> {
        let value = self.cache.get(kind, key).and_then(extract)?;
        self.tracker.record_cache_hit(op, CacheLevel::Memory);
        debug!("{} {}: memory hit", op, key);
        Some(value)
    }

    /// Read the store tier on the blocking pool. Errors count as "nothing
    /// here".
    async fn stored<T, F>(
        &self,
        op: OperationType,
        level: CacheLevel,
        key: &str,
        label: &str,
        read: F,
    ) -> Option<T>
    where
        T: Found + Send + 'static,
        F: FnOnce(&dyn DiscoveryStore) -> anyhow::Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        let start = Instant::now();
        let result = run_blocking(move || read(store.as_ref())).await;
        self.tracker
            .record_db_query(label, start.elapsed().as_millis() as u64);
        match result {
            Ok(value) if value.found() => {
                self.tracker.record_cache_hit(op, level);
                debug!("{} {}: {} hit", op, key, level.as_str());
                Some(value)
            }
            Ok(_) => None,
            Err(err) => {
                warn!("{} {}: store read {} failed: {:#}", op, key, label, err);
                None
            }
        }
    }

    /// Call upstream and time it. Errors count as "nothing here"; this does
    /// not record the terminating hit.
    async fn call_upstream<T: Found, F>(&self, op: OperationType, key: &str, call: F) -> Option<T>
    where
        F: Future<Output = UpstreamResult<T>>,
    {
        let start = Instant::now();
        let result = call.await;
        self.tracker
            .record_api_call(op, start.elapsed().as_millis() as u64);
        match result {
            Ok(value) if value.found() => Some(value),
            Ok(_) => None,
            Err(err) => {
                warn!("{} {}: upstream failed: {}", op, key, err);
                None
            }
        }
    }

    fn upstream_hit(&self, op: OperationType, key: &str) {
        self.tracker.record_from_upstream(op, 1);
        debug!("{} {}: upstream hit", op, key);
    }

    fn miss<T>(&self, op: OperationType, key: &str, empty: T) -> LookupOutcome<T> {
        metrics::record_lookup_outcome(op, Tier::Miss.as_str());
        debug!("{} {}: miss on every tier", op, key);
        LookupOutcome::new(empty, Tier::Miss)
    }

    fn write_back_profiles(&self, profiles: Vec<ArtistProfile>) {
        if profiles.is_empty() {
            return;
        }
        let store = self.store.clone();
        spawn_detached_blocking("write_back_profiles", move || {
            for profile in &profiles {
                store.upsert_artist_profile(profile)?;
            }
            Ok(())
        });
    }

    fn write_back_tracks(&self, tracks: Vec<TrackRecord>) {
        let store = self.store.clone();
        spawn_detached_blocking("write_back_tracks", move || {
            for track in &tracks {
                store.upsert_track(track)?;
            }
            Ok(())
        });
    }

    /// Stored profile for `artist_id`, if any. Errors read as absent.
    async fn stored_profile(&self, artist_id: &str) -> Option<ArtistProfile> {
        let store = self.store.clone();
        let id = artist_id.to_string();
        match run_blocking(move || store.get_artist_profile(&id)).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!("Profile read for artist {} failed: {:#}", artist_id, err);
                None
            }
        }
    }

    fn observe_tracks(&self, tracks: &[TrackRecord]) {
        if let Some(backfill) = &self.backfill {
            for track in tracks.iter().filter(|t| t.needs_metadata()) {
                backfill.schedule_track_backfill(track);
            }
        }
    }

    fn observe_profile(&self, profile: &ArtistProfile) {
        if let Some(backfill) = &self.backfill {
            if !profile.has_genres() {
                backfill.schedule_artist_backfill(&profile.artist_id);
            }
        }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub async fn get_artist_profile(&self, artist_id: &str) -> LookupOutcome<Option<ArtistProfile>> {
        let op = OperationType::ArtistProfile;
        let kind = CacheKind::ArtistProfile;
        self.tracker.record_request(op);

        if let Some(profile) = self.memory(op, kind, artist_id, |v| match v {
            CachedValue::Artist(p) => Some(p),
            _ => None,
        }) {
            return LookupOutcome::new(Some(profile), Tier::Memory);
        }

        let id = artist_id.to_string();
        if let Some(Some(profile)) = self
            .stored(op, CacheLevel::Database, artist_id, "get_artist_profile", move |s| {
                s.get_artist_profile(&id)
            })
            .await
        {
            self.cache.put(kind, artist_id, CachedValue::Artist(profile.clone()));
            self.observe_profile(&profile);
            return LookupOutcome::new(Some(profile), Tier::Database);
        }

        if let Some(Some(profile)) = self
            .call_upstream(op, artist_id, self.catalog.get_artist(artist_id))
            .await
        {
            self.upstream_hit(op, artist_id);
            self.cache.put(kind, artist_id, CachedValue::Artist(profile.clone()));
            self.write_back_profiles(vec![profile.clone()]);
            return LookupOutcome::new(Some(profile), Tier::Upstream);
        }

        self.miss(op, artist_id, None)
    }

    pub async fn get_track(&self, track_id: &str) -> LookupOutcome<Option<TrackRecord>> {
        let op = OperationType::Track;
        let kind = CacheKind::Track;
        self.tracker.record_request(op);

        if let Some(track) = self.memory(op, kind, track_id, |v| match v {
            CachedValue::Track(t) => Some(t),
            _ => None,
        }) {
            return LookupOutcome::new(Some(track), Tier::Memory);
        }

        let id = track_id.to_string();
        if let Some(Some(track)) = self
            .stored(op, CacheLevel::Database, track_id, "get_track", move |s| s.get_track(&id))
            .await
        {
            self.cache.put(kind, track_id, CachedValue::Track(track.clone()));
            self.observe_tracks(std::slice::from_ref(&track));
            return LookupOutcome::new(Some(track), Tier::Database);
        }

        if let Some(Some(track)) = self
            .call_upstream(op, track_id, self.catalog.get_track(track_id))
            .await
        {
            self.upstream_hit(op, track_id);
            self.cache.put(kind, track_id, CachedValue::Track(track.clone()));
            self.write_back_tracks(vec![track.clone()]);
            return LookupOutcome::new(Some(track), Tier::Upstream);
        }

        self.miss(op, track_id, None)
    }

    pub async fn get_artist_top_tracks(
        &self,
        artist_id: &str,
        limit: usize,
    ) -> LookupOutcome<Vec<TrackRecord>> {
        let op = OperationType::TopTracks;
        let kind = CacheKind::TopTracks;
        let key = format!("{}:{}", artist_id, limit);
        self.tracker.record_request(op);

        if let Some(tracks) = self.memory(op, kind, &key, |v| match v {
            CachedValue::Tracks(t) => Some(t),
            _ => None,
        }) {
            return LookupOutcome::new(tracks, Tier::Memory);
        }

        let id = artist_id.to_string();
        if let Some(tracks) = self
            .stored(op, CacheLevel::Database, &key, "get_tracks_by_artist_id", move |s| {
                s.get_tracks_by_artist_id(&id, limit)
            })
            .await
        {
            self.cache.put(kind, &key, CachedValue::Tracks(tracks.clone()));
            self.observe_tracks(&tracks);
            return LookupOutcome::new(tracks, Tier::Database);
        }

        if let Some(mut tracks) = self
            .call_upstream(op, &key, self.catalog.get_artist_top_tracks(artist_id))
            .await
        {
            tracks.truncate(limit);
            self.upstream_hit(op, &key);
            self.cache.put(kind, &key, CachedValue::Tracks(tracks.clone()));
            self.write_back_tracks(tracks.clone());
            return LookupOutcome::new(tracks, Tier::Upstream);
        }

        self.miss(op, &key, Vec::new())
    }

    /// Related artists. The relationship graph is the store tier; on a graph
    /// miss the upstream related-artists answer is used, then genre and
    /// popularity searches, and whatever was found is saved to the graph.
    pub async fn get_related_artists(
        &self,
        artist_id: &str,
        min_strength: f64,
        limit: usize,
    ) -> LookupOutcome<Vec<RelationshipEdge>> {
        let op = OperationType::RelatedArtists;
        let kind = CacheKind::RelatedArtists;
        let key = format!("{}:{}:{}", artist_id, min_strength, limit);
        self.tracker.record_request(op);

        if let Some(edges) = self.memory(op, kind, &key, |v| match v {
            CachedValue::Edges(e) => Some(e),
            _ => None,
        }) {
            return LookupOutcome::new(edges, Tier::Memory);
        }

        let graph = self.graph.clone();
        let id = artist_id.to_string();
        if let Some(edges) = self
            .stored(op, CacheLevel::Graph, &key, "graph_get", move |_| {
                graph.get(&id, min_strength, limit)
            })
            .await
        {
            let edges: Vec<RelationshipEdge> = edges
                .into_iter()
                .map(|e| RelationshipEdge {
                    related_artist_id: e.related_artist_id,
                    related_artist_name: e.related_artist_name,
                    strength: e.strength,
                    relationship_type: e.relationship_type,
                })
                .collect();
            self.cache.put(kind, &key, CachedValue::Edges(edges.clone()));
            return LookupOutcome::new(edges, Tier::Database);
        }

        let (edges, discovered) = self.discover_related(artist_id).await;
        self.write_back_profiles(discovered);
        if edges.is_empty() {
            return self.miss(op, &key, Vec::new());
        }
        self.upstream_hit(op, &key);

        let source_name = self
            .stored_profile(artist_id)
            .await
            .map(|p| p.name)
            .unwrap_or_default();
        let graph = self.graph.clone();
        let source_id = artist_id.to_string();
        let to_save = edges.clone();
        spawn_detached_blocking("write_back_graph", move || {
            graph.save(&source_id, &source_name, &to_save)?;
            Ok(())
        });

        let mut edges: Vec<RelationshipEdge> = edges
            .into_iter()
            .filter(|e| e.strength >= min_strength)
            .collect();
        edges.truncate(limit);
        self.cache.put(kind, &key, CachedValue::Edges(edges.clone()));
        LookupOutcome::new(edges, Tier::Upstream)
    }

    /// The slower discovery path behind a graph miss. Returns the edges and
    /// every upstream artist profile met along the way, edges or not.
    async fn discover_related(&self, artist_id: &str) -> (Vec<RelationshipEdge>, Vec<ArtistProfile>) {
        let op = OperationType::RelatedArtists;

        if let Some(related) = self
            .call_upstream(op, artist_id, self.catalog.get_related_artists(artist_id))
            .await
        {
            return (ranked_edges(&related, RelationshipType::Related), related);
        }

        let mut met: Vec<ArtistProfile> = Vec::new();
        let target = match self.stored_profile(artist_id).await {
            Some(profile) => Some(profile),
            None => {
                let fetched = self
                    .call_upstream(OperationType::ArtistProfile, artist_id, self.catalog.get_artist(artist_id))
                    .await
                    .flatten();
                met.extend(fetched.clone());
                fetched
            }
        };
        let Some(target) = target else {
            return (Vec::new(), met);
        };

        if let Some(genre) = target.normalized_genres().into_iter().next() {
            if let Some(found) = self
                .call_upstream(
                    OperationType::Search,
                    &genre,
                    self.catalog.search_artists_by_genre(&genre, 50),
                )
                .await
            {
                let edges = genre_similarity_edges(&target, &found);
                met.extend(found);
                if !edges.is_empty() {
                    return (edges, met);
                }
            }
        }

        if let Some(popular) = self
            .call_upstream(OperationType::Search, "popular", self.catalog.get_popular_artists(50))
            .await
        {
            let mut edges: Vec<RelationshipEdge> = popular
                .iter()
                .filter(|a| a.artist_id != target.artist_id)
                .filter_map(|a| {
                    let distance = (a.popularity as i32 - target.popularity as i32).abs();
                    (distance <= RELATED_POPULARITY_WINDOW).then(|| RelationshipEdge {
                        related_artist_id: a.artist_id.clone(),
                        related_artist_name: a.name.clone(),
                        strength: 1.0 - distance as f64 / (2 * RELATED_POPULARITY_WINDOW) as f64,
                        relationship_type: RelationshipType::PopularitySimilar,
                    })
                })
                .collect();
            edges.sort_by(|a, b| b.strength.total_cmp(&a.strength));
            met.extend(popular);
            return (edges, met);
        }

        (Vec::new(), met)
    }

    pub async fn get_popular_artists(&self, limit: usize) -> LookupOutcome<Vec<ArtistProfile>> {
        let op = OperationType::Search;
        let kind = CacheKind::PopularArtists;
        let key = limit.to_string();
        self.tracker.record_request(op);

        if let Some(artists) = self.memory(op, kind, &key, |v| match v {
            CachedValue::Artists(a) => Some(a),
            _ => None,
        }) {
            return LookupOutcome::new(artists, Tier::Memory);
        }

        if let Some(artists) = self
            .stored(op, CacheLevel::Database, &key, "get_popular_artists", move |s| {
                s.get_popular_artists(limit)
            })
            .await
        {
            self.cache.put(kind, &key, CachedValue::Artists(artists.clone()));
            return LookupOutcome::new(artists, Tier::Database);
        }

        if let Some(artists) = self
            .call_upstream(op, &key, self.catalog.get_popular_artists(limit))
            .await
        {
            self.upstream_hit(op, &key);
            self.cache.put(kind, &key, CachedValue::Artists(artists.clone()));
            self.write_back_profiles(artists.clone());
            return LookupOutcome::new(artists, Tier::Upstream);
        }

        self.miss(op, &key, Vec::new())
    }

    pub async fn search_artists_by_genre(
        &self,
        genre: &str,
        limit: usize,
    ) -> LookupOutcome<Vec<ArtistProfile>> {
        let op = OperationType::Search;
        let kind = CacheKind::GenreSearch;
        let genre = genre.trim().to_lowercase();
        let key = format!("{}:{}", genre, limit);
        self.tracker.record_request(op);

        if genre.is_empty() {
            return self.miss(op, &key, Vec::new());
        }

        if let Some(artists) = self.memory(op, kind, &key, |v| match v {
            CachedValue::Artists(a) => Some(a),
            _ => None,
        }) {
            return LookupOutcome::new(artists, Tier::Memory);
        }

        let needle = genre.clone();
        if let Some(artists) = self
            .stored(op, CacheLevel::Database, &key, "search_artists_by_genre", move |s| {
                s.search_artists_by_genre(&needle, limit)
            })
            .await
        {
            self.cache.put(kind, &key, CachedValue::Artists(artists.clone()));
            return LookupOutcome::new(artists, Tier::Database);
        }

        if let Some(artists) = self
            .call_upstream(op, &key, self.catalog.search_artists_by_genre(&genre, limit))
            .await
        {
            self.upstream_hit(op, &key);
            self.cache.put(kind, &key, CachedValue::Artists(artists.clone()));
            self.write_back_profiles(artists.clone());
            return LookupOutcome::new(artists, Tier::Upstream);
        }

        self.miss(op, &key, Vec::new())
    }
}
