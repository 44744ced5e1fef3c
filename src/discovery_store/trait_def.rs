//! DiscoveryStore trait definition.

use super::models::{
    ArtistProfile, ArtistRelationship, RelationshipEdge, StoreCounts, TrackPatch, TrackRecord,
    TrackWindowQuery,
};
use anyhow::Result;
use std::collections::HashMap;

/// Trait for the persistent store behind the discovery pipeline.
///
/// Every write is additive: upserts never replace a known value with an absent
/// one. Callers treat errors as "this tier produced nothing".
pub trait DiscoveryStore: Send + Sync {
    // =========================================================================
    // Artist Profiles
    // =========================================================================

    /// Get a profiled artist by external id.
    fn get_artist_profile(&self, artist_id: &str) -> Result<Option<ArtistProfile>>;

    /// Get profiles for a set of external ids. Unknown ids are skipped.
    fn get_artist_profiles_by_ids(&self, artist_ids: &[String]) -> Result<Vec<ArtistProfile>>;

    /// Get profiles whose name matches one of `names`, case-insensitively.
    /// The map is keyed by lower-cased name.
    fn get_artist_profiles_by_names(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, ArtistProfile>>;

    /// Random sample of profiled artists.
    fn sample_artist_profiles(&self, limit: usize) -> Result<Vec<ArtistProfile>>;

    /// Most popular profiled artists.
    fn get_popular_artists(&self, limit: usize) -> Result<Vec<ArtistProfile>>;

    /// Profiled artists carrying a genre tag containing `genre`.
    fn search_artists_by_genre(&self, genre: &str, limit: usize) -> Result<Vec<ArtistProfile>>;

    /// Insert or refresh an artist profile.
    fn upsert_artist_profile(&self, profile: &ArtistProfile) -> Result<()>;

    // =========================================================================
    // Tracks
    // =========================================================================

    /// Get a track by external id.
    fn get_track(&self, track_id: &str) -> Result<Option<TrackRecord>>;

    /// Bounded read over all tracks.
    fn fetch_tracks(&self, query: &TrackWindowQuery) -> Result<Vec<TrackRecord>>;

    /// Tracks whose artist name matches one of `names`, case-insensitively,
    /// most popular first.
    fn get_tracks_by_artist_names(&self, names: &[String], limit: usize)
        -> Result<Vec<TrackRecord>>;

    /// Tracks linked to an artist id, most popular first.
    fn get_tracks_by_artist_id(&self, artist_id: &str, limit: usize) -> Result<Vec<TrackRecord>>;

    /// Insert a track, or fill in the fields it is missing.
    fn upsert_track(&self, track: &TrackRecord) -> Result<()>;

    /// Fill missing fields of an existing track. Returns false when the track
    /// does not exist.
    fn apply_track_patch(&self, track_id: &str, patch: &TrackPatch) -> Result<bool>;

    /// Write the "looked up, nothing found" sentinels into the still-missing
    /// metadata fields of a track.
    fn mark_track_metadata_unknown(&self, track_id: &str) -> Result<()>;

    /// Tracks lacking release year or genre.
    fn get_tracks_missing_metadata(&self, limit: usize) -> Result<Vec<TrackRecord>>;

    // =========================================================================
    // Relationship Graph
    // =========================================================================

    /// Edges from `source_artist_id` with `strength >= min_strength`,
    /// strongest first.
    fn get_relationships(
        &self,
        source_artist_id: &str,
        min_strength: f64,
        limit: usize,
    ) -> Result<Vec<ArtistRelationship>>;

    /// Upsert edges keyed by (source, related). Returns the number written.
    fn save_relationships(
        &self,
        source_artist_id: &str,
        source_artist_name: &str,
        edges: &[RelationshipEdge],
    ) -> Result<usize>;

    // =========================================================================
    // Counts
    // =========================================================================

    fn get_counts(&self) -> Result<StoreCounts>;
}
