//! Data models for the discovery database.

use serde::{Deserialize, Serialize};

/// Genre written on a track when every enrichment source came back empty.
pub const UNKNOWN_GENRE: &str = "Unknown";

/// Release year written on a track when no source knew the date.
pub const UNKNOWN_RELEASE_YEAR: i32 = 0;

/// An image reference as returned by the upstream catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// A profiled artist.
///
/// Identity is immutable; popularity and genres are refreshed whenever a newer
/// upstream answer arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistProfile {
    pub artist_id: String,
    pub name: String,
    pub genres: Vec<String>,
    /// 0..=100
    pub popularity: u8,
    pub followers: Option<u64>,
    pub images: Vec<ImageRef>,
}

impl ArtistProfile {
    pub fn has_genres(&self) -> bool {
        self.genres.iter().any(|g| !g.trim().is_empty())
    }

    /// Lower-cased genre tags with blanks removed.
    pub fn normalized_genres(&self) -> Vec<String> {
        normalize_genres(&self.genres)
    }
}

/// A track as stored in the discovery database.
///
/// Optional fields are backfilled over time. A present value is never replaced
/// by an absent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub track_id: String,
    pub name: String,
    pub artist_name: String,
    pub artist_id: Option<String>,
    pub album_name: Option<String>,
    pub duration_ms: Option<u32>,
    pub popularity: Option<u8>,
    pub external_url: Option<String>,
    pub genre: Option<String>,
    pub release_year: Option<i32>,
}

impl TrackRecord {
    pub fn new(track_id: &str, name: &str, artist_name: &str) -> Self {
        Self {
            track_id: track_id.to_string(),
            name: name.to_string(),
            artist_name: artist_name.to_string(),
            artist_id: None,
            album_name: None,
            duration_ms: None,
            popularity: None,
            external_url: None,
            genre: None,
            release_year: None,
        }
    }

    /// True when release year or genre still have to be looked up.
    pub fn needs_metadata(&self) -> bool {
        self.release_year.is_none() || self.genre.as_deref().map_or(true, str::is_empty)
    }

    /// True when catalog-sourced details are missing.
    pub fn needs_details(&self) -> bool {
        self.popularity.is_none() || self.duration_ms.is_none() || self.external_url.is_none()
    }
}

/// A partial update for a track. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackPatch {
    pub album_name: Option<String>,
    pub duration_ms: Option<u32>,
    pub popularity: Option<u8>,
    pub external_url: Option<String>,
    pub genre: Option<String>,
    pub release_year: Option<i32>,
}

impl TrackPatch {
    pub fn is_empty(&self) -> bool {
        *self == TrackPatch::default()
    }
}

/// Directed artist-to-artist edge held by the relationship graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistRelationship {
    pub source_artist_id: String,
    pub related_artist_id: String,
    pub related_artist_name: String,
    /// 0.0..=1.0
    pub strength: f64,
    pub relationship_type: RelationshipType,
    pub cached_at: i64,
}

/// How an edge was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// Reported by the upstream related-artists endpoint.
    Related,
    /// Inferred from shared genre tags.
    GenreSimilar,
    /// Inferred from a popularity-based search.
    PopularitySimilar,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Related => "related",
            RelationshipType::GenreSimilar => "genre_similar",
            RelationshipType::PopularitySimilar => "popularity_similar",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "related" => Some(RelationshipType::Related),
            "genre_similar" => Some(RelationshipType::GenreSimilar),
            "popularity_similar" => Some(RelationshipType::PopularitySimilar),
            _ => None,
        }
    }
}

/// An edge to be written by `save`; the source is given separately.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipEdge {
    pub related_artist_id: String,
    pub related_artist_name: String,
    pub strength: f64,
    pub relationship_type: RelationshipType,
}

/// A track proposed for the game pool together with its resolved artist.
/// Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateTrack {
    pub track: TrackRecord,
    pub artist_id: String,
    pub artist_name: String,
}

/// Ordering applied to a bounded track window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOrder {
    Random,
    PopularityDesc,
}

/// Bounded read over the tracks table.
#[derive(Debug, Clone)]
pub struct TrackWindowQuery {
    pub limit: usize,
    pub order: TrackOrder,
    pub min_popularity: Option<u8>,
    pub max_popularity: Option<u8>,
    pub require_genre: bool,
    /// Lower-cased genre terms. A track qualifies when its genre contains a
    /// term or one of its words, or is contained in a term.
    pub genres: Vec<String>,
    /// Only tracks credited to an artist with a profile row.
    pub profiled_only: bool,
    pub exclude_track_ids: Vec<String>,
    /// Lower-cased artist names to leave out.
    pub exclude_artist_names: Vec<String>,
}

impl TrackWindowQuery {
    pub fn random(limit: usize) -> Self {
        Self {
            limit,
            order: TrackOrder::Random,
            min_popularity: None,
            max_popularity: None,
            require_genre: false,
            genres: Vec::new(),
            profiled_only: false,
            exclude_track_ids: Vec::new(),
            exclude_artist_names: Vec::new(),
        }
    }

    pub fn most_popular(limit: usize) -> Self {
        Self {
            order: TrackOrder::PopularityDesc,
            ..Self::random(limit)
        }
    }
}

/// Row counts, for inspection and metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub artist_profiles: usize,
    pub tracks: usize,
    pub relationships: usize,
}

pub(crate) fn normalize_genres(genres: &[String]) -> Vec<String> {
    genres
        .iter()
        .map(|g| g.trim().to_lowercase())
        .filter(|g| !g.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_needs_metadata_until_year_and_genre_known() {
        let mut track = TrackRecord::new("t1", "Song", "Band");
        assert!(track.needs_metadata());

        track.release_year = Some(1994);
        assert!(track.needs_metadata());

        track.genre = Some(String::new());
        assert!(track.needs_metadata());

        track.genre = Some("grunge".to_string());
        assert!(!track.needs_metadata());
    }

    #[test]
    fn sentinel_values_count_as_known() {
        let mut track = TrackRecord::new("t1", "Song", "Band");
        track.release_year = Some(UNKNOWN_RELEASE_YEAR);
        track.genre = Some(UNKNOWN_GENRE.to_string());
        assert!(!track.needs_metadata());
    }

    #[test]
    fn relationship_type_round_trips_through_str() {
        for t in [
            RelationshipType::Related,
            RelationshipType::GenreSimilar,
            RelationshipType::PopularitySimilar,
        ] {
            assert_eq!(RelationshipType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(RelationshipType::from_str("bogus"), None);
    }

    #[test]
    fn normalized_genres_drop_blanks() {
        let profile = ArtistProfile {
            artist_id: "a".into(),
            name: "A".into(),
            genres: vec![" Rock ".into(), "".into(), "Indie Pop".into()],
            popularity: 10,
            followers: None,
            images: vec![],
        };
        assert_eq!(profile.normalized_genres(), vec!["rock", "indie pop"]);
        assert!(profile.has_genres());
    }
}
