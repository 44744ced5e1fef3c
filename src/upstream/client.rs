//! Contracts for the external services the pipeline consumes.

use crate::discovery_store::{ArtistProfile, TrackRecord};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by upstream calls. The orchestrator treats all of them as
/// "this tier produced nothing".
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("not found")]
    NotFound,
}

impl UpstreamError {
    pub fn is_quota(&self) -> bool {
        matches!(self, UpstreamError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            UpstreamError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            UpstreamError::Status(status.as_u16())
        } else {
            UpstreamError::Network(e.to_string())
        }
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// The rate-limited music catalog service.
///
/// Every call may consume one unit of the shared rate budget.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn get_artist(&self, artist_id: &str) -> UpstreamResult<Option<ArtistProfile>>;

    async fn get_track(&self, track_id: &str) -> UpstreamResult<Option<TrackRecord>>;

    async fn get_artist_top_tracks(&self, artist_id: &str) -> UpstreamResult<Vec<TrackRecord>>;

    async fn get_related_artists(&self, artist_id: &str) -> UpstreamResult<Vec<ArtistProfile>>;

    async fn get_popular_artists(&self, limit: usize) -> UpstreamResult<Vec<ArtistProfile>>;

    async fn search_artists_by_genre(
        &self,
        genre: &str,
        limit: usize,
    ) -> UpstreamResult<Vec<ArtistProfile>>;
}

/// What the open metadata registry knows about a recording.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryRecording {
    /// Earliest known release date, `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
    pub first_release_date: Option<String>,
    /// Tags, most voted first.
    pub tags: Vec<String>,
}

/// Secondary open metadata registry. Absence of data is `Ok(None)`.
#[async_trait]
pub trait MetadataRegistry: Send + Sync {
    async fn lookup_recording(
        &self,
        artist_name: &str,
        track_name: &str,
    ) -> anyhow::Result<Option<RegistryRecording>>;
}

/// Extract the year from a `YYYY[-MM[-DD]]` date.
pub fn parse_release_year(date: &str) -> Option<i32> {
    let year: i32 = date.get(0..4)?.parse().ok()?;
    (year > 0).then_some(year)
}
