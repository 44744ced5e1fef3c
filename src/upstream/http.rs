//! reqwest implementation of [`CatalogClient`] for a Spotify Web API shaped
//! catalog service.

use super::client::{parse_release_year, CatalogClient, UpstreamError, UpstreamResult};
use super::rate_budget::RateBudget;
use crate::discovery_store::{ArtistProfile, ImageRef, TrackRecord};
use async_trait::async_trait;
use chrono::Datelike;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upper bound the catalog accepts for `limit` on search endpoints.
const MAX_SEARCH_LIMIT: usize = 50;

/// Market used for top-tracks requests.
const TOP_TRACKS_MARKET: &str = "US";

#[derive(Deserialize)]
struct ApiArtist {
    id: String,
    name: String,
    #[serde(default)]
    genres: Vec<String>,
    popularity: Option<i64>,
    followers: Option<ApiFollowers>,
    #[serde(default)]
    images: Vec<ApiImage>,
}

#[derive(Deserialize)]
struct ApiFollowers {
    total: Option<u64>,
}

#[derive(Deserialize)]
struct ApiImage {
    url: String,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Deserialize)]
struct ApiArtistRef {
    id: Option<String>,
    name: String,
}

#[derive(Deserialize)]
struct ApiAlbum {
    name: Option<String>,
    release_date: Option<String>,
}

#[derive(Deserialize)]
struct ApiExternalUrls {
    spotify: Option<String>,
}

#[derive(Deserialize)]
struct ApiTrack {
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<ApiArtistRef>,
    album: Option<ApiAlbum>,
    duration_ms: Option<u32>,
    popularity: Option<i64>,
    external_urls: Option<ApiExternalUrls>,
}

#[derive(Deserialize)]
struct TopTracksResponse {
    #[serde(default)]
    tracks: Vec<ApiTrack>,
}

#[derive(Deserialize)]
struct RelatedArtistsResponse {
    #[serde(default)]
    artists: Vec<ApiArtist>,
}

#[derive(Deserialize)]
struct Paging<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct ArtistSearchResponse {
    artists: Option<Paging<ApiArtist>>,
}

impl From<ApiArtist> for ArtistProfile {
    fn from(a: ApiArtist) -> Self {
        ArtistProfile {
            artist_id: a.id,
            name: a.name,
            genres: a.genres,
            popularity: a.popularity.unwrap_or(0).clamp(0, 100) as u8,
            followers: a.followers.and_then(|f| f.total),
            images: a
                .images
                .into_iter()
                .map(|i| ImageRef {
                    url: i.url,
                    width: i.width,
                    height: i.height,
                })
                .collect(),
        }
    }
}

/// Tracks without an id or without any credited artist are dropped.
fn convert_track(t: ApiTrack) -> Option<TrackRecord> {
    let id = t.id?;
    let primary = t.artists.into_iter().next()?;
    if primary.name.trim().is_empty() {
        return None;
    }
    let (album_name, release_date) = match t.album {
        Some(album) => (album.name, album.release_date),
        None => (None, None),
    };
    Some(TrackRecord {
        track_id: id,
        name: t.name,
        artist_name: primary.name,
        artist_id: primary.id,
        album_name,
        duration_ms: t.duration_ms,
        popularity: t.popularity.map(|p| p.clamp(0, 100) as u8),
        external_url: t.external_urls.and_then(|u| u.spotify),
        genre: None,
        release_year: release_date.as_deref().and_then(parse_release_year),
    })
}

/// HTTP client for the upstream catalog.
pub struct HttpCatalogClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    budget: Arc<dyn RateBudget>,
}

impl HttpCatalogClient {
    /// # Arguments
    /// * `base_url` - Base URL of the catalog API (e.g., "https://api.spotify.com/v1")
    /// * `token` - Bearer token sent with every request, if any
    /// * `timeout_sec` - Request timeout in seconds
    /// * `budget` - Shared rate budget; one token is consumed per request
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout_sec: u64,
        budget: Arc<dyn RateBudget>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            budget,
        })
    }

    /// GET `path` and decode the body. A 404 is `Ok(None)`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> UpstreamResult<Option<T>> {
        if !self.budget.try_acquire() {
            return Err(UpstreamError::RateLimited { retry_after: None });
        }

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!("GET {} -> {}", path, status);

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(UpstreamError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let body = response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        Ok(Some(body))
    }

    async fn search_artists(&self, q: String, limit: usize) -> UpstreamResult<Vec<ArtistProfile>> {
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let response: Option<ArtistSearchResponse> = self
            .get_json(
                "/search",
                &[
                    ("q", q),
                    ("type", "artist".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        Ok(response
            .and_then(|r| r.artists)
            .map(|page| page.items.into_iter().map(ArtistProfile::from).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn get_artist(&self, artist_id: &str) -> UpstreamResult<Option<ArtistProfile>> {
        let path = format!("/artists/{}", urlencoding::encode(artist_id));
        let artist: Option<ApiArtist> = self.get_json(&path, &[]).await?;
        Ok(artist.map(ArtistProfile::from))
    }

    async fn get_track(&self, track_id: &str) -> UpstreamResult<Option<TrackRecord>> {
        let path = format!("/tracks/{}", urlencoding::encode(track_id));
        let track: Option<ApiTrack> = self.get_json(&path, &[]).await?;
        Ok(track.and_then(convert_track))
    }

    async fn get_artist_top_tracks(&self, artist_id: &str) -> UpstreamResult<Vec<TrackRecord>> {
        let path = format!("/artists/{}/top-tracks", urlencoding::encode(artist_id));
        let response: Option<TopTracksResponse> = self
            .get_json(&path, &[("market", TOP_TRACKS_MARKET.to_string())])
            .await?;

        Ok(response
            .map(|r| r.tracks.into_iter().filter_map(convert_track).collect())
            .unwrap_or_default())
    }

    async fn get_related_artists(&self, artist_id: &str) -> UpstreamResult<Vec<ArtistProfile>> {
        let path = format!("/artists/{}/related-artists", urlencoding::encode(artist_id));
        let response: Option<RelatedArtistsResponse> = self.get_json(&path, &[]).await?;

        Ok(response
            .map(|r| r.artists.into_iter().map(ArtistProfile::from).collect())
            .unwrap_or_default())
    }

    async fn get_popular_artists(&self, limit: usize) -> UpstreamResult<Vec<ArtistProfile>> {
        let year = chrono::Utc::now().year();
        let mut artists = self
            .search_artists(format!("year:{}-{}", year - 1, year), limit)
            .await?;
        artists.sort_by(|a, b| b.popularity.cmp(&a.popularity));
        artists.truncate(limit);
        Ok(artists)
    }

    async fn search_artists_by_genre(
        &self,
        genre: &str,
        limit: usize,
    ) -> UpstreamResult<Vec<ArtistProfile>> {
        let mut artists = self
            .search_artists(format!("genre:\"{}\"", genre), limit)
            .await?;
        artists.truncate(limit);
        Ok(artists)
    }
}
