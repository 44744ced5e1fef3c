//! MusicBrainz client used as the secondary metadata registry.
//!
//! Rate limited to 1 request per second per MusicBrainz API policy.

use super::client::{MetadataRegistry, RegistryRecording};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const MUSICBRAINZ_API_BASE: &str = "https://musicbrainz.org/ws/2";
const RATE_LIMIT_INTERVAL: Duration = Duration::from_millis(1100);

/// Search hits scoring below this are ignored.
const MIN_MATCH_SCORE: u32 = 80;
const SEARCH_LIMIT: usize = 5;
const MAX_TAGS: usize = 5;

#[derive(Deserialize)]
struct RecordingSearchResponse {
    #[serde(default)]
    recordings: Vec<MbRecording>,
}

#[derive(Deserialize)]
struct MbRecording {
    score: Option<u32>,
    #[serde(rename = "first-release-date")]
    first_release_date: Option<String>,
    #[serde(default)]
    tags: Vec<MbTag>,
}

#[derive(Deserialize)]
struct MbTag {
    name: String,
    #[serde(default)]
    count: i64,
}

pub struct MusicBrainzClient {
    client: reqwest::Client,
    base_url: String,
    last_request: Mutex<Instant>,
}

impl MusicBrainzClient {
    pub fn new(user_agent: &str) -> Result<Self> {
        Self::with_base_url(user_agent, MUSICBRAINZ_API_BASE)
    }

    pub fn with_base_url(user_agent: &str, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            last_request: Mutex::new(
                Instant::now()
                    .checked_sub(RATE_LIMIT_INTERVAL)
                    .unwrap_or_else(Instant::now),
            ),
        })
    }

    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        if elapsed < RATE_LIMIT_INTERVAL {
            tokio::time::sleep(RATE_LIMIT_INTERVAL - elapsed).await;
        }
        *last = Instant::now();
    }
}

fn escape_query(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Earliest release date and the most voted tags over the confident matches.
fn summarize(recordings: Vec<MbRecording>) -> Option<RegistryRecording> {
    let matches: Vec<MbRecording> = recordings
        .into_iter()
        .filter(|r| r.score.map_or(true, |s| s >= MIN_MATCH_SCORE))
        .collect();
    if matches.is_empty() {
        return None;
    }

    // Dates are ISO prefixes, so the lexicographic minimum is the earliest.
    let first_release_date = matches
        .iter()
        .filter_map(|r| r.first_release_date.as_deref())
        .filter(|d| !d.is_empty())
        .min()
        .map(str::to_string);

    let mut tags: Vec<(String, i64)> = Vec::new();
    for tag in matches.into_iter().flat_map(|r| r.tags) {
        let name = tag.name.trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        match tags.iter_mut().find(|(n, _)| *n == name) {
            Some((_, count)) => *count += tag.count,
            None => tags.push((name, tag.count)),
        }
    }
    tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    Some(RegistryRecording {
        first_release_date,
        tags: tags.into_iter().take(MAX_TAGS).map(|(n, _)| n).collect(),
    })
}

#[async_trait]
impl MetadataRegistry for MusicBrainzClient {
    async fn lookup_recording(
        &self,
        artist_name: &str,
        track_name: &str,
    ) -> Result<Option<RegistryRecording>> {
        self.rate_limit().await;

        let query = format!(
            "recording:\"{}\" AND artist:\"{}\"",
            escape_query(track_name),
            escape_query(artist_name)
        );
        let url = format!(
            "{}/recording/?query={}&fmt=json&limit={}",
            self.base_url,
            urlencoding::encode(&query),
            SEARCH_LIMIT
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach MusicBrainz")?;

        if !response.status().is_success() {
            if response.status().as_u16() == 503 {
                debug!("MusicBrainz throttled lookup for {} - {}", artist_name, track_name);
                return Ok(None);
            }
            anyhow::bail!(
                "MusicBrainz recording search failed with status {}",
                response.status()
            );
        }

        let body: RecordingSearchResponse = response
            .json()
            .await
            .context("Failed to parse MusicBrainz response")?;

        Ok(summarize(body.recordings))
    }
}
