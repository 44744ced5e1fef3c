//! Rate-gated, deduplicated enrichment of track and artist rows.

use super::dedup::{AttemptLedger, BackfillKind, Rejected};
use crate::discovery_store::{DiscoveryStore, TrackPatch, TrackRecord};
use crate::stats::{metrics, OperationType, StatisticsTracker};
use crate::tasks::{run_blocking, spawn_detached};
use crate::upstream::{
    parse_release_year, CatalogClient, MetadataRegistry, RateBudget, RegistryRecording,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Background attempts are skipped while fewer tokens than this remain.
    pub reserve_tokens: f64,
    /// How long a tried id is left alone, whatever the outcome.
    pub attempt_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            reserve_tokens: 10.0,
            attempt_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InFlight,
    RecentlyAttempted,
    RateBudgetLow,
    UnknownEntity,
}

impl From<Rejected> for SkipReason {
    fn from(r: Rejected) -> Self {
        match r {
            Rejected::InFlight => SkipReason::InFlight,
            Rejected::RecentlyAttempted => SkipReason::RecentlyAttempted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillOutcome {
    /// At least one field was filled in.
    Updated,
    /// Every source came back empty; sentinels were written.
    MarkedUnknown,
    Skipped(SkipReason),
}

impl BackfillOutcome {
    fn label(&self) -> &'static str {
        match self {
            BackfillOutcome::Updated => "updated",
            BackfillOutcome::MarkedUnknown => "marked_unknown",
            BackfillOutcome::Skipped(SkipReason::RateBudgetLow) => "skipped_budget",
            BackfillOutcome::Skipped(_) => "skipped",
        }
    }
}

/// Result of a [`BackfillService::backfill_missing_tracks`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillBatchReport {
    pub examined: usize,
    pub updated: usize,
    pub marked_unknown: usize,
    pub skipped: usize,
    /// The pass stopped early because the rate budget ran low.
    pub stopped_on_budget: bool,
}

struct BackfillInner {
    store: Arc<dyn DiscoveryStore>,
    catalog: Arc<dyn CatalogClient>,
    registry: Arc<dyn MetadataRegistry>,
    budget: Arc<dyn RateBudget>,
    tracker: StatisticsTracker,
    ledger: AttemptLedger,
    config: BackfillConfig,
}

/// Handle on the backfill subsystem. Clones share the same ledger.
#[derive(Clone)]
pub struct BackfillService {
    inner: Arc<BackfillInner>,
}

/// Fields the registry and catalog agreed on, registry date first.
fn merge_sources(registry: Option<&RegistryRecording>, catalog: Option<&TrackRecord>) -> TrackPatch {
    let registry_year = registry
        .and_then(|r| r.first_release_date.as_deref())
        .and_then(parse_release_year);
    TrackPatch {
        album_name: catalog.and_then(|t| t.album_name.clone()),
        duration_ms: catalog.and_then(|t| t.duration_ms),
        popularity: catalog.and_then(|t| t.popularity),
        external_url: catalog.and_then(|t| t.external_url.clone()),
        genre: registry.and_then(|r| r.tags.first().cloned()),
        release_year: registry_year.or_else(|| catalog.and_then(|t| t.release_year)),
    }
}

impl BackfillService {
    pub fn new(
        store: Arc<dyn DiscoveryStore>,
        catalog: Arc<dyn CatalogClient>,
        registry: Arc<dyn MetadataRegistry>,
        budget: Arc<dyn RateBudget>,
        tracker: StatisticsTracker,
        config: BackfillConfig,
    ) -> Self {
        let ledger = AttemptLedger::new(config.attempt_ttl);
        Self {
            inner: Arc::new(BackfillInner {
                store,
                catalog,
                registry,
                budget,
                tracker,
                ledger,
                config,
            }),
        }
    }

    /// True while the shared budget keeps more than the reserve for
    /// interactive requests. Peeks without consuming.
    pub fn gate_open(&self) -> bool {
        self.inner.budget.status().remaining >= self.inner.config.reserve_tokens
    }

    pub fn ledger(&self) -> &AttemptLedger {
        &self.inner.ledger
    }

    fn finish(&self, kind: BackfillKind, id: &str, outcome: BackfillOutcome) -> BackfillOutcome {
        metrics::record_backfill_attempt(kind.as_str(), outcome.label());
        debug!("Backfill {} {}: {:?}", kind.as_str(), id, outcome);
        outcome
    }

    async fn lookup_registry(&self, artist_name: &str, track_name: &str) -> Option<RegistryRecording> {
        match self
            .inner
            .registry
            .lookup_recording(artist_name, track_name)
            .await
        {
            Ok(found) => found,
            Err(err) => {
                warn!(
                    "Registry lookup failed for {} - {}: {:#}",
                    artist_name, track_name, err
                );
                None
            }
        }
    }

    async fn lookup_catalog_track(&self, track_id: &str) -> Option<TrackRecord> {
        let start = Instant::now();
        let result = self.inner.catalog.get_track(track_id).await;
        self.inner
            .tracker
            .record_api_call(OperationType::Track, start.elapsed().as_millis() as u64);
        match result {
            Ok(track) => track,
            Err(err) => {
                warn!("Catalog lookup failed for track {}: {}", track_id, err);
                None
            }
        }
    }

    /// Write `patch`, then sentinels into whatever is still missing.
    /// Store errors are logged; the attempt still counts.
    async fn persist_patch(&self, track_id: &str, patch: TrackPatch, catalog: Option<TrackRecord>) -> bool {
        let store = self.inner.store.clone();
        let id = track_id.to_string();
        let start = Instant::now();
        let result = run_blocking(move || {
            let track_id = id.as_str();
            let mut applied = false;
            if !patch.is_empty() {
                applied = store.apply_track_patch(track_id, &patch)?;
                if !applied {
                    if let Some(mut track) = catalog {
                        track.genre = track.genre.or_else(|| patch.genre.clone());
                        track.release_year = patch.release_year.or(track.release_year);
                        store.upsert_track(&track)?;
                        applied = true;
                    }
                }
            }
            store.mark_track_metadata_unknown(track_id)?;
            Ok(applied)
        })
        .await;
        self.inner
            .tracker
            .record_db_query("backfill_write", start.elapsed().as_millis() as u64);

        match result {
            Ok(applied) => applied,
            Err(err) => {
                warn!("Failed to persist backfill for track {}: {:#}", track_id, err);
                false
            }
        }
    }

    /// Release year and genre from the metadata registry.
    pub async fn backfill_track_metadata(
        &self,
        track_id: &str,
        artist_name: &str,
        track_name: &str,
    ) -> BackfillOutcome {
        let kind = BackfillKind::TrackMetadata;
        let guard = match self.inner.ledger.try_begin(kind, track_id) {
            Ok(guard) => guard,
            Err(rejected) => return self.finish(kind, track_id, BackfillOutcome::Skipped(rejected.into())),
        };
        if !self.gate_open() {
            return self.finish(kind, track_id, BackfillOutcome::Skipped(SkipReason::RateBudgetLow));
        }

        let recording = self.lookup_registry(artist_name, track_name).await;
        let patch = TrackPatch {
            release_year: recording
                .as_ref()
                .and_then(|r| r.first_release_date.as_deref())
                .and_then(parse_release_year),
            genre: recording.as_ref().and_then(|r| r.tags.first().cloned()),
            ..Default::default()
        };

        let updated = self.persist_patch(track_id, patch, None).await;
        guard.finish(updated);
        let outcome = if updated {
            BackfillOutcome::Updated
        } else {
            BackfillOutcome::MarkedUnknown
        };
        self.finish(kind, track_id, outcome)
    }

    /// Registry date and tags plus catalog popularity, duration and URL.
    /// The registry's release date wins over the catalog's.
    pub async fn backfill_track_details(
        &self,
        track_id: &str,
        artist_name: &str,
        track_name: &str,
    ) -> BackfillOutcome {
        let kind = BackfillKind::TrackDetails;
        let guard = match self.inner.ledger.try_begin(kind, track_id) {
            Ok(guard) => guard,
            Err(rejected) => return self.finish(kind, track_id, BackfillOutcome::Skipped(rejected.into())),
        };
        if !self.gate_open() {
            return self.finish(kind, track_id, BackfillOutcome::Skipped(SkipReason::RateBudgetLow));
        }

        let recording = self.lookup_registry(artist_name, track_name).await;
        let catalog = self.lookup_catalog_track(track_id).await;
        let patch = merge_sources(recording.as_ref(), catalog.as_ref());

        let updated = self.persist_patch(track_id, patch, catalog).await;
        guard.finish(updated);
        let outcome = if updated {
            BackfillOutcome::Updated
        } else {
            BackfillOutcome::MarkedUnknown
        };
        self.finish(kind, track_id, outcome)
    }

    /// Refresh genres and popularity of an artist profile from the catalog.
    pub async fn backfill_artist_profile(&self, artist_id: &str) -> BackfillOutcome {
        let kind = BackfillKind::ArtistProfile;
        let guard = match self.inner.ledger.try_begin(kind, artist_id) {
            Ok(guard) => guard,
            Err(rejected) => return self.finish(kind, artist_id, BackfillOutcome::Skipped(rejected.into())),
        };
        if !self.gate_open() {
            return self.finish(kind, artist_id, BackfillOutcome::Skipped(SkipReason::RateBudgetLow));
        }

        let start = Instant::now();
        let result = self.inner.catalog.get_artist(artist_id).await;
        self.inner
            .tracker
            .record_api_call(OperationType::ArtistProfile, start.elapsed().as_millis() as u64);

        let profile = match result {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                guard.finish(false);
                return self.finish(kind, artist_id, BackfillOutcome::Skipped(SkipReason::UnknownEntity));
            }
            Err(err) => {
                warn!("Catalog lookup failed for artist {}: {}", artist_id, err);
                guard.finish(false);
                return self.finish(kind, artist_id, BackfillOutcome::MarkedUnknown);
            }
        };

        let store = self.inner.store.clone();
        let updated = match run_blocking(move || store.upsert_artist_profile(&profile)).await {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to store profile for artist {}: {:#}", artist_id, err);
                false
            }
        };
        guard.finish(updated);
        let outcome = if updated {
            BackfillOutcome::Updated
        } else {
            BackfillOutcome::MarkedUnknown
        };
        self.finish(kind, artist_id, outcome)
    }

    /// Fire-and-forget enrichment for a track observed with missing fields.
    /// Returns None when nothing was scheduled.
    pub fn schedule_track_backfill(&self, track: &TrackRecord) -> Option<JoinHandle<()>> {
        let kind = if track.needs_details() {
            BackfillKind::TrackDetails
        } else if track.needs_metadata() {
            BackfillKind::TrackMetadata
        } else {
            return None;
        };
        if !self.inner.ledger.would_start(kind, &track.track_id) || !self.gate_open() {
            return None;
        }

        let this = self.clone();
        let track_id = track.track_id.clone();
        let artist_name = track.artist_name.clone();
        let name = track.name.clone();
        Some(spawn_detached("track_backfill", async move {
            match kind {
                BackfillKind::TrackDetails => {
                    this.backfill_track_details(&track_id, &artist_name, &name)
                        .await
                }
                _ => {
                    this.backfill_track_metadata(&track_id, &artist_name, &name)
                        .await
                }
            };
            Ok(())
        }))
    }

    /// Fire-and-forget refresh of an artist profile seen without genres.
    pub fn schedule_artist_backfill(&self, artist_id: &str) -> Option<JoinHandle<()>> {
        if !self.inner.ledger.would_start(BackfillKind::ArtistProfile, artist_id) || !self.gate_open() {
            return None;
        }
        let this = self.clone();
        let artist_id = artist_id.to_string();
        Some(spawn_detached("artist_backfill", async move {
            this.backfill_artist_profile(&artist_id).await;
            Ok(())
        }))
    }

    /// Backfill up to `limit` tracks lacking release year or genre, one at a
    /// time, stopping as soon as the rate gate closes.
    pub async fn backfill_missing_tracks(&self, limit: usize) -> anyhow::Result<BackfillBatchReport> {
        let store = self.inner.store.clone();
        let tracks = run_blocking(move || store.get_tracks_missing_metadata(limit)).await?;
        let mut report = BackfillBatchReport::default();

        for track in tracks {
            if !self.gate_open() {
                report.stopped_on_budget = true;
                break;
            }
            report.examined += 1;
            let outcome = if track.needs_details() {
                self.backfill_track_details(&track.track_id, &track.artist_name, &track.name)
                    .await
            } else {
                self.backfill_track_metadata(&track.track_id, &track.artist_name, &track.name)
                    .await
            };
            match outcome {
                BackfillOutcome::Updated => report.updated += 1,
                BackfillOutcome::MarkedUnknown => report.marked_unknown += 1,
                BackfillOutcome::Skipped(SkipReason::RateBudgetLow) => {
                    report.skipped += 1;
                    report.stopped_on_budget = true;
                    break;
                }
                BackfillOutcome::Skipped(_) => report.skipped += 1,
            }
        }

        info!(
            "Backfill pass: {} examined, {} updated, {} marked unknown, {} skipped{}",
            report.examined,
            report.updated,
            report.marked_unknown,
            report.skipped,
            if report.stopped_on_budget {
                " (stopped on rate budget)"
            } else {
                ""
            }
        );
        Ok(report)
    }

    /// Periodically evict expired recent-attempt records until `cancel` fires.
    pub fn start_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        let period = self.inner.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Backfill sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let evicted = this.inner.ledger.evict_expired();
                        if evicted > 0 {
                            debug!("Evicted {} expired backfill attempts", evicted);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(date: Option<&str>, tags: &[&str]) -> RegistryRecording {
        RegistryRecording {
            first_release_date: date.map(str::to_string),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn registry_date_wins_over_catalog_date() {
        let mut catalog = TrackRecord::new("t1", "Song", "Band");
        catalog.release_year = Some(1999);
        catalog.popularity = Some(72);

        let patch = merge_sources(Some(&recording(Some("1994-03-15"), &["grunge"])), Some(&catalog));
        assert_eq!(patch.release_year, Some(1994));
        assert_eq!(patch.popularity, Some(72));
        assert_eq!(patch.genre.as_deref(), Some("grunge"));
    }

    #[test]
    fn catalog_date_is_the_fallback() {
        let mut catalog = TrackRecord::new("t1", "Song", "Band");
        catalog.release_year = Some(1999);

        let patch = merge_sources(Some(&recording(None, &[])), Some(&catalog));
        assert_eq!(patch.release_year, Some(1999));
        assert!(patch.genre.is_none());

        assert!(merge_sources(None, None).is_empty());
    }
}
