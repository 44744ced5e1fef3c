//! Per-operation counters and call timings for the discovery pipeline.

use super::metrics;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Timing samples kept per list; the oldest are dropped beyond this.
const MAX_TIMING_SAMPLES: usize = 10_000;

/// Kind of lookup being accounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    ArtistProfile,
    Track,
    TopTracks,
    RelatedArtists,
    Search,
}

impl OperationType {
    pub const ALL: [OperationType; 5] = [
        OperationType::ArtistProfile,
        OperationType::Track,
        OperationType::TopTracks,
        OperationType::RelatedArtists,
        OperationType::Search,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::ArtistProfile => "artist_profile",
            OperationType::Track => "track",
            OperationType::TopTracks => "top_tracks",
            OperationType::RelatedArtists => "related_artists",
            OperationType::Search => "search",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which non-upstream tier answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLevel {
    Memory,
    Database,
    Graph,
}

impl CacheLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLevel::Memory => "memory",
            CacheLevel::Database => "database",
            CacheLevel::Graph => "graph",
        }
    }
}

/// Counters for one operation type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationCounters {
    pub requested: u64,
    pub cached: u64,
    pub from_upstream: u64,
    pub api_calls: u64,
}

impl std::ops::Add for OperationCounters {
    type Output = OperationCounters;

    fn add(self, rhs: Self) -> Self::Output {
        OperationCounters {
            requested: self.requested + rhs.requested,
            cached: self.cached + rhs.cached,
            from_upstream: self.from_upstream + rhs.from_upstream,
            api_calls: self.api_calls + rhs.api_calls,
        }
    }
}

/// The five counter groups, one per operation type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    pub artist_profile: OperationCounters,
    pub track: OperationCounters,
    pub top_tracks: OperationCounters,
    pub related_artists: OperationCounters,
    pub search: OperationCounters,
}

impl OperationStats {
    pub fn get(&self, op: OperationType) -> &OperationCounters {
        match op {
            OperationType::ArtistProfile => &self.artist_profile,
            OperationType::Track => &self.track,
            OperationType::TopTracks => &self.top_tracks,
            OperationType::RelatedArtists => &self.related_artists,
            OperationType::Search => &self.search,
        }
    }

    fn get_mut(&mut self, op: OperationType) -> &mut OperationCounters {
        match op {
            OperationType::ArtistProfile => &mut self.artist_profile,
            OperationType::Track => &mut self.track,
            OperationType::TopTracks => &mut self.top_tracks,
            OperationType::RelatedArtists => &mut self.related_artists,
            OperationType::Search => &mut self.search,
        }
    }

    fn total(&self) -> OperationCounters {
        OperationType::ALL
            .iter()
            .fold(OperationCounters::default(), |acc, op| acc + *self.get(*op))
    }
}

impl std::ops::Add for OperationStats {
    type Output = OperationStats;

    fn add(self, rhs: Self) -> Self::Output {
        OperationStats {
            artist_profile: self.artist_profile + rhs.artist_profile,
            track: self.track + rhs.track,
            top_tracks: self.top_tracks + rhs.top_tracks,
            related_artists: self.related_artists + rhs.related_artists,
            search: self.search + rhs.search,
        }
    }
}

/// Cache hits broken down by tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelHits {
    pub memory: u64,
    pub database: u64,
    pub graph: u64,
}

impl std::ops::Add for LevelHits {
    type Output = LevelHits;

    fn add(self, rhs: Self) -> Self::Output {
        LevelHits {
            memory: self.memory + rhs.memory,
            database: self.database + rhs.database,
            graph: self.graph + rhs.graph,
        }
    }
}

/// Point-in-time view of the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub operations: OperationStats,
    pub hits_by_level: LevelHits,
    pub total_requests: u64,
    pub total_cache_hits: u64,
    pub total_from_upstream: u64,
    pub total_api_calls: u64,
    /// `min(1.0, total_cache_hits / total_requests)`; concurrent stages can
    /// report the same logical hit more than once.
    pub cache_hit_rate: f64,
}

impl StatisticsSnapshot {
    pub fn from_parts(operations: OperationStats, hits_by_level: LevelHits) -> Self {
        let total = operations.total();
        let cache_hit_rate = if total.requested == 0 {
            0.0
        } else {
            (total.cached as f64 / total.requested as f64).min(1.0)
        };
        Self {
            operations,
            hits_by_level,
            total_requests: total.requested,
            total_cache_hits: total.cached,
            total_from_upstream: total.from_upstream,
            total_api_calls: total.api_calls,
            cache_hit_rate,
        }
    }
}

/// One timed call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSample {
    pub operation: String,
    pub duration_ms: u64,
}

/// Raw timing samples plus the slowest single call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceDiagnostics {
    pub api_calls: Vec<CallSample>,
    pub db_queries: Vec<CallSample>,
    pub slowest_call: Option<CallSample>,
}

impl PerformanceDiagnostics {
    pub fn average_api_call_ms(&self) -> Option<f64> {
        average(&self.api_calls)
    }

    pub fn average_db_query_ms(&self) -> Option<f64> {
        average(&self.db_queries)
    }

    /// Average duration of the upstream calls made for `operation`.
    pub fn average_for(&self, operation: &str) -> Option<f64> {
        let samples: Vec<CallSample> = self
            .api_calls
            .iter()
            .filter(|s| s.operation == operation)
            .cloned()
            .collect();
        average(&samples)
    }
}

fn average(samples: &[CallSample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sum: u64 = samples.iter().map(|s| s.duration_ms).sum();
    Some(sum as f64 / samples.len() as f64)
}

/// An operation whose accounting does not add up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsMismatch {
    pub operation: OperationType,
    pub requested: u64,
    pub cached: u64,
    pub from_upstream: u64,
    /// `(requested - cached) - from_upstream`
    pub drift: i64,
}

#[derive(Default)]
struct TrackerState {
    operations: OperationStats,
    hits_by_level: LevelHits,
    api_calls: VecDeque<CallSample>,
    db_queries: VecDeque<CallSample>,
    slowest_call: Option<CallSample>,
}

fn push_sample(samples: &mut VecDeque<CallSample>, sample: CallSample) {
    if samples.len() >= MAX_TIMING_SAMPLES {
        samples.pop_front();
    }
    samples.push_back(sample);
}

/// Shared statistics handle. Cloning yields another handle on the same counters.
#[derive(Clone, Default)]
pub struct StatisticsTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, op: OperationType) {
        self.state.lock().unwrap().operations.get_mut(op).requested += 1;
        metrics::record_lookup_request(op);
    }

    pub fn record_cache_hit(&self, op: OperationType, level: CacheLevel) {
        let mut state = self.state.lock().unwrap();
        state.operations.get_mut(op).cached += 1;
        match level {
            CacheLevel::Memory => state.hits_by_level.memory += 1,
            CacheLevel::Database => state.hits_by_level.database += 1,
            CacheLevel::Graph => state.hits_by_level.graph += 1,
        }
        drop(state);
        metrics::record_lookup_outcome(op, level.as_str());
    }

    pub fn record_from_upstream(&self, op: OperationType, count: u64) {
        self.state.lock().unwrap().operations.get_mut(op).from_upstream += count;
        metrics::record_lookup_outcome(op, "upstream");
    }

    pub fn record_api_call(&self, op: OperationType, duration_ms: u64) {
        let sample = CallSample {
            operation: op.as_str().to_string(),
            duration_ms,
        };
        let mut state = self.state.lock().unwrap();
        state.operations.get_mut(op).api_calls += 1;
        if state
            .slowest_call
            .as_ref()
            .map_or(true, |s| duration_ms > s.duration_ms)
        {
            state.slowest_call = Some(sample.clone());
        }
        push_sample(&mut state.api_calls, sample);
        drop(state);
        metrics::record_upstream_call(op, duration_ms);
    }

    pub fn record_db_query(&self, operation: &str, duration_ms: u64) {
        let sample = CallSample {
            operation: operation.to_string(),
            duration_ms,
        };
        push_sample(&mut self.state.lock().unwrap().db_queries, sample);
        metrics::record_db_query(operation, duration_ms);
    }

    pub fn get_statistics(&self) -> StatisticsSnapshot {
        let state = self.state.lock().unwrap();
        StatisticsSnapshot::from_parts(state.operations, state.hits_by_level)
    }

    pub fn get_performance_diagnostics(&self) -> PerformanceDiagnostics {
        let state = self.state.lock().unwrap();
        PerformanceDiagnostics {
            api_calls: state.api_calls.iter().cloned().collect(),
            db_queries: state.db_queries.iter().cloned().collect(),
            slowest_call: state.slowest_call.clone(),
        }
    }

    pub fn reset(&self) {
        *self.state.lock().unwrap() = TrackerState::default();
    }

    /// Check that `requested - cached` is within `tolerance` of `from_upstream`
    /// for every operation type. Diagnostic only.
    pub fn validate_statistics(&self, tolerance: u64) -> Vec<StatsMismatch> {
        validate_snapshot(&self.get_statistics(), tolerance)
    }
}

pub fn validate_snapshot(snapshot: &StatisticsSnapshot, tolerance: u64) -> Vec<StatsMismatch> {
    OperationType::ALL
        .iter()
        .filter_map(|op| {
            let c = snapshot.operations.get(*op);
            let drift = (c.requested as i64 - c.cached as i64) - c.from_upstream as i64;
            if drift.unsigned_abs() > tolerance {
                Some(StatsMismatch {
                    operation: *op,
                    requested: c.requested,
                    cached: c.cached,
                    from_upstream: c.from_upstream,
                    drift,
                })
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_hits_over_requests() {
        let tracker = StatisticsTracker::new();
        for _ in 0..4 {
            tracker.record_request(OperationType::Track);
        }
        tracker.record_cache_hit(OperationType::Track, CacheLevel::Memory);
        tracker.record_cache_hit(OperationType::Track, CacheLevel::Database);
        tracker.record_from_upstream(OperationType::Track, 2);

        let stats = tracker.get_statistics();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.total_cache_hits, 2);
        assert_eq!(stats.total_from_upstream, 2);
        assert!((stats.cache_hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.hits_by_level.memory, 1);
        assert_eq!(stats.hits_by_level.database, 1);
    }

    #[test]
    fn hit_rate_is_clamped_to_one() {
        let tracker = StatisticsTracker::new();
        tracker.record_request(OperationType::Search);
        tracker.record_cache_hit(OperationType::Search, CacheLevel::Memory);
        tracker.record_cache_hit(OperationType::Search, CacheLevel::Graph);
        tracker.record_cache_hit(OperationType::Search, CacheLevel::Database);

        assert_eq!(tracker.get_statistics().cache_hit_rate, 1.0);
    }

    #[test]
    fn hit_rate_is_zero_without_requests() {
        let tracker = StatisticsTracker::new();
        assert_eq!(tracker.get_statistics().cache_hit_rate, 0.0);
    }

    #[test]
    fn total_api_calls_sums_all_types() {
        let tracker = StatisticsTracker::new();
        tracker.record_api_call(OperationType::ArtistProfile, 10);
        tracker.record_api_call(OperationType::TopTracks, 30);
        tracker.record_api_call(OperationType::TopTracks, 20);
        tracker.record_api_call(OperationType::Search, 5);

        let stats = tracker.get_statistics();
        assert_eq!(stats.total_api_calls, 4);
        assert_eq!(stats.operations.top_tracks.api_calls, 2);

        let diagnostics = tracker.get_performance_diagnostics();
        assert_eq!(diagnostics.api_calls.len(), 4);
        assert_eq!(diagnostics.slowest_call.as_ref().unwrap().duration_ms, 30);
        assert_eq!(diagnostics.average_for("top_tracks"), Some(25.0));
    }

    #[test]
    fn db_queries_are_sampled_separately() {
        let tracker = StatisticsTracker::new();
        tracker.record_db_query("fetch_tracks", 4);
        tracker.record_db_query("get_track", 2);

        let diagnostics = tracker.get_performance_diagnostics();
        assert_eq!(diagnostics.db_queries.len(), 2);
        assert!(diagnostics.api_calls.is_empty());
        assert_eq!(diagnostics.average_db_query_ms(), Some(3.0));
        assert_eq!(tracker.get_statistics().total_api_calls, 0);
    }

    #[test]
    fn reset_clears_everything() {
        let tracker = StatisticsTracker::new();
        tracker.record_request(OperationType::Track);
        tracker.record_api_call(OperationType::Track, 12);
        tracker.reset();

        assert_eq!(tracker.get_statistics().total_requests, 0);
        assert_eq!(
            tracker.get_performance_diagnostics(),
            PerformanceDiagnostics::default()
        );
    }

    #[test]
    fn validate_reports_drift_beyond_tolerance() {
        let tracker = StatisticsTracker::new();
        for _ in 0..10 {
            tracker.record_request(OperationType::RelatedArtists);
        }
        tracker.record_cache_hit(OperationType::RelatedArtists, CacheLevel::Graph);
        tracker.record_from_upstream(OperationType::RelatedArtists, 2);
        for _ in 0..3 {
            tracker.record_request(OperationType::Track);
        }
        tracker.record_from_upstream(OperationType::Track, 1);

        let mismatches = tracker.validate_statistics(5);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].operation, OperationType::RelatedArtists);
        assert_eq!(mismatches[0].drift, 7);

        assert!(tracker.validate_statistics(7).is_empty());
    }

    #[test]
    fn clones_share_counters() {
        let tracker = StatisticsTracker::new();
        let other = tracker.clone();
        other.record_request(OperationType::ArtistProfile);
        assert_eq!(tracker.get_statistics().total_requests, 1);
    }
}
