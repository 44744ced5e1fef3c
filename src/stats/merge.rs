//! Combining the partial reports produced by independent pipeline stages.
//!
//! Each field of a [`StageReport`] is wrapped in a type that fixes how it
//! merges:
//!
//! | wrapper      | merge                                   |
//! |--------------|-----------------------------------------|
//! | `Summed<T>`  | `prev + next`                           |
//! | `Concat<T>`  | `prev` items then `next` items          |
//! | `Slowest`    | the sample with the greater duration    |
//! | `Latest<T>`  | `next` if present, otherwise `prev`     |
//!
//! Merging is not idempotent: merging a report with itself doubles every
//! summed counter.

use super::tracker::{
    CallSample, LevelHits, OperationStats, PerformanceDiagnostics, StatisticsSnapshot,
    StatisticsTracker,
};
use serde::Serialize;

pub trait Merge {
    /// Combine `self` (the earlier stage) with `next` (the later stage).
    fn merge(self, next: Self) -> Self;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Summed<T>(pub T);

impl<T: std::ops::Add<Output = T>> Merge for Summed<T> {
    fn merge(self, next: Self) -> Self {
        Summed(self.0 + next.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Concat<T>(pub Vec<T>);

impl<T> Default for Concat<T> {
    fn default() -> Self {
        Concat(Vec::new())
    }
}

impl<T> Merge for Concat<T> {
    fn merge(mut self, next: Self) -> Self {
        self.0.extend(next.0);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Slowest(pub Option<CallSample>);

impl Merge for Slowest {
    fn merge(self, next: Self) -> Self {
        match (self.0, next.0) {
            (Some(a), Some(b)) => {
                // Ties resolve on the operation name so the result does not
                // depend on argument order.
                if (b.duration_ms, &b.operation) > (a.duration_ms, &a.operation) {
                    Slowest(Some(b))
                } else {
                    Slowest(Some(a))
                }
            }
            (a, b) => Slowest(a.or(b)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Latest<T>(pub Option<T>);

impl<T> Default for Latest<T> {
    fn default() -> Self {
        Latest(None)
    }
}

impl<T> Merge for Latest<T> {
    fn merge(self, next: Self) -> Self {
        Latest(next.0.or(self.0))
    }
}

/// Summary of the most recent candidate scoring pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoringSummary {
    pub target_artist_id: Option<String>,
    pub strategy: String,
    pub candidates_scored: usize,
    pub top_score: f64,
}

/// The candidate pool as a stage left it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidatePoolSnapshot {
    pub artist_ids: Vec<String>,
    pub track_count: usize,
}

/// Partial statistics and diagnostics from one pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageReport {
    pub operations: Summed<OperationStats>,
    pub hits_by_level: Summed<LevelHits>,
    pub api_calls: Concat<CallSample>,
    pub db_queries: Concat<CallSample>,
    pub slowest_call: Slowest,
    pub scoring: Latest<ScoringSummary>,
    pub candidate_pool: Latest<CandidatePoolSnapshot>,
    pub logs: Concat<String>,
}

impl StageReport {
    /// Capture the current state of a tracker.
    pub fn from_tracker(tracker: &StatisticsTracker) -> Self {
        let stats = tracker.get_statistics();
        let diagnostics = tracker.get_performance_diagnostics();
        Self {
            operations: Summed(stats.operations),
            hits_by_level: Summed(stats.hits_by_level),
            api_calls: Concat(diagnostics.api_calls),
            db_queries: Concat(diagnostics.db_queries),
            slowest_call: Slowest(diagnostics.slowest_call),
            ..Default::default()
        }
    }

    pub fn with_scoring(mut self, scoring: ScoringSummary) -> Self {
        self.scoring = Latest(Some(scoring));
        self
    }

    pub fn with_candidate_pool(mut self, pool: CandidatePoolSnapshot) -> Self {
        self.candidate_pool = Latest(Some(pool));
        self
    }

    pub fn log(mut self, line: impl Into<String>) -> Self {
        self.logs.0.push(line.into());
        self
    }

    /// Statistics with derived totals recomputed from the merged counters.
    pub fn statistics(&self) -> StatisticsSnapshot {
        StatisticsSnapshot::from_parts(self.operations.0, self.hits_by_level.0)
    }

    pub fn diagnostics(&self) -> PerformanceDiagnostics {
        PerformanceDiagnostics {
            api_calls: self.api_calls.0.clone(),
            db_queries: self.db_queries.0.clone(),
            slowest_call: self.slowest_call.0.clone(),
        }
    }
}

impl Merge for StageReport {
    fn merge(self, next: Self) -> Self {
        StageReport {
            operations: self.operations.merge(next.operations),
            hits_by_level: self.hits_by_level.merge(next.hits_by_level),
            api_calls: self.api_calls.merge(next.api_calls),
            db_queries: self.db_queries.merge(next.db_queries),
            slowest_call: self.slowest_call.merge(next.slowest_call),
            scoring: self.scoring.merge(next.scoring),
            candidate_pool: self.candidate_pool.merge(next.candidate_pool),
            logs: self.logs.merge(next.logs),
        }
    }
}

/// Merge two optional stage reports. An absent side is the identity.
pub fn merge_reports(prev: Option<StageReport>, next: Option<StageReport>) -> Option<StageReport> {
    match (prev, next) {
        (None, None) => None,
        (Some(report), None) | (None, Some(report)) => Some(report),
        (Some(prev), Some(next)) => Some(prev.merge(next)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{CacheLevel, OperationType};

    fn sample(op: &str, ms: u64) -> CallSample {
        CallSample {
            operation: op.to_string(),
            duration_ms: ms,
        }
    }

    fn report_a() -> StageReport {
        let tracker = StatisticsTracker::new();
        tracker.record_request(OperationType::Track);
        tracker.record_request(OperationType::Track);
        tracker.record_cache_hit(OperationType::Track, CacheLevel::Memory);
        tracker.record_api_call(OperationType::Track, 40);
        StageReport::from_tracker(&tracker)
            .with_scoring(ScoringSummary {
                target_artist_id: Some("a1".into()),
                strategy: "closer".into(),
                candidates_scored: 12,
                top_score: 0.9,
            })
            .log("stage a")
    }

    fn report_b() -> StageReport {
        let tracker = StatisticsTracker::new();
        tracker.record_request(OperationType::Search);
        tracker.record_from_upstream(OperationType::Search, 1);
        tracker.record_api_call(OperationType::Search, 75);
        tracker.record_db_query("fetch_tracks", 3);
        StageReport::from_tracker(&tracker)
            .with_candidate_pool(CandidatePoolSnapshot {
                artist_ids: vec!["a2".into()],
                track_count: 3,
            })
            .log("stage b")
    }

    #[test]
    fn absent_side_is_identity() {
        let a = report_a();
        assert_eq!(merge_reports(Some(a.clone()), None), Some(a.clone()));
        assert_eq!(merge_reports(None, Some(a.clone())), Some(a));
        assert_eq!(merge_reports(None, None), None);
    }

    #[test]
    fn counters_are_summed_and_commutative() {
        let ab = merge_reports(Some(report_a()), Some(report_b())).unwrap();
        let ba = merge_reports(Some(report_b()), Some(report_a())).unwrap();

        assert_eq!(ab.operations, ba.operations);
        assert_eq!(ab.hits_by_level, ba.hits_by_level);
        assert_eq!(ab.slowest_call, ba.slowest_call);

        let stats = ab.statistics();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.total_cache_hits, 1);
        assert_eq!(stats.total_from_upstream, 1);
        assert_eq!(stats.total_api_calls, 2);
    }

    #[test]
    fn accumulating_fields_are_associative() {
        let c = report_b().log("stage c");
        let left = report_a().merge(report_b()).merge(c.clone());
        let right = report_a().merge(report_b().merge(c));
        assert_eq!(left.operations, right.operations);
        assert_eq!(left.api_calls, right.api_calls);
        assert_eq!(left.logs, right.logs);
    }

    #[test]
    fn merging_with_itself_resums() {
        let a = report_a();
        let doubled = merge_reports(Some(a.clone()), Some(a.clone())).unwrap();
        assert_eq!(
            doubled.statistics().total_requests,
            2 * a.statistics().total_requests
        );
        assert_eq!(doubled.api_calls.0.len(), 2 * a.api_calls.0.len());
        assert_ne!(doubled, a);
    }

    #[test]
    fn call_lists_and_logs_concatenate_in_stage_order() {
        let merged = report_a().merge(report_b());
        let ops: Vec<_> = merged
            .api_calls
            .0
            .iter()
            .map(|s| s.operation.as_str())
            .collect();
        assert_eq!(ops, vec!["track", "search"]);
        assert_eq!(merged.logs.0, vec!["stage a", "stage b"]);
        assert_eq!(merged.db_queries.0.len(), 1);
    }

    #[test]
    fn slowest_call_takes_the_longer_duration() {
        let merged = report_a().merge(report_b());
        assert_eq!(merged.slowest_call.0, Some(sample("search", 75)));

        let only_prev = Slowest(Some(sample("x", 1))).merge(Slowest(None));
        assert_eq!(only_prev.0, Some(sample("x", 1)));

        let tie_ab = Slowest(Some(sample("a", 5))).merge(Slowest(Some(sample("b", 5))));
        let tie_ba = Slowest(Some(sample("b", 5))).merge(Slowest(Some(sample("a", 5))));
        assert_eq!(tie_ab, tie_ba);
    }

    #[test]
    fn snapshot_fields_prefer_next_and_fall_back_to_prev() {
        let merged = report_a().merge(report_b());
        // b has no scoring, so a's survives; b's pool wins.
        assert_eq!(merged.scoring.0.unwrap().strategy, "closer");
        assert_eq!(merged.candidate_pool.0.unwrap().track_count, 3);

        let newer = StageReport::default().with_scoring(ScoringSummary {
            target_artist_id: None,
            strategy: "further".into(),
            candidates_scored: 1,
            top_score: 0.1,
        });
        let merged = report_a().merge(newer);
        assert_eq!(merged.scoring.0.unwrap().strategy, "further");
    }
}
