//! Pipeline accounting: per-operation counters, timing samples, Prometheus
//! metrics, and the merger for partial reports from independent stages.

mod merge;
pub mod metrics;
mod tracker;

pub use merge::{
    merge_reports, CandidatePoolSnapshot, Concat, Latest, Merge, ScoringSummary, Slowest,
    StageReport, Summed,
};
pub use tracker::{
    validate_snapshot, CacheLevel, CallSample, LevelHits, OperationCounters, OperationStats,
    OperationType, PerformanceDiagnostics, StatisticsSnapshot, StatisticsTracker, StatsMismatch,
};
