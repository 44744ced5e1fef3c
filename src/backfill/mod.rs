//! Metadata backfill: enrichment of missing track and artist fields from the
//! upstream catalog and the open metadata registry.

mod dedup;
mod service;

pub use dedup::{AttemptGuard, AttemptLedger, BackfillKind, Rejected};
pub use service::{
    BackfillBatchReport, BackfillConfig, BackfillOutcome, BackfillService, SkipReason,
};
