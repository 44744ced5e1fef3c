use super::tracker::OperationType;
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

/// Metric name prefix for all discovery metrics
const PREFIX: &str = "pezzottify_discovery";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref LOOKUP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_lookup_requests_total"), "Lookups entering the tier cascade"),
        &["operation"]
    ).expect("Failed to create lookup_requests_total metric");

    pub static ref LOOKUP_OUTCOMES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_lookup_outcomes_total"), "Lookups by the tier that answered"),
        &["operation", "tier"]
    ).expect("Failed to create lookup_outcomes_total metric");

    pub static ref UPSTREAM_CALL_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_upstream_call_duration_seconds"),
            "Upstream catalog call duration in seconds"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["operation"]
    ).expect("Failed to create upstream_call_duration_seconds metric");

    pub static ref DB_QUERY_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_db_query_duration_seconds"),
            "Discovery database query duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["operation"]
    ).expect("Failed to create db_query_duration_seconds metric");

    pub static ref BACKFILL_ATTEMPTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_backfill_attempts_total"), "Backfill attempts by outcome"),
        &["kind", "outcome"]
    ).expect("Failed to create backfill_attempts_total metric");

    pub static ref PREP_JOBS: Gauge = Gauge::new(
        format!("{PREFIX}_prep_jobs"),
        "Prep jobs currently held in memory"
    ).expect("Failed to create prep_jobs metric");
}

/// Register all metrics. Safe to call more than once.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(LOOKUP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LOOKUP_OUTCOMES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPSTREAM_CALL_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(DB_QUERY_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKFILL_ATTEMPTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PREP_JOBS.clone()));

    tracing::info!("Discovery metrics initialized");
}

pub fn record_lookup_request(op: OperationType) {
    LOOKUP_REQUESTS_TOTAL.with_label_values(&[op.as_str()]).inc();
}

pub fn record_lookup_outcome(op: OperationType, tier: &str) {
    LOOKUP_OUTCOMES_TOTAL
        .with_label_values(&[op.as_str(), tier])
        .inc();
}

pub fn record_upstream_call(op: OperationType, duration_ms: u64) {
    UPSTREAM_CALL_DURATION_SECONDS
        .with_label_values(&[op.as_str()])
        .observe(duration_ms as f64 / 1000.0);
}

pub fn record_db_query(operation: &str, duration_ms: u64) {
    DB_QUERY_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration_ms as f64 / 1000.0);
}

pub fn record_backfill_attempt(kind: &str, outcome: &str) {
    BACKFILL_ATTEMPTS_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();
}

pub fn set_prep_jobs(count: usize) {
    PREP_JOBS.set(count as f64);
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather_text() -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
