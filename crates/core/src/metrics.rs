//! Prometheus metrics for the stage poller.

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Claims
// =============================================================================

/// Sessions claimed by a stage loop.
pub static SESSIONS_CLAIMED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ezbids_sessions_claimed_total", "Total sessions claimed"),
        &["stage"],
    )
    .unwrap()
});

/// Claims lost to another worker.
pub static CLAIM_CONFLICTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ezbids_claim_conflicts_total",
            "Claims lost because the session had already moved",
        ),
        &["stage"],
    )
    .unwrap()
});

/// In-progress sessions failed because their claim went stale.
pub static STALE_CLAIMS_REAPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ezbids_stale_claims_reaped_total",
            "In-progress sessions failed after their claim went stale",
        ),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Handlers
// =============================================================================

/// Stage results by outcome.
pub static STAGE_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ezbids_stage_outcomes_total", "Stage handler results"),
        &["stage", "result"], // "success", or a StageError kind
    )
    .unwrap()
});

/// Stage handler duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("ezbids_stage_duration_seconds", "Duration of stage handlers")
            .buckets(vec![
                1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 14400.0,
            ]),
        &["stage", "result"], // "success", "failed"
    )
    .unwrap()
});

/// Stage handlers currently running.
pub static HANDLERS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ezbids_stage_handlers_active",
        "Number of stage handlers currently running",
    )
    .unwrap()
});

/// All core metrics, for registration by the server.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(SESSIONS_CLAIMED.clone()),
        Box::new(CLAIM_CONFLICTS.clone()),
        Box::new(STALE_CLAIMS_REAPED.clone()),
        Box::new(STAGE_OUTCOMES.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(HANDLERS_ACTIVE.clone()),
    ]
}
