//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Dispatcher admissions and pending pipelines
//! - Stage runs and their durations
//! - Finished pipelines

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Dispatcher Metrics
// =============================================================================

/// Submissions total by pipeline and admission result.
pub static SUBMISSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("podjobs_submissions_total", "Total pipeline submissions"),
        &["pipeline", "result"], // "accepted", "rejected", "queue_full"
    )
    .unwrap()
});

/// Accepted pipelines that have not finished.
pub static PENDING_PIPELINES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "podjobs_pending_pipelines",
        "Accepted pipelines that have not finished yet",
    )
    .unwrap()
});

/// Finished pipelines by result.
pub static PIPELINES_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("podjobs_pipelines_finished_total", "Total finished pipelines"),
        &["pipeline", "result"], // "success", "failed"
    )
    .unwrap()
});

// =============================================================================
// Stage Metrics
// =============================================================================

/// Stage runs total by stage and result.
pub static STAGE_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("podjobs_stage_runs_total", "Total stage runs"),
        &["stage", "result"], // "completed", "failed", "timeout", "postcondition_violation"
    )
    .unwrap()
});

/// Stage execution duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "podjobs_stage_duration_seconds",
            "Duration of stage execution",
        )
        .buckets(vec![
            1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0,
        ]),
        &["stage"],
    )
    .unwrap()
});

/// Returns all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Dispatcher
        Box::new(SUBMISSIONS_TOTAL.clone()),
        Box::new(PENDING_PIPELINES.clone()),
        Box::new(PIPELINES_FINISHED.clone()),
        // Stages
        Box::new(STAGE_RUNS_TOTAL.clone()),
        Box::new(STAGE_DURATION.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register_cleanly() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        STAGE_RUNS_TOTAL
            .with_label_values(&["transcribe", "completed"])
            .inc();
        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"podjobs_stage_runs_total".to_string()));
    }
}
