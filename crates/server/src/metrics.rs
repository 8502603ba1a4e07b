//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the job server:
//! - HTTP request metrics (latency, counts)
//! - Stage lane occupancy (collected dynamically)
//! - Core dispatcher and stage metrics, registered alongside

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "podjobs_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("podjobs_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "podjobs_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Stage Lane Metrics
// =============================================================================

/// Jobs executing per stage lane.
pub static STAGE_LANE_ACTIVE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("podjobs_stage_lane_active", "Jobs executing in each stage lane"),
        &["stage"],
    )
    .unwrap()
});

/// Jobs waiting for a slot per stage lane.
pub static STAGE_LANE_QUEUED: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("podjobs_stage_lane_queued", "Jobs waiting for a stage lane slot"),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Stage lanes
    registry
        .register(Box::new(STAGE_LANE_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(STAGE_LANE_QUEUED.clone()))
        .unwrap();

    // Core metrics (dispatcher, stages)
    for metric in podcast_jobs_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Updates gauges from the current stage lane occupancy.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.dispatcher().status().await;
    for lane in status.stages {
        let stage = lane.stage.as_str();
        STAGE_LANE_ACTIVE
            .with_label_values(&[stage])
            .set(lane.active_jobs as i64);
        STAGE_LANE_QUEUED
            .with_label_values(&[stage])
            .set(lane.queued_jobs as i64);
    }
}

static STATUS_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/api/v1/status/[^/]+/[^/]+").unwrap());
static LEGACY_TRANSCRIPT_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/[^/]+/[^/]+/create_transcript$").unwrap());

/// Normalize a path for metric labels (replace podcast and episode ids with
/// placeholders).
pub fn normalize_path(path: &str) -> String {
    if let Some(m) = STATUS_PATH.find(path) {
        return format!("/api/v1/status/{{podcast_id}}/{{episode_id}}{}", &path[m.end()..]);
    }
    if LEGACY_TRANSCRIPT_PATH.is_match(path) && !path.starts_with("/api/") {
        return "/{podcast_id}/{episode_file_name}/create_transcript".to_string();
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_status() {
        let path = "/api/v1/status/42/episode-7/convert_voice/reset";
        assert_eq!(
            normalize_path(path),
            "/api/v1/status/{podcast_id}/{episode_id}/convert_voice/reset"
        );
    }

    #[test]
    fn test_normalize_path_legacy_transcript() {
        let path = "/42/intro.mp3/create_transcript";
        assert_eq!(
            normalize_path(path),
            "/{podcast_id}/{episode_file_name}/create_transcript"
        );
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/tts_rvc"), "/tts_rvc");
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("podjobs_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_core_metrics() {
        HTTP_REQUEST_DURATION
            .with_label_values(&["GET", "/test", "200"])
            .observe(0.1);
        STAGE_LANE_ACTIVE.with_label_values(&["transcribe"]).set(0);
        podcast_jobs_core::metrics::PENDING_PIPELINES.set(0);
        podcast_jobs_core::metrics::SUBMISSIONS_TOTAL
            .with_label_values(&["transcribe", "accepted"])
            .inc_by(0);

        let output = encode_metrics();

        assert!(output.contains("podjobs_http_request_duration_seconds"));
        assert!(output.contains("podjobs_stage_lane_active"));
        assert!(output.contains("podjobs_pending_pipelines"));
        assert!(output.contains("podjobs_submissions_total"));
    }
}
