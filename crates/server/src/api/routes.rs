use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{handlers, jobs, middleware::metrics_middleware, status};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Operational routes
    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status/{podcast_id}/{episode_id}", get(status::episode_status))
        .route("/status/{podcast_id}/{episode_id}/{stage}", get(status::job_status))
        .route(
            "/status/{podcast_id}/{episode_id}/{stage}/reset",
            post(status::reset_job),
        )
        .route("/dispatcher/status", get(status::dispatcher_status));

    Router::new()
        // Stage submissions
        .route("/stt", post(jobs::stt))
        .route("/stt_ingest", post(jobs::stt_ingest))
        .route("/ingest", post(jobs::ingest))
        .route("/tts", post(jobs::tts))
        .route("/rvc", post(jobs::rvc))
        .route("/tts_rvc", post(jobs::tts_rvc))
        .route(
            "/{podcast_id}/{episode_file_name}/create_transcript",
            get(jobs::create_transcript),
        )
        .route("/metrics", get(handlers::metrics))
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
