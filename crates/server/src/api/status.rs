//! Job status and operator endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use podcast_jobs_core::{
    DispatcherStatus, EpisodeRef, JobKey, JobRecord, StageKind, StageStatus,
};

use super::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// Status of every stage of an episode.
#[derive(Debug, Serialize)]
pub struct EpisodeStatusResponse {
    pub podcast_id: String,
    pub episode_id: String,
    pub stages: Vec<StageStatus>,
}

/// Result of an operator reset.
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub stage: StageKind,
    /// The record that was cleared.
    pub cleared: JobRecord,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the status of every stage of an episode.
pub async fn episode_status(
    State(state): State<Arc<AppState>>,
    Path((podcast_id, episode_id)): Path<(String, String)>,
) -> Result<Json<EpisodeStatusResponse>, ApiError> {
    let episode = EpisodeRef::new(podcast_id, episode_id);
    let stages = state.dispatcher().episode_status(&episode)?;
    Ok(Json(EpisodeStatusResponse {
        podcast_id: episode.podcast_id,
        episode_id: episode.episode_id,
        stages,
    }))
}

/// Get one job record.
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path((podcast_id, episode_id, stage)): Path<(String, String, String)>,
) -> Result<Json<StageStatus>, ApiError> {
    let key = job_key(podcast_id, episode_id, &stage)?;
    let record = state.dispatcher().status_of(&key)?;
    Ok(Json(StageStatus {
        stage: key.stage,
        record,
    }))
}

/// Clear a job left `InProgress` or `Failed` by a worker that is gone.
pub async fn reset_job(
    State(state): State<Arc<AppState>>,
    Path((podcast_id, episode_id, stage)): Path<(String, String, String)>,
) -> Result<Json<ResetResponse>, ApiError> {
    let key = job_key(podcast_id, episode_id, &stage)?;
    let cleared = state.dispatcher().reset(&key).await?;
    info!(job = %key, "Reset requested through API");
    Ok(Json(ResetResponse {
        stage: key.stage,
        cleared,
    }))
}

/// Get stage lane occupancy, active pipelines and recent results.
pub async fn dispatcher_status(State(state): State<Arc<AppState>>) -> Json<DispatcherStatus> {
    Json(state.dispatcher().status().await)
}

fn job_key(podcast_id: String, episode_id: String, stage: &str) -> Result<JobKey, ApiError> {
    let stage: StageKind = stage.parse().map_err(ApiError::BadRequest)?;
    let episode = EpisodeRef::new(podcast_id, episode_id);
    episode
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(JobKey::new(episode, stage))
}
