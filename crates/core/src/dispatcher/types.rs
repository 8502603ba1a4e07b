//! Types for the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::EpisodeRef;
use crate::job::{JobKey, JobRecord, StageKind, StatusStoreError};
use crate::pipeline::{PipelineKind, PipelineParams, PipelineResult};
use crate::stage::{ParamError, PoolStatus, PreconditionError};

/// Why a submission was not accepted.
///
/// Every variant is returned before any job state is touched.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    InvalidId(String),

    #[error(transparent)]
    MissingField(#[from] ParamError),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error("already in progress: {0}")]
    AlreadyInProgress(JobKey),

    #[error("already complete: {0}")]
    AlreadyComplete(JobKey),

    #[error("pipeline has no stages")]
    EmptyPipeline,

    #[error("too many pending pipelines (limit {limit})")]
    QueueFull { limit: usize },

    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error("job status store error: {0}")]
    Store(#[from] StatusStoreError),
}

impl DispatchError {
    /// True when the request itself can be fixed and retried, as opposed to
    /// the service being temporarily unable to take work.
    pub fn is_rejection(&self) -> bool {
        !self.is_store_fault()
            && !matches!(self, DispatchError::QueueFull { .. } | DispatchError::ShuttingDown)
    }

    /// True when job records could not be read or written.
    pub fn is_store_fault(&self) -> bool {
        matches!(
            self,
            DispatchError::Store(_) | DispatchError::Precondition(PreconditionError::Store(_))
        )
    }

    /// Metric label for the admission result.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            DispatchError::QueueFull { .. } => "queue_full",
            DispatchError::ShuttingDown => "shutting_down",
            e if e.is_store_fault() => "error",
            _ => "rejected",
        }
    }
}

/// A request to run one of the standard pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub episode: EpisodeRef,
    pub pipeline: PipelineKind,
    #[serde(default)]
    pub params: PipelineParams,
}

impl SubmitRequest {
    pub fn new(episode: EpisodeRef, pipeline: PipelineKind, params: PipelineParams) -> Self {
        Self {
            episode,
            pipeline,
            params,
        }
    }
}

/// Returned when a pipeline has been handed to the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub pipeline_id: String,
    pub message: String,
}

/// An accepted pipeline that has not finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivePipeline {
    pub pipeline_id: String,
    pub pipeline: String,
    pub episode: EpisodeRef,
    pub stages: Vec<StageKind>,
    pub accepted_at: DateTime<Utc>,
}

/// Job record of one stage of an episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStatus {
    pub stage: StageKind,
    #[serde(flatten)]
    pub record: JobRecord,
}

/// Snapshot of the dispatcher for the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherStatus {
    pub accepting: bool,
    pub pending_pipelines: usize,
    pub max_pending_pipelines: usize,
    pub active: Vec<ActivePipeline>,
    pub stages: Vec<PoolStatus>,
    /// Most recently finished first.
    pub recent: Vec<PipelineResult>,
}
