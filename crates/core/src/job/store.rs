//! Job status store trait and errors.

use std::path::PathBuf;
use thiserror::Error;

use super::types::{JobHandle, JobKey, JobRecord, JobStatus};

/// Errors from the status store itself.
#[derive(Debug, Error)]
pub enum StatusStoreError {
    /// The handle does not own the job's current `InProgress` record.
    #[error("handle does not own job {key} (current status: {status})")]
    HandleMismatch { key: String, status: JobStatus },

    #[error("status marker {path} is unreadable: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("refusing to reset {key}: {reason}")]
    ResetRefused { key: String, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode job record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why an admission attempt did not produce a handle.
#[derive(Debug, Error)]
pub enum BeginError {
    #[error("already in progress: {0}")]
    AlreadyInProgress(JobKey),

    #[error("already complete: {0}")]
    AlreadyComplete(JobKey),

    #[error(transparent)]
    Store(#[from] StatusStoreError),
}

/// Durable per-key job status.
///
/// Implementations must serialize `try_begin`, `complete`, `fail` and
/// `reset` per key so that at most one handle is ever live for a key.
pub trait JobStatusStore: Send + Sync {
    /// Moves the job to `InProgress` if it is `NotStarted` or `Failed`.
    ///
    /// Leaves state untouched when it returns an error.
    fn try_begin(&self, key: &JobKey) -> Result<JobHandle, BeginError>;

    /// Moves the job owned by `handle` to `Complete`.
    fn complete(&self, handle: JobHandle) -> Result<JobRecord, StatusStoreError>;

    /// Moves the job owned by `handle` to `Failed` with `detail`.
    fn fail(&self, handle: JobHandle, detail: &str) -> Result<JobRecord, StatusStoreError>;

    /// Read-only snapshot. An absent record reads as `NotStarted`.
    fn status_of(&self, key: &JobKey) -> Result<JobRecord, StatusStoreError>;

    /// Operator action clearing an `InProgress` or `Failed` record that no
    /// live worker owns. Returns the record that was cleared.
    fn reset(&self, key: &JobKey) -> Result<JobRecord, StatusStoreError>;
}
