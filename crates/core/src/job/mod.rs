//! Durable job records keyed by (podcast, episode, stage).
//!
//! A job is admitted by [`JobStatusStore::try_begin`], which atomically moves
//! it from `NotStarted`/`Failed` to `InProgress` and hands back a
//! [`JobHandle`]. The worker owning the handle finishes the job with exactly
//! one of `complete` or `fail`.

mod fs_store;
mod store;
mod types;

pub use fs_store::FsJobStatusStore;
pub use store::{BeginError, JobStatusStore, StatusStoreError};
pub use types::{JobHandle, JobKey, JobRecord, JobStatus, StageKind};
