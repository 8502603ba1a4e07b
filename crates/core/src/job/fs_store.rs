//! Status store backed by per-episode marker files.

use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifact::{ArtifactKind, ArtifactStore};

use super::store::{BeginError, JobStatusStore, StatusStoreError};
use super::types::{JobHandle, JobKey, JobRecord, JobStatus, LiveTokens};

/// Plain-text marker content written by older deployments.
const LEGACY_IN_PROGRESS: &str = "In progress";
const LEGACY_ERROR_PREFIX: &str = "Error";

/// Job status kept in `{episode_id}{suffix}` marker files next to the
/// episode's artifacts.
///
/// Markers hold a JSON [`JobRecord`]. Legacy plain-text markers
/// (`In progress`, `Error\n<detail>`) are still understood. When no marker
/// exists the job reads as `Complete` if the stage's distinct output artifact
/// is populated, and `NotStarted` otherwise.
///
/// All transitions for a key run under a per-key lock, and markers are
/// replaced atomically via rename. A key's lock exists only while some
/// transition on it is running.
pub struct FsJobStatusStore {
    artifacts: ArtifactStore,
    locks: Mutex<HashMap<JobKey, Arc<Mutex<()>>>>,
    /// Tokens of handles issued by this store and not yet dropped.
    live: Arc<LiveTokens>,
}

impl FsJobStatusStore {
    pub fn new(artifacts: ArtifactStore) -> Self {
        Self {
            artifacts,
            locks: Mutex::new(HashMap::new()),
            live: Arc::new(LiveTokens::default()),
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Number of handles currently owned by workers.
    pub fn live_jobs(&self) -> usize {
        self.live.len()
    }

    /// Runs `f` holding the key's lock, then drops the lock's entry unless
    /// another caller is waiting on it.
    fn locked<T>(&self, key: &JobKey, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        drop(lock);

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
        result
    }

    fn read_marker(&self, key: &JobKey) -> Result<Option<JobRecord>, StatusStoreError> {
        let path = self
            .artifacts
            .resolve(&key.episode, ArtifactKind::StatusMarker(key.stage));
        match fs::read_to_string(&path) {
            Ok(content) => parse_marker(&content)
                .map(Some)
                .map_err(|detail| StatusStoreError::Corrupt { path, detail }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StatusStoreError::Io { path, source }),
        }
    }

    fn write_marker(&self, key: &JobKey, record: &JobRecord) -> Result<(), StatusStoreError> {
        let path = self
            .artifacts
            .resolve(&key.episode, ArtifactKind::StatusMarker(key.stage));
        let body = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &body).map_err(|source| StatusStoreError::Io { path, source })
    }

    fn remove_marker(&self, key: &JobKey) -> Result<(), StatusStoreError> {
        let path = self
            .artifacts
            .resolve(&key.episode, ArtifactKind::StatusMarker(key.stage));
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StatusStoreError::Io { path, source }),
        }
    }

    /// Combines the marker with the state of the output artifact.
    fn effective(&self, key: &JobKey, marker: Option<JobRecord>) -> JobRecord {
        let output = self
            .artifacts
            .resolve(&key.episode, key.stage.output_artifact());
        match marker {
            Some(record) if record.status == JobStatus::Complete => {
                // An in-place stage's output may be produced again upstream,
                // so it must still be the file the job left behind. Other
                // outputs are later rewritten in place and only need to exist.
                let still_valid = match record.output {
                    Some(recorded) if key.stage.is_in_place() => {
                        self.artifacts.fingerprint(&output) == Some(recorded)
                    }
                    _ => self.artifacts.is_populated(&output),
                };
                if still_valid {
                    record
                } else {
                    JobRecord::not_started()
                }
            }
            Some(record) => record,
            None if !key.stage.is_in_place() && self.artifacts.is_populated(&output) => {
                JobRecord::inferred_complete()
            }
            None => JobRecord::not_started(),
        }
    }

    /// Checks the handle owns the current record, then writes `next`.
    fn finish(
        &self,
        handle: &JobHandle,
        next: impl FnOnce() -> JobRecord,
    ) -> Result<JobRecord, StatusStoreError> {
        let key = handle.key();
        let current = self.read_marker(key)?;
        let owned = matches!(
            &current,
            Some(record) if record.status == JobStatus::InProgress
                && record.token.as_deref() == Some(handle.token())
        );
        if !owned {
            let status = current.map(|r| r.status).unwrap_or(JobStatus::NotStarted);
            return Err(StatusStoreError::HandleMismatch {
                key: key.to_string(),
                status,
            });
        }

        let record = next();
        self.write_marker(key, &record)?;
        Ok(record)
    }
}

impl JobStatusStore for FsJobStatusStore {
    fn try_begin(&self, key: &JobKey) -> Result<JobHandle, BeginError> {
        self.locked(key, || {
            let marker = self.read_marker(key)?;
            let current = self.effective(key, marker);
            match current.status {
                JobStatus::InProgress => return Err(BeginError::AlreadyInProgress(key.clone())),
                JobStatus::Complete => return Err(BeginError::AlreadyComplete(key.clone())),
                JobStatus::NotStarted | JobStatus::Failed => {}
            }

            let token = Uuid::new_v4().to_string();
            let started_at = Utc::now();
            self.write_marker(key, &JobRecord::in_progress(token.clone(), started_at))?;

            debug!(job = %key, previous = %current.status, "Job admitted");
            Ok(JobHandle::tracked(
                key.clone(),
                token,
                started_at,
                Arc::clone(&self.live),
            ))
        })
    }

    fn complete(&self, handle: JobHandle) -> Result<JobRecord, StatusStoreError> {
        let key = handle.key().clone();
        self.locked(&key, || {
            self.finish(&handle, || {
                let output = self.artifacts.resolve(&key.episode, key.stage.output_artifact());
                JobRecord {
                    status: JobStatus::Complete,
                    started_at: Some(handle.started_at()),
                    finished_at: Some(Utc::now()),
                    output: self.artifacts.fingerprint(&output),
                    ..JobRecord::not_started()
                }
            })
        })
    }

    fn fail(&self, handle: JobHandle, detail: &str) -> Result<JobRecord, StatusStoreError> {
        let key = handle.key().clone();
        self.locked(&key, || {
            self.finish(&handle, || JobRecord {
                status: JobStatus::Failed,
                error_detail: Some(detail.to_string()),
                started_at: Some(handle.started_at()),
                finished_at: Some(Utc::now()),
                ..JobRecord::not_started()
            })
        })
    }

    fn status_of(&self, key: &JobKey) -> Result<JobRecord, StatusStoreError> {
        let marker = self.read_marker(key)?;
        Ok(self.effective(key, marker))
    }

    fn reset(&self, key: &JobKey) -> Result<JobRecord, StatusStoreError> {
        self.locked(key, || {
            let marker = match self.read_marker(key) {
                Ok(marker) => marker,
                Err(StatusStoreError::Corrupt { path, detail }) => {
                    warn!(job = %key, path = %path.display(), %detail, "Clearing unreadable status marker");
                    self.remove_marker(key)?;
                    return Ok(JobRecord::failed(detail));
                }
                Err(e) => return Err(e),
            };
            let had_marker = marker.is_some();
            let current = self.effective(key, marker);

            match current.status {
                JobStatus::Complete => {
                    return Err(StatusStoreError::ResetRefused {
                        key: key.to_string(),
                        reason: "job is complete; remove its output artifact to run it again"
                            .to_string(),
                    })
                }
                JobStatus::InProgress
                    if current.token.as_deref().is_some_and(|t| self.live.contains(t)) =>
                {
                    return Err(StatusStoreError::ResetRefused {
                        key: key.to_string(),
                        reason: "job is owned by a running worker".to_string(),
                    })
                }
                _ => {}
            }

            if had_marker {
                self.remove_marker(key)?;
                info!(job = %key, previous = %current.status, "Job record reset");
            }
            Ok(current)
        })
    }
}

/// Parses a marker file, accepting both JSON records and legacy plain text.
fn parse_marker(content: &str) -> Result<JobRecord, String> {
    let trimmed = content.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).map_err(|e| e.to_string());
    }
    if trimmed.is_empty() {
        return Ok(JobRecord::failed("status marker is empty"));
    }
    if trimmed == LEGACY_IN_PROGRESS {
        return Ok(JobRecord {
            status: JobStatus::InProgress,
            ..JobRecord::not_started()
        });
    }
    if let Some(rest) = trimmed.strip_prefix(LEGACY_ERROR_PREFIX) {
        let detail = rest.trim();
        if detail.is_empty() {
            return Ok(JobRecord::failed(LEGACY_ERROR_PREFIX));
        }
        return Ok(JobRecord::failed(detail));
    }
    Ok(JobRecord::failed(trimmed))
}

/// Writes to a sibling temp file and renames it over `path`.
fn write_atomic(path: &Path, body: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(body)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
