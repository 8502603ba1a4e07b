//! Status store wrapper recording admission attempts.

use std::sync::{Arc, Mutex, PoisonError};

use crate::job::{BeginError, JobHandle, JobKey, JobRecord, JobStatusStore, StatusStoreError};

/// Delegates to an inner store and records every `try_begin` key, in call
/// order, whether or not admission succeeded.
pub struct RecordingStatusStore {
    inner: Arc<dyn JobStatusStore>,
    begun: Mutex<Vec<JobKey>>,
}

impl RecordingStatusStore {
    pub fn new(inner: Arc<dyn JobStatusStore>) -> Self {
        Self {
            inner,
            begun: Mutex::new(Vec::new()),
        }
    }

    /// Keys passed to `try_begin` so far.
    pub fn begin_attempts(&self) -> Vec<JobKey> {
        self.begun
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl JobStatusStore for RecordingStatusStore {
    fn try_begin(&self, key: &JobKey) -> Result<JobHandle, BeginError> {
        self.begun
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key.clone());
        self.inner.try_begin(key)
    }

    fn complete(&self, handle: JobHandle) -> Result<JobRecord, StatusStoreError> {
        self.inner.complete(handle)
    }

    fn fail(&self, handle: JobHandle, detail: &str) -> Result<JobRecord, StatusStoreError> {
        self.inner.fail(handle, detail)
    }

    fn status_of(&self, key: &JobKey) -> Result<JobRecord, StatusStoreError> {
        self.inner.status_of(key)
    }

    fn reset(&self, key: &JobKey) -> Result<JobRecord, StatusStoreError> {
        self.inner.reset(key)
    }
}
