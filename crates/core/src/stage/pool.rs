//! Bounded execution lanes, one per stage kind.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

use crate::config::StagesConfig;
use crate::job::StageKind;

/// Status of one stage lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub stage: StageKind,
    /// Jobs currently executing.
    pub active_jobs: usize,
    pub max_concurrent: usize,
    /// Jobs admitted and waiting for a slot.
    pub queued_jobs: usize,
    pub total_processed: u64,
    pub total_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Default)]
struct PoolStats {
    active: AtomicU64,
    queued: AtomicU64,
    total_processed: AtomicU64,
    total_failed: AtomicU64,
}

struct Lane {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    timeout: Option<Duration>,
    stats: Arc<PoolStats>,
}

/// A held execution slot. Releases the slot when dropped.
pub struct LanePermit {
    _permit: OwnedSemaphorePermit,
    stats: Arc<PoolStats>,
}

impl Drop for LanePermit {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Per stage kind concurrency limits.
///
/// GPU-bound stages are normally configured with a single slot so that
/// jobs queue for the device instead of competing for it.
pub struct StagePool {
    lanes: HashMap<StageKind, Lane>,
}

impl StagePool {
    pub fn new(config: &StagesConfig) -> Self {
        let lanes = config
            .iter()
            .map(|(kind, lane)| {
                let max_concurrent = lane.max_concurrent.max(1);
                (
                    kind,
                    Lane {
                        semaphore: Arc::new(Semaphore::new(max_concurrent)),
                        max_concurrent,
                        timeout: (lane.timeout_secs > 0)
                            .then(|| Duration::from_secs(lane.timeout_secs)),
                        stats: Arc::new(PoolStats::default()),
                    },
                )
            })
            .collect();
        Self { lanes }
    }

    fn lane(&self, kind: StageKind) -> &Lane {
        // Every kind gets a lane in `new`
        &self.lanes[&kind]
    }

    /// Waits for a free slot in the stage's lane.
    pub async fn acquire(&self, kind: StageKind) -> Result<LanePermit, AcquireError> {
        let lane = self.lane(kind);
        lane.stats.queued.fetch_add(1, Ordering::Relaxed);
        let permit = Arc::clone(&lane.semaphore).acquire_owned().await;
        lane.stats.queued.fetch_sub(1, Ordering::Relaxed);
        let permit = permit?;
        lane.stats.active.fetch_add(1, Ordering::Relaxed);
        Ok(LanePermit {
            _permit: permit,
            stats: Arc::clone(&lane.stats),
        })
    }

    /// Stops handing out slots. Waiting and future `acquire` calls fail.
    pub fn close(&self) {
        for lane in self.lanes.values() {
            lane.semaphore.close();
        }
    }

    pub fn timeout(&self, kind: StageKind) -> Option<Duration> {
        self.lane(kind).timeout
    }

    pub fn record_result(&self, kind: StageKind, success: bool) {
        let stats = &self.lane(kind).stats;
        stats.total_processed.fetch_add(1, Ordering::Relaxed);
        if !success {
            stats.total_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn status(&self, kind: StageKind) -> PoolStatus {
        let lane = self.lane(kind);
        PoolStatus {
            stage: kind,
            active_jobs: lane.stats.active.load(Ordering::Relaxed) as usize,
            max_concurrent: lane.max_concurrent,
            queued_jobs: lane.stats.queued.load(Ordering::Relaxed) as usize,
            total_processed: lane.stats.total_processed.load(Ordering::Relaxed),
            total_failed: lane.stats.total_failed.load(Ordering::Relaxed),
            timeout_secs: lane.timeout.map(|d| d.as_secs()),
        }
    }

    pub fn statuses(&self) -> Vec<PoolStatus> {
        StageKind::ALL.iter().map(|kind| self.status(*kind)).collect()
    }
}
