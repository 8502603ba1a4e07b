//! Admission and background hand-off of pipelines.

use chrono::Utc;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::types::{
    Accepted, ActivePipeline, DispatchError, DispatcherStatus, StageStatus, SubmitRequest,
};
use crate::artifact::EpisodeRef;
use crate::config::DispatcherConfig;
use crate::job::{BeginError, JobHandle, JobKey, JobRecord, StageKind, StatusStoreError};
use crate::metrics::{PENDING_PIPELINES, PIPELINES_FINISHED, SUBMISSIONS_TOTAL};
use crate::pipeline::{PipelineOrchestrator, PipelinePlan, PipelineResult};
use crate::stage::StageRunner;

/// A reserved slot in the bounded admission queue. Released on drop.
struct PendingSlot {
    pending: Arc<AtomicUsize>,
}

impl PendingSlot {
    fn try_reserve(pending: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < limit).then_some(n + 1))
            .ok()?;
        PENDING_PIPELINES.inc();
        Some(Self {
            pending: Arc::clone(pending),
        })
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        PENDING_PIPELINES.dec();
    }
}

/// The boundary between request handling and background work.
///
/// `submit` does every check synchronously and admits the first stage before
/// returning; the pipeline itself runs on a spawned task.
pub struct Dispatcher {
    orchestrator: Arc<PipelineOrchestrator>,
    max_pending: usize,
    history_limit: usize,
    pending: Arc<AtomicUsize>,
    accepting: AtomicBool,
    active: Arc<Mutex<HashMap<String, ActivePipeline>>>,
    history: Arc<RwLock<VecDeque<PipelineResult>>>,
}

impl Dispatcher {
    pub fn new(config: &DispatcherConfig, runner: Arc<StageRunner>) -> Self {
        Self {
            orchestrator: Arc::new(PipelineOrchestrator::new(runner)),
            max_pending: config.max_pending_pipelines.max(1),
            history_limit: config.result_history,
            pending: Arc::new(AtomicUsize::new(0)),
            accepting: AtomicBool::new(true),
            active: Arc::new(Mutex::new(HashMap::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    fn runner(&self) -> &Arc<StageRunner> {
        self.orchestrator.runner()
    }

    /// Submits one of the standard pipelines.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Accepted, DispatchError> {
        let message = request.pipeline.acceptance_message();
        match PipelinePlan::for_kind(request.pipeline, request.episode, &request.params) {
            Ok(plan) => self.submit_plan(plan, message).await,
            Err(e) => {
                let err = DispatchError::from(e);
                SUBMISSIONS_TOTAL
                    .with_label_values(&[request.pipeline.as_str(), err.label()])
                    .inc();
                Err(err)
            }
        }
    }

    /// Submits an arbitrary ordered list of stages.
    ///
    /// Never suspends between admitting the first job and spawning the task
    /// that owns it, so a caller dropping this future cannot strand the job.
    pub async fn submit_plan(
        &self,
        plan: PipelinePlan,
        message: &str,
    ) -> Result<Accepted, DispatchError> {
        match self.admit(&plan) {
            Ok((handle, slot)) => {
                SUBMISSIONS_TOTAL
                    .with_label_values(&[plan.name.as_str(), "accepted"])
                    .inc();
                let pipeline_id = plan.pipeline_id.clone();
                self.spawn(plan, handle, slot);
                Ok(Accepted {
                    pipeline_id,
                    message: message.to_string(),
                })
            }
            Err(e) => {
                SUBMISSIONS_TOTAL
                    .with_label_values(&[plan.name.as_str(), e.label()])
                    .inc();
                debug!(pipeline = %plan.name, episode = %plan.episode, error = %e, "Submission rejected");
                Err(e)
            }
        }
    }

    /// Runs every admission check, then begins the first stage's job.
    /// Nothing is mutated unless it succeeds.
    fn admit(&self, plan: &PipelinePlan) -> Result<(JobHandle, PendingSlot), DispatchError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(DispatchError::ShuttingDown);
        }
        plan.episode
            .validate()
            .map_err(|e| DispatchError::InvalidId(e.to_string()))?;
        let first = plan.stages.first().ok_or(DispatchError::EmptyPipeline)?;
        let runner = self.runner();
        for params in &plan.stages {
            runner.validate_params(params)?;
        }

        runner.check_precondition(&plan.episode, first)?;
        // Later stages' inputs do not exist yet; only their static
        // requirements can be checked now.
        for params in &plan.stages[1..] {
            runner.check_requirements(params)?;
        }

        let slot = PendingSlot::try_reserve(&self.pending, self.max_pending).ok_or(
            DispatchError::QueueFull {
                limit: self.max_pending,
            },
        )?;

        let key = JobKey::new(plan.episode.clone(), first.kind());
        let handle = runner.store().try_begin(&key).map_err(|e| match e {
            BeginError::AlreadyInProgress(key) => DispatchError::AlreadyInProgress(key),
            BeginError::AlreadyComplete(key) => DispatchError::AlreadyComplete(key),
            BeginError::Store(e) => DispatchError::Store(e),
        })?;
        Ok((handle, slot))
    }

    /// Hands an admitted pipeline to a background task. The task owns the
    /// pending slot until the pipeline finishes.
    fn spawn(&self, plan: PipelinePlan, handle: JobHandle, slot: PendingSlot) {
        let entry = ActivePipeline {
            pipeline_id: plan.pipeline_id.clone(),
            pipeline: plan.name.clone(),
            episode: plan.episode.clone(),
            stages: plan.stage_kinds(),
            accepted_at: Utc::now(),
        };
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.pipeline_id.clone(), entry);

        info!(
            pipeline_id = %plan.pipeline_id,
            pipeline = %plan.name,
            podcast_id = %plan.episode.podcast_id,
            episode_id = %plan.episode.episode_id,
            "Pipeline accepted"
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        let active = Arc::clone(&self.active);
        let history = Arc::clone(&self.history);
        let history_limit = self.history_limit;

        tokio::spawn(async move {
            let _slot = slot;
            let pipeline_id = plan.pipeline_id.clone();
            let name = plan.name.clone();
            let result = AssertUnwindSafe(orchestrator.run(plan, handle))
                .catch_unwind()
                .await;

            active
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&pipeline_id);
            match result {
                Ok(result) => {
                    let label = if result.success { "success" } else { "failed" };
                    PIPELINES_FINISHED
                        .with_label_values(&[name.as_str(), label])
                        .inc();
                    if history_limit > 0 {
                        let mut history = history.write().await;
                        history.push_front(result);
                        history.truncate(history_limit);
                    }
                }
                Err(_) => {
                    PIPELINES_FINISHED
                        .with_label_values(&[name.as_str(), "panicked"])
                        .inc();
                    error!(%pipeline_id, "Pipeline task panicked");
                }
            }
        });
    }

    /// Current record of one job.
    pub fn status_of(&self, key: &JobKey) -> Result<JobRecord, StatusStoreError> {
        self.runner().store().status_of(key)
    }

    /// Records of every stage of an episode.
    pub fn episode_status(&self, episode: &EpisodeRef) -> Result<Vec<StageStatus>, DispatchError> {
        episode
            .validate()
            .map_err(|e| DispatchError::InvalidId(e.to_string()))?;
        StageKind::ALL
            .iter()
            .map(|stage| {
                let key = JobKey::new(episode.clone(), *stage);
                Ok(StageStatus {
                    stage: *stage,
                    record: self.status_of(&key)?,
                })
            })
            .collect()
    }

    /// Operator reset of a job left without a live owner.
    pub async fn reset(&self, key: &JobKey) -> Result<JobRecord, DispatchError> {
        key.episode
            .validate()
            .map_err(|e| DispatchError::InvalidId(e.to_string()))?;
        let cleared = self.runner().store().reset(key)?;
        warn!(job = %key, previous = %cleared.status, "Job reset by operator");
        Ok(cleared)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Result of a finished pipeline still in the history.
    pub async fn result_of(&self, pipeline_id: &str) -> Option<PipelineResult> {
        self.history
            .read()
            .await
            .iter()
            .find(|r| r.pipeline_id == pipeline_id)
            .cloned()
    }

    pub async fn status(&self) -> DispatcherStatus {
        let mut active: Vec<ActivePipeline> = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        active.sort_by_key(|a| a.accepted_at);
        DispatcherStatus {
            accepting: self.accepting.load(Ordering::SeqCst),
            pending_pipelines: self.pending(),
            max_pending_pipelines: self.max_pending,
            active,
            stages: self.runner().pool().statuses(),
            recent: self.history.read().await.iter().cloned().collect(),
        }
    }

    /// Stops accepting submissions and waits up to `grace` for accepted
    /// pipelines to finish. Returns whether they all did.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!(pending = self.pending(), "Dispatcher no longer accepting pipelines");
        }
        let idle = self.wait_idle(grace).await;
        if !idle {
            warn!(
                pending = self.pending(),
                "Pipelines still running at shutdown; their jobs will need a reset"
            );
            self.runner().pool().close();
        }
        idle
    }

    /// Waits until no accepted pipeline is pending, up to `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.pending() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        debug!("Dispatcher idle");
        true
    }
}
