//! Runs a pipeline's stages in order, stopping at the first one that does
//! not complete.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::types::{PipelinePlan, PipelineResult};
use crate::job::{JobHandle, JobKey};
use crate::stage::{StageOutcome, StageRunner};

pub struct PipelineOrchestrator {
    runner: Arc<StageRunner>,
}

impl PipelineOrchestrator {
    pub fn new(runner: Arc<StageRunner>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &Arc<StageRunner> {
        &self.runner
    }

    /// Runs `plan`. The first stage was admitted by the caller and runs under
    /// `first`; every later stage re-checks its precondition and begins its
    /// own job just before it runs.
    ///
    /// Outputs of completed stages are kept when a later stage fails.
    pub async fn run(&self, plan: PipelinePlan, first: JobHandle) -> PipelineResult {
        let started_at = Utc::now();
        let episode = plan.episode.clone();
        info!(
            pipeline_id = %plan.pipeline_id,
            pipeline = %plan.name,
            %episode,
            stages = plan.stages.len(),
            "Pipeline started"
        );

        let mut outcomes = Vec::with_capacity(plan.stages.len());
        let mut first = Some(first);
        let mut halted = false;

        for params in &plan.stages {
            let stage = params.kind();
            if halted {
                outcomes.push(StageOutcome::Skipped { stage });
                continue;
            }

            let handle = match first.take() {
                Some(handle) => handle,
                None => match self.admit(&plan, params) {
                    Ok(handle) => handle,
                    Err(reason) => {
                        warn!(pipeline_id = %plan.pipeline_id, %stage, %reason, "Stage rejected");
                        outcomes.push(StageOutcome::Rejected { stage, reason });
                        halted = true;
                        continue;
                    }
                },
            };

            let outcome = self.runner.run(handle, params).await;
            halted = !outcome.is_completed();
            outcomes.push(outcome);
        }

        let failed = outcomes
            .iter()
            .find(|o| !o.is_completed() && !matches!(o, StageOutcome::Skipped { .. }));
        let failed_stage = failed.map(StageOutcome::stage);
        let error = failed.and_then(|o| o.error()).map(str::to_string);
        let success = failed_stage.is_none();

        if success {
            info!(pipeline_id = %plan.pipeline_id, %episode, "Pipeline completed");
        } else {
            warn!(
                pipeline_id = %plan.pipeline_id,
                %episode,
                failed_stage = ?failed_stage,
                error = error.as_deref().unwrap_or(""),
                "Pipeline failed"
            );
        }

        PipelineResult {
            pipeline_id: plan.pipeline_id,
            pipeline: plan.name,
            episode,
            stages: outcomes,
            failed_stage,
            error,
            success,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Precondition check plus admission for a downstream stage.
    fn admit(
        &self,
        plan: &PipelinePlan,
        params: &crate::stage::StageParams,
    ) -> Result<JobHandle, String> {
        self.runner
            .check_precondition(&plan.episode, params)
            .map_err(|e| e.to_string())?;
        let key = JobKey::new(plan.episode.clone(), params.kind());
        self.runner.store().try_begin(&key).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactKind, ArtifactStore, EpisodeRef};
    use crate::job::{FsJobStatusStore, JobStatus, JobStatusStore, StageKind};
    use crate::pipeline::{PipelineKind, PipelineParams};
    use crate::stage::{StagePool, SynthesizeParams};
    use crate::testing::{fixtures, MockEngines, RecordingStatusStore};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        mocks: MockEngines,
        store: Arc<RecordingStatusStore>,
        orchestrator: PipelineOrchestrator,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let config = fixtures::config(dir.path());
        fixtures::provision_podcast(&config.storage, "p1");
        fixtures::provision_speaker(&config.storage, "Default");

        let artifacts = ArtifactStore::new(&config.storage);
        let store = Arc::new(RecordingStatusStore::new(Arc::new(FsJobStatusStore::new(
            artifacts.clone(),
        ))));
        let mocks = MockEngines::new();
        let runner = StageRunner::new(
            artifacts,
            store.clone(),
            mocks.engines(),
            Arc::new(StagePool::new(&config.stages)),
            config.chunking.clone(),
        );
        Harness {
            _dir: dir,
            mocks,
            store,
            orchestrator: PipelineOrchestrator::new(Arc::new(runner)),
        }
    }

    fn plan(kind: PipelineKind) -> PipelinePlan {
        let params = PipelineParams {
            synthesize: Some(SynthesizeParams::new("Hello there. General Kenobi.")),
            ..Default::default()
        };
        PipelinePlan::for_kind(kind, EpisodeRef::new("p1", "e1"), &params).unwrap()
    }

    fn begin(h: &Harness, plan: &PipelinePlan) -> JobHandle {
        let key = JobKey::new(plan.episode.clone(), plan.stages[0].kind());
        h.store.try_begin(&key).unwrap()
    }

    fn artifact(h: &Harness, kind: ArtifactKind) -> std::path::PathBuf {
        h.orchestrator
            .runner()
            .artifacts()
            .resolve(&EpisodeRef::new("p1", "e1"), kind)
    }

    #[tokio::test]
    async fn test_synthesize_then_convert_voice() {
        let h = harness();
        let plan = plan(PipelineKind::SynthesizeThenConvertVoice);
        let first = begin(&h, &plan);

        let result = h.orchestrator.run(plan, first).await;

        assert!(result.success, "{:?}", result);
        assert_eq!(result.stages.len(), 2);
        assert!(result.stages.iter().all(StageOutcome::is_completed));
        assert_eq!(h.mocks.voice_converter.recorded_calls().await.len(), 1);
        assert!(artifact(&h, ArtifactKind::SynthesizedAudio).exists());
    }

    #[tokio::test]
    async fn test_failed_stage_skips_rest() {
        let h = harness();
        h.mocks.synthesizer.set_failure("model not loaded").await;
        let plan = plan(PipelineKind::SynthesizeThenConvertVoice);
        let first = begin(&h, &plan);

        let result = h.orchestrator.run(plan, first).await;

        assert!(!result.success);
        assert_eq!(result.failed_stage, Some(StageKind::Synthesize));
        assert_eq!(result.error.as_deref(), Some("model not loaded"));
        assert_eq!(
            result.stages[1],
            StageOutcome::Skipped {
                stage: StageKind::ConvertVoice
            }
        );
        let attempted: Vec<StageKind> = h.store.begin_attempts().iter().map(|k| k.stage).collect();
        assert_eq!(attempted, vec![StageKind::Synthesize]);
        assert!(h.mocks.voice_converter.recorded_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_downstream_failure_keeps_upstream_output() {
        let h = harness();
        fixtures::write_wav(&artifact(&h, ArtifactKind::SourceAudio), 0.5).unwrap();
        h.mocks.ingestor.set_failure("vector store locked").await;
        let plan = plan(PipelineKind::TranscribeThenIngest);
        let first = begin(&h, &plan);

        let result = h.orchestrator.run(plan, first).await;

        assert_eq!(result.failed_stage, Some(StageKind::Ingest));
        assert_eq!(result.error.as_deref(), Some("vector store locked"));
        assert!(artifact(&h, ArtifactKind::Transcript).exists());
        let ingest = JobKey::new(EpisodeRef::new("p1", "e1"), StageKind::Ingest);
        assert_eq!(h.store.status_of(&ingest).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_downstream_precondition_rejects() {
        let h = harness();
        fixtures::write_wav(&artifact(&h, ArtifactKind::SourceAudio), 0.5).unwrap();
        // Ingest output already present
        std::fs::create_dir_all(artifact(&h, ArtifactKind::VectorIndex)).unwrap();
        std::fs::write(artifact(&h, ArtifactKind::VectorIndex).join("x"), b"x").unwrap();
        let plan = plan(PipelineKind::TranscribeThenIngest);
        let first = begin(&h, &plan);

        let result = h.orchestrator.run(plan, first).await;

        assert_eq!(result.failed_stage, Some(StageKind::Ingest));
        assert!(matches!(result.stages[1], StageOutcome::Rejected { .. }));
        assert!(result
            .error
            .unwrap()
            .starts_with("precondition: output artifact vector_index already exists"));
        assert!(h.mocks.ingestor.recorded_calls().await.is_empty());
    }
}
