//! Uniform envelope around one engine invocation.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::audio::{self, AudioWindow};
use super::chunking::{merge_transcripts, split_text};
use super::error::{ParamError, PreconditionError, StageError};
use super::params::{
    ConvertVoiceParams, IngestParams, StageParams, SynthesizeParams, TranscribeParams,
    TranscriptSegment,
};
use super::pool::StagePool;
use super::traits::Engines;
use crate::artifact::{ArtifactKind, ArtifactStore, EpisodeRef};
use crate::config::ChunkingConfig;
use crate::job::{JobHandle, JobKey, JobStatus, JobStatusStore, StageKind};
use crate::metrics::{STAGE_DURATION, STAGE_RUNS_TOTAL};

/// What happened to one stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Output verified and the job recorded as complete.
    Completed { stage: StageKind, duration_ms: u64 },
    /// The job ran and was recorded as failed.
    Failed {
        stage: StageKind,
        detail: String,
        duration_ms: u64,
    },
    /// The stage could not be admitted; no job record was touched.
    Rejected { stage: StageKind, reason: String },
    /// Not attempted because an earlier stage did not complete.
    Skipped { stage: StageKind },
}

impl StageOutcome {
    pub fn stage(&self) -> StageKind {
        match self {
            StageOutcome::Completed { stage, .. }
            | StageOutcome::Failed { stage, .. }
            | StageOutcome::Rejected { stage, .. }
            | StageOutcome::Skipped { stage } => *stage,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed { .. })
    }

    /// Failure detail or rejection reason.
    pub fn error(&self) -> Option<&str> {
        match self {
            StageOutcome::Failed { detail, .. } => Some(detail),
            StageOutcome::Rejected { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Runs stages: checks preconditions, executes the engine inside the stage's
/// lane, verifies the output and records the job's terminal status.
///
/// Errors never escape [`run`](Self::run); every failure, including panics
/// and timeouts, ends up as a `Failed` job record.
pub struct StageRunner {
    artifacts: ArtifactStore,
    store: Arc<dyn JobStatusStore>,
    engines: Engines,
    pool: Arc<StagePool>,
    chunking: ChunkingConfig,
}

impl StageRunner {
    pub fn new(
        artifacts: ArtifactStore,
        store: Arc<dyn JobStatusStore>,
        engines: Engines,
        pool: Arc<StagePool>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            artifacts,
            store,
            engines,
            pool,
            chunking,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn store(&self) -> &Arc<dyn JobStatusStore> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<StagePool> {
        &self.pool
    }

    /// Checks a stage's parameters can produce work, including text that
    /// chunking would reduce to nothing.
    pub fn validate_params(&self, params: &StageParams) -> Result<(), ParamError> {
        params.validate()?;
        if let StageParams::Synthesize(p) = params {
            if split_text(&p.text, &p.delimiter, self.chunking.max_chunk_chars).is_empty() {
                return Err(ParamError::EmptyText);
            }
        }
        Ok(())
    }

    /// Checks the stage may start: the podcast exists, the input artifact
    /// exists and is not being written by its producing stage, the output
    /// artifact does not exist, and required speaker assets are present.
    pub fn check_precondition(
        &self,
        episode: &EpisodeRef,
        params: &StageParams,
    ) -> Result<(), PreconditionError> {
        episode.validate()?;
        self.artifacts.ensure_container(&episode.podcast_id)?;

        let stage = params.kind();
        if let Some(artifact) = stage.input_artifact() {
            let path = self.input_path(episode, params)?;
            if !self.artifacts.exists(&path) {
                return Err(PreconditionError::MissingInput { artifact, path });
            }
            if let Some(producer) = stage.producer() {
                let key = JobKey::new(episode.clone(), producer);
                if self.store.status_of(&key)?.status == JobStatus::InProgress {
                    return Err(PreconditionError::InputInProgress {
                        artifact,
                        stage: producer,
                    });
                }
            }
        }

        if !stage.is_in_place() {
            let artifact = stage.output_artifact();
            let path = self.artifacts.resolve(episode, artifact);
            if self.artifacts.exists(&path) {
                return Err(PreconditionError::OutputExists { artifact, path });
            }
        }

        self.check_requirements(params)
    }

    /// Checks requirements that do not depend on earlier stages' output.
    pub fn check_requirements(&self, params: &StageParams) -> Result<(), PreconditionError> {
        let Some(speaker) = params.speaker() else {
            return Ok(());
        };
        let assets = self.artifacts.speaker_assets(speaker)?;
        let required: Vec<&Path> = match params {
            StageParams::ConvertVoice(_) => vec![assets.model.as_path(), assets.index.as_path()],
            _ => vec![assets.dir.as_path()],
        };
        match required.into_iter().find(|path| !path.exists()) {
            Some(missing) => Err(PreconditionError::SpeakerNotFound {
                speaker: speaker.to_string(),
                path: missing.to_path_buf(),
            }),
            None => Ok(()),
        }
    }

    fn input_path(
        &self,
        episode: &EpisodeRef,
        params: &StageParams,
    ) -> Result<PathBuf, PreconditionError> {
        match params {
            StageParams::Transcribe(TranscribeParams {
                source_file: Some(file),
                ..
            }) => Ok(self.artifacts.resolve_named(&episode.podcast_id, file)?),
            other => Ok(self.artifacts.resolve(
                episode,
                other
                    .kind()
                    .input_artifact()
                    .unwrap_or(ArtifactKind::SourceAudio),
            )),
        }
    }

    /// Runs the stage owned by `handle` and records its terminal status.
    pub async fn run(&self, handle: JobHandle, params: &StageParams) -> StageOutcome {
        let key = handle.key().clone();
        let stage = key.stage;
        let episode = key.episode.clone();

        let result = match self.pool.acquire(stage).await {
            Ok(permit) => {
                info!(
                    podcast_id = %episode.podcast_id,
                    episode_id = %episode.episode_id,
                    %stage,
                    engine = self.engines.name_of(stage),
                    "Stage started"
                );
                let started = Instant::now();
                let result = match self.execute_guarded(&episode, params).await {
                    Ok(()) => self.verify_output(&episode, stage).await,
                    Err(e) => Err(e),
                };
                drop(permit);
                (result, started.elapsed())
            }
            Err(e) => (Err(StageError::from(e)), std::time::Duration::ZERO),
        };
        let (result, elapsed) = result;
        let duration_ms = elapsed.as_millis() as u64;

        let (outcome, label) = match result {
            Ok(()) => match self.store.complete(handle) {
                Ok(_) => {
                    info!(job = %key, duration_ms, "Stage completed");
                    (StageOutcome::Completed { stage, duration_ms }, "completed")
                }
                Err(e) => {
                    error!(job = %key, error = %e, "Failed to record stage completion");
                    let detail = format!("failed to record completion: {}", e);
                    (
                        StageOutcome::Failed {
                            stage,
                            detail,
                            duration_ms,
                        },
                        "failed",
                    )
                }
            },
            Err(err) => {
                let label = match err {
                    StageError::Timeout { .. } => "timeout",
                    StageError::Postcondition(_) => "postcondition_violation",
                    _ => "failed",
                };
                let detail = err.detail();
                warn!(job = %key, %detail, "Stage failed");
                self.discard_partial_output(&episode, stage);
                if let Err(e) = self.store.fail(handle, &detail) {
                    error!(job = %key, error = %e, "Failed to record stage failure");
                }
                (
                    StageOutcome::Failed {
                        stage,
                        detail,
                        duration_ms,
                    },
                    label,
                )
            }
        };

        self.remove_scratch(&episode, stage);
        self.pool.record_result(stage, outcome.is_completed());
        STAGE_RUNS_TOTAL
            .with_label_values(&[stage.as_str(), label])
            .inc();
        STAGE_DURATION
            .with_label_values(&[stage.as_str()])
            .observe(elapsed.as_secs_f64());

        outcome
    }

    /// Executes under the stage timeout, turning panics into errors.
    async fn execute_guarded(
        &self,
        episode: &EpisodeRef,
        params: &StageParams,
    ) -> Result<(), StageError> {
        let stage = params.kind();
        let work = AssertUnwindSafe(self.execute(episode, params)).catch_unwind();
        let caught = match self.pool.timeout(stage) {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(caught) => caught,
                Err(_) => {
                    return Err(StageError::Timeout {
                        stage,
                        secs: limit.as_secs(),
                    })
                }
            },
            None => work.await,
        };
        caught.unwrap_or_else(|panic| Err(StageError::Panicked(panic_message(panic.as_ref()))))
    }

    async fn execute(&self, episode: &EpisodeRef, params: &StageParams) -> Result<(), StageError> {
        match params {
            StageParams::Transcribe(p) => self.transcribe(episode, params, p).await,
            StageParams::Ingest(p) => self.ingest(episode, p).await,
            StageParams::Synthesize(p) => self.synthesize(episode, p).await,
            StageParams::ConvertVoice(p) => self.convert_voice(episode, p).await,
        }
    }

    async fn transcribe(
        &self,
        episode: &EpisodeRef,
        params: &StageParams,
        p: &TranscribeParams,
    ) -> Result<(), StageError> {
        let audio = self
            .input_path(episode, params)
            .map_err(|e| StageError::InvalidInput(e.to_string()))?;

        let segments = match self.transcription_windows(episode, &audio).await? {
            Some(windows) => {
                let mut parts = Vec::with_capacity(windows.len());
                for window in windows {
                    debug!(window = %window.path.display(), offset = window.offset_secs, "Transcribing window");
                    let segments = self.engines.transcriber.transcribe(&window.path, p).await?;
                    parts.push((window.offset_secs, segments));
                }
                merge_transcripts(parts)
            }
            None => self.engines.transcriber.transcribe(&audio, p).await?,
        };

        let path = self.artifacts.resolve(episode, ArtifactKind::Transcript);
        write_json_atomic(&path, &segments).await
    }

    /// Splits long WAV input into windows, or returns `None` to transcribe
    /// the file whole.
    async fn transcription_windows(
        &self,
        episode: &EpisodeRef,
        audio: &Path,
    ) -> Result<Option<Vec<AudioWindow>>, StageError> {
        let window_secs = self.chunking.transcribe_chunk_secs;
        let is_wav = audio
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        if window_secs == 0 || !is_wav {
            return Ok(None);
        }

        let input = audio.to_path_buf();
        let info = blocking(move || audio::verify_wav(&input)).await??;
        if info.duration_secs() <= window_secs as f64 {
            return Ok(None);
        }

        let input = audio.to_path_buf();
        let scratch = self
            .artifacts
            .resolve(episode, ArtifactKind::ChunkDir(StageKind::Transcribe));
        let windows = blocking(move || audio::split_wav(&input, &scratch, window_secs)).await??;
        info!(%episode, windows = windows.len(), "Transcribing long input in windows");
        Ok(Some(windows))
    }

    async fn ingest(&self, episode: &EpisodeRef, p: &IngestParams) -> Result<(), StageError> {
        let transcript = self.artifacts.resolve(episode, ArtifactKind::Transcript);
        let index_dir = self.artifacts.resolve(episode, ArtifactKind::VectorIndex);
        self.engines
            .ingestor
            .ingest(&transcript, &index_dir, p)
            .await?;
        Ok(())
    }

    /// Synthesizes chunk by chunk into the scratch directory, then assembles
    /// the chunks in order and moves the result into place.
    async fn synthesize(&self, episode: &EpisodeRef, p: &SynthesizeParams) -> Result<(), StageError> {
        let speaker = self.artifacts.speaker_assets(&p.speaker_name)?;
        let chunks = split_text(&p.text, &p.delimiter, self.chunking.max_chunk_chars);
        if chunks.is_empty() {
            return Err(StageError::InvalidInput(
                "text contains nothing to synthesize".to_string(),
            ));
        }

        let scratch = self
            .artifacts
            .resolve(episode, ArtifactKind::ChunkDir(StageKind::Synthesize));
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(|e| StageError::io(&scratch, e))?;

        let total = chunks.len();
        let mut parts = Vec::with_capacity(total);
        for (index, chunk) in chunks.iter().enumerate() {
            let part = scratch.join(format!("{:04}.wav", index));
            debug!(%episode, chunk = index + 1, total, "Synthesizing chunk");
            self.engines
                .synthesizer
                .synthesize(chunk, &speaker, &part, p)
                .await?;
            parts.push(part);
        }

        let assembled = scratch.join("assembled.wav");
        let crossfade_ms = self.chunking.crossfade_ms;
        let target = assembled.clone();
        blocking(move || audio::concat_wav(&parts, &target, crossfade_ms)).await??;

        let output = self.artifacts.resolve(episode, ArtifactKind::SynthesizedAudio);
        tokio::fs::rename(&assembled, &output)
            .await
            .map_err(|e| StageError::io(&output, e))
    }

    async fn convert_voice(
        &self,
        episode: &EpisodeRef,
        p: &ConvertVoiceParams,
    ) -> Result<(), StageError> {
        let speaker = self.artifacts.speaker_assets(&p.speaker_name)?;
        let input = self.artifacts.resolve(episode, ArtifactKind::SynthesizedAudio);
        let staging = self.artifacts.resolve(episode, ArtifactKind::VoiceStaging);
        self.artifacts.remove(&staging)?;
        self.engines
            .voice_converter
            .convert(&input, &staging, &speaker, p)
            .await?;
        Ok(())
    }

    /// Checks the stage's output is present and usable. Voice conversion
    /// output is promoted over the synthesized audio only once it passes.
    async fn verify_output(&self, episode: &EpisodeRef, stage: StageKind) -> Result<(), StageError> {
        match stage {
            StageKind::Transcribe => {
                let path = self.artifacts.resolve(episode, ArtifactKind::Transcript);
                let body = tokio::fs::read(&path).await.map_err(|_| {
                    StageError::postcondition(format!("transcript {} was not written", path.display()))
                })?;
                let segments: Vec<TranscriptSegment> = serde_json::from_slice(&body)
                    .map_err(|e| StageError::postcondition(format!("transcript is not parseable: {}", e)))?;
                if segments.is_empty() {
                    return Err(StageError::postcondition("transcript has no segments"));
                }
                Ok(())
            }
            StageKind::Ingest => {
                let path = self.artifacts.resolve(episode, ArtifactKind::VectorIndex);
                if self.artifacts.is_populated(&path) {
                    Ok(())
                } else {
                    Err(StageError::postcondition(format!(
                        "vector index {} is missing or empty",
                        path.display()
                    )))
                }
            }
            StageKind::Synthesize => {
                let path = self.artifacts.resolve(episode, ArtifactKind::SynthesizedAudio);
                verify_audio(path, "synthesized audio").await
            }
            StageKind::ConvertVoice => {
                let staging = self.artifacts.resolve(episode, ArtifactKind::VoiceStaging);
                verify_audio(staging.clone(), "converted audio").await?;
                let output = self.artifacts.resolve(episode, ArtifactKind::SynthesizedAudio);
                tokio::fs::rename(&staging, &output)
                    .await
                    .map_err(|e| StageError::io(&output, e))
            }
        }
    }

    /// Deletes whatever the failed stage may have left at its output path.
    /// Voice conversion only ever loses its staging file, never its input.
    fn discard_partial_output(&self, episode: &EpisodeRef, stage: StageKind) {
        let artifact = if stage.is_in_place() {
            ArtifactKind::VoiceStaging
        } else {
            stage.output_artifact()
        };
        let path = self.artifacts.resolve(episode, artifact);
        if let Err(e) = self.artifacts.remove(&path) {
            warn!(%episode, %stage, error = %e, "Failed to remove partial output");
        }
    }

    fn remove_scratch(&self, episode: &EpisodeRef, stage: StageKind) {
        let path = self.artifacts.resolve(episode, ArtifactKind::ChunkDir(stage));
        if let Err(e) = self.artifacts.remove(&path) {
            warn!(%episode, %stage, error = %e, "Failed to remove scratch directory");
        }
    }
}

async fn verify_audio(path: PathBuf, what: &'static str) -> Result<(), StageError> {
    let result = blocking(move || audio::verify_wav(&path)).await?;
    result
        .map(|_| ())
        .map_err(|e| StageError::postcondition(format!("{} is not valid: {}", what, e)))
}

/// Runs blocking work on the blocking pool, surfacing panics as errors.
async fn blocking<T, F>(f: F) -> Result<T, StageError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StageError::Panicked(e.to_string()))
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StageError> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| StageError::InvalidInput(format!("cannot encode output: {}", e)))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| StageError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StageError::io(path, e))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::job::{FsJobStatusStore, JobKey, JobStatus};
    use crate::stage::PreconditionError;
    use crate::testing::{fixtures, MockEngines};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        config: Config,
        mocks: MockEngines,
        runner: StageRunner,
    }

    fn harness_with(adjust: impl FnOnce(&mut Config)) -> Harness {
        let dir = TempDir::new().unwrap();
        let mut config = fixtures::config(dir.path());
        adjust(&mut config);
        fixtures::provision_podcast(&config.storage, "p1");
        fixtures::provision_speaker(&config.storage, "Default");

        let artifacts = ArtifactStore::new(&config.storage);
        let store = Arc::new(FsJobStatusStore::new(artifacts.clone()));
        let mocks = MockEngines::new();
        let pool = Arc::new(StagePool::new(&config.stages));
        let runner = StageRunner::new(
            artifacts,
            store,
            mocks.engines(),
            pool,
            config.chunking.clone(),
        );
        Harness {
            _dir: dir,
            config,
            mocks,
            runner,
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    fn episode() -> EpisodeRef {
        EpisodeRef::new("p1", "e1")
    }

    fn path(h: &Harness, kind: ArtifactKind) -> PathBuf {
        h.runner.artifacts().resolve(&episode(), kind)
    }

    async fn run(h: &Harness, params: StageParams) -> StageOutcome {
        let key = JobKey::new(episode(), params.kind());
        let handle = h.runner.store().try_begin(&key).unwrap();
        h.runner.run(handle, &params).await
    }

    fn status(h: &Harness, stage: StageKind) -> crate::job::JobRecord {
        h.runner
            .store()
            .status_of(&JobKey::new(episode(), stage))
            .unwrap()
    }

    #[tokio::test]
    async fn test_transcribe_completes() {
        let h = harness();
        fixtures::write_wav(&path(&h, ArtifactKind::SourceAudio), 0.5).unwrap();

        let outcome = run(&h, StageParams::Transcribe(TranscribeParams::default())).await;

        assert!(outcome.is_completed(), "{:?}", outcome);
        assert!(path(&h, ArtifactKind::Transcript).exists());
        assert_eq!(status(&h, StageKind::Transcribe).status, JobStatus::Complete);
        assert_eq!(h.runner.pool().status(StageKind::Transcribe).total_processed, 1);
    }

    #[tokio::test]
    async fn test_empty_transcript_is_postcondition_violation() {
        let h = harness();
        fixtures::write_wav(&path(&h, ArtifactKind::SourceAudio), 0.5).unwrap();
        h.mocks.transcriber.set_segments(Vec::new()).await;

        let outcome = run(&h, StageParams::Transcribe(TranscribeParams::default())).await;

        let detail = outcome.error().unwrap();
        assert!(detail.starts_with("postcondition violation"), "{}", detail);
        assert!(!path(&h, ArtifactKind::Transcript).exists());
        let record = status(&h, StageKind::Transcribe);
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error_detail.as_deref(), Some(detail));
    }

    #[tokio::test]
    async fn test_ingest_failure_removes_partial_index() {
        let h = harness();
        fixtures::write_transcript(&path(&h, ArtifactKind::Transcript), 3).unwrap();
        h.mocks.ingestor.set_failure("embedding service unreachable").await;

        let outcome = run(&h, StageParams::Ingest(IngestParams::default())).await;

        assert_eq!(outcome.error(), Some("embedding service unreachable"));
        assert!(!path(&h, ArtifactKind::VectorIndex).exists());
        assert!(path(&h, ArtifactKind::Transcript).exists());
        assert_eq!(status(&h, StageKind::Ingest).status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_ingest_without_output_fails() {
        let h = harness();
        fixtures::write_transcript(&path(&h, ArtifactKind::Transcript), 1).unwrap();
        h.mocks.ingestor.set_skip_output(true).await;

        let outcome = run(&h, StageParams::Ingest(IngestParams::default())).await;

        assert!(outcome.error().unwrap().contains("missing or empty"));
        assert_eq!(status(&h, StageKind::Ingest).status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_timeout_marks_failed() {
        let h = harness_with(|c| c.stages.transcribe.timeout_secs = 1);
        fixtures::write_wav(&path(&h, ArtifactKind::SourceAudio), 0.5).unwrap();
        h.mocks.transcriber.set_delay_ms(3_000).await;

        let outcome = run(&h, StageParams::Transcribe(TranscribeParams::default())).await;

        assert!(outcome.error().unwrap().starts_with("timeout"));
        assert_eq!(status(&h, StageKind::Transcribe).status, JobStatus::Failed);
        assert_eq!(h.runner.pool().status(StageKind::Transcribe).active_jobs, 0);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let h = harness();
        fixtures::write_wav(&path(&h, ArtifactKind::SourceAudio), 0.5).unwrap();
        h.mocks.transcriber.set_panic(true).await;

        let outcome = run(&h, StageParams::Transcribe(TranscribeParams::default())).await;

        assert!(outcome.error().unwrap().contains("mock engine panicked"));
        assert_eq!(status(&h, StageKind::Transcribe).status, JobStatus::Failed);
        assert_eq!(h.runner.pool().status(StageKind::Transcribe).total_failed, 1);
    }

    #[tokio::test]
    async fn test_synthesis_chunks_in_order() {
        let h = harness();
        let mut params = SynthesizeParams::new("First part|Second part|Third part");
        params.delimiter = "|".to_string();

        let outcome = run(&h, StageParams::Synthesize(params)).await;

        assert!(outcome.is_completed(), "{:?}", outcome);
        assert_eq!(
            h.mocks.synthesizer.recorded_chunks().await,
            vec!["First part", "Second part", "Third part"]
        );
        let info = audio::verify_wav(&path(&h, ArtifactKind::SynthesizedAudio)).unwrap();
        assert_eq!(info.frames, 3 * 1600);
        assert!(!path(&h, ArtifactKind::ChunkDir(StageKind::Synthesize)).exists());
    }

    #[tokio::test]
    async fn test_synthesis_failure_leaves_no_audio() {
        let h = harness();
        h.mocks.synthesizer.set_fail_on_chunk(1).await;
        let mut params = SynthesizeParams::new("a|b|c");
        params.delimiter = "|".to_string();

        let outcome = run(&h, StageParams::Synthesize(params)).await;

        assert_eq!(outcome.error(), Some("synthesis failed on chunk 1"));
        assert!(!path(&h, ArtifactKind::SynthesizedAudio).exists());
        assert!(!path(&h, ArtifactKind::ChunkDir(StageKind::Synthesize)).exists());
    }

    #[tokio::test]
    async fn test_voice_conversion_promotes_staging() {
        let h = harness();
        let audio = path(&h, ArtifactKind::SynthesizedAudio);
        fixtures::write_wav(&audio, 0.2).unwrap();

        let outcome = run(&h, StageParams::ConvertVoice(ConvertVoiceParams::default())).await;

        assert!(outcome.is_completed(), "{:?}", outcome);
        assert!(audio.exists());
        assert!(!path(&h, ArtifactKind::VoiceStaging).exists());
        let calls = h.mocks.voice_converter.recorded_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, audio);
        assert_eq!(calls[0].2, "Default");
    }

    #[tokio::test]
    async fn test_voice_conversion_failure_keeps_input() {
        let h = harness();
        let audio = path(&h, ArtifactKind::SynthesizedAudio);
        fixtures::write_wav(&audio, 0.2).unwrap();
        h.mocks.voice_converter.set_failure("CUDA out of memory").await;

        let outcome = run(&h, StageParams::ConvertVoice(ConvertVoiceParams::default())).await;

        assert_eq!(outcome.error(), Some("CUDA out of memory"));
        assert!(audio.exists());
        assert!(!path(&h, ArtifactKind::VoiceStaging).exists());
    }

    #[test]
    fn test_precondition_missing_input() {
        let h = harness();
        let err = h
            .runner
            .check_precondition(
                &episode(),
                &StageParams::ConvertVoice(ConvertVoiceParams::default()),
            )
            .unwrap_err();
        assert!(matches!(err, PreconditionError::MissingInput { .. }));
        assert!(err.to_string().starts_with("precondition: missing input artifact"));
    }

    #[test]
    fn test_precondition_output_exists() {
        let h = harness();
        fixtures::write_wav(&path(&h, ArtifactKind::SourceAudio), 0.1).unwrap();
        fixtures::write_transcript(&path(&h, ArtifactKind::Transcript), 1).unwrap();
        let err = h
            .runner
            .check_precondition(&episode(), &StageParams::Transcribe(TranscribeParams::default()))
            .unwrap_err();
        assert!(matches!(err, PreconditionError::OutputExists { .. }));
    }

    #[test]
    fn test_precondition_input_still_being_produced() {
        let h = harness();
        fixtures::write_transcript(&path(&h, ArtifactKind::Transcript), 1).unwrap();
        std::fs::write(
            path(&h, ArtifactKind::StatusMarker(StageKind::Transcribe)),
            "In progress",
        )
        .unwrap();

        let err = h
            .runner
            .check_precondition(&episode(), &StageParams::Ingest(IngestParams::default()))
            .unwrap_err();
        assert!(matches!(
            err,
            PreconditionError::InputInProgress {
                artifact: ArtifactKind::Transcript,
                stage: StageKind::Transcribe,
            }
        ));
    }

    #[test]
    fn test_validate_params_rejects_text_chunked_to_nothing() {
        let h = harness();
        let mut params = SynthesizeParams::new("Hello there.");
        assert!(h.runner.validate_params(&StageParams::Synthesize(params.clone())).is_ok());

        params.text = "||  |".to_string();
        params.delimiter = "|".to_string();
        assert_eq!(
            h.runner.validate_params(&StageParams::Synthesize(params)),
            Err(ParamError::EmptyText)
        );
    }

    #[test]
    fn test_precondition_unknown_podcast() {
        let h = harness();
        let err = h
            .runner
            .check_precondition(
                &EpisodeRef::new("missing", "e1"),
                &StageParams::Transcribe(TranscribeParams::default()),
            )
            .unwrap_err();
        assert!(matches!(err, PreconditionError::Artifact(_)));
    }

    #[test]
    fn test_requirements_missing_speaker_model() {
        let h = harness();
        let mut params = ConvertVoiceParams::default();
        params.speaker_name = "Nobody".to_string();
        let err = h
            .runner
            .check_requirements(&StageParams::ConvertVoice(params))
            .unwrap_err();
        assert!(matches!(err, PreconditionError::SpeakerNotFound { .. }));
        assert!(h.config.storage.speakers_dir.join("Default").exists());
    }
}
