//! Mock engines for testing.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::fixtures;
use crate::artifact::SpeakerAssets;
use crate::stage::{
    ConvertVoiceParams, EngineError, IngestParams, Ingestor, SynthesizeParams, Synthesizer,
    TranscribeParams, Transcriber, TranscriptSegment, VoiceConverter,
};

/// Failure and timing knobs shared by all mock engines.
#[derive(Debug, Default)]
struct Behavior {
    /// Every call fails with this message while set.
    failure: Option<String>,
    /// Simulated engine run time.
    delay_ms: u64,
    /// Report success without producing output.
    skip_output: bool,
    /// Panic inside the call.
    panic: bool,
}

#[derive(Debug, Default, Clone)]
struct Controls(Arc<RwLock<Behavior>>);

impl Controls {
    /// Applies the configured delay and failure. Returns whether the mock
    /// should write its output.
    async fn before_call(&self) -> Result<bool, EngineError> {
        let (delay_ms, failure, skip_output, panic) = {
            let b = self.0.read().await;
            (b.delay_ms, b.failure.clone(), b.skip_output, b.panic)
        };
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if panic {
            panic!("mock engine panicked");
        }
        if let Some(reason) = failure {
            return Err(EngineError::failed(reason, None));
        }
        Ok(!skip_output)
    }
}

macro_rules! behavior_setters {
    ($ty:ty) => {
        impl $ty {
            /// Make every call fail with `reason`.
            pub async fn set_failure(&self, reason: impl Into<String>) {
                self.controls.0.write().await.failure = Some(reason.into());
            }

            /// Stop failing.
            pub async fn clear_failure(&self) {
                self.controls.0.write().await.failure = None;
            }

            /// Simulated run time of each call.
            pub async fn set_delay_ms(&self, delay_ms: u64) {
                self.controls.0.write().await.delay_ms = delay_ms;
            }

            /// Succeed without writing any output.
            pub async fn set_skip_output(&self, skip: bool) {
                self.controls.0.write().await.skip_output = skip;
            }

            /// Panic inside each call.
            pub async fn set_panic(&self, panic: bool) {
                self.controls.0.write().await.panic = panic;
            }
        }
    };
}

/// Mock speech-to-text engine returning configurable segments.
#[derive(Debug, Default)]
pub struct MockTranscriber {
    controls: Controls,
    segments: Arc<RwLock<Option<Vec<TranscriptSegment>>>>,
    calls: Arc<RwLock<Vec<PathBuf>>>,
}

impl MockTranscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Segments returned for every call. Defaults to a single segment.
    pub async fn set_segments(&self, segments: Vec<TranscriptSegment>) {
        *self.segments.write().await = Some(segments);
    }

    /// Audio files transcribed so far, in call order.
    pub async fn recorded_calls(&self) -> Vec<PathBuf> {
        self.calls.read().await.clone()
    }
}

behavior_setters!(MockTranscriber);

#[async_trait]
impl Transcriber for MockTranscriber {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transcribe(
        &self,
        audio: &Path,
        _params: &TranscribeParams,
    ) -> Result<Vec<TranscriptSegment>, EngineError> {
        self.calls.write().await.push(audio.to_path_buf());
        if !self.controls.before_call().await? {
            return Ok(Vec::new());
        }
        let configured = self.segments.read().await.clone();
        Ok(configured.unwrap_or_else(|| {
            vec![TranscriptSegment {
                start: 0.0,
                end: 1.0,
                text: "Welcome to the show.".to_string(),
                speaker: None,
            }]
        }))
    }
}

/// Mock ingestion engine that writes a placeholder index file.
#[derive(Debug, Default)]
pub struct MockIngestor {
    controls: Controls,
    calls: Arc<RwLock<Vec<PathBuf>>>,
}

impl MockIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcripts ingested so far.
    pub async fn recorded_calls(&self) -> Vec<PathBuf> {
        self.calls.read().await.clone()
    }
}

behavior_setters!(MockIngestor);

#[async_trait]
impl Ingestor for MockIngestor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn ingest(
        &self,
        transcript: &Path,
        index_dir: &Path,
        _params: &IngestParams,
    ) -> Result<(), EngineError> {
        self.calls.write().await.push(transcript.to_path_buf());
        // Partial output, so failure cleanup has something to remove
        tokio::fs::create_dir_all(index_dir).await?;
        if self.controls.before_call().await? {
            tokio::fs::write(index_dir.join("index.bin"), b"mock-index").await?;
        }
        Ok(())
    }
}

/// Mock text-to-speech engine writing a short WAV per chunk.
#[derive(Debug, Default)]
pub struct MockSynthesizer {
    controls: Controls,
    chunks: Arc<RwLock<Vec<String>>>,
    fail_on_chunk: Arc<RwLock<Option<usize>>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail when asked for the chunk with this zero-based index.
    pub async fn set_fail_on_chunk(&self, index: usize) {
        *self.fail_on_chunk.write().await = Some(index);
    }

    /// Text of every chunk synthesized so far, in call order.
    pub async fn recorded_chunks(&self) -> Vec<String> {
        self.chunks.read().await.clone()
    }
}

behavior_setters!(MockSynthesizer);

#[async_trait]
impl Synthesizer for MockSynthesizer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn synthesize(
        &self,
        text: &str,
        _speaker: &SpeakerAssets,
        output: &Path,
        _params: &SynthesizeParams,
    ) -> Result<(), EngineError> {
        let index = {
            let mut chunks = self.chunks.write().await;
            chunks.push(text.to_string());
            chunks.len() - 1
        };
        if *self.fail_on_chunk.read().await == Some(index) {
            return Err(EngineError::failed(
                format!("synthesis failed on chunk {}", index),
                None,
            ));
        }
        if self.controls.before_call().await? {
            fixtures::write_wav(output, 0.1)?;
        }
        Ok(())
    }
}

/// Mock voice conversion engine copying its input to its output.
#[derive(Debug, Default)]
pub struct MockVoiceConverter {
    controls: Controls,
    calls: Arc<RwLock<Vec<(PathBuf, PathBuf, String)>>>,
}

impl MockVoiceConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(input, output, speaker)` of every call.
    pub async fn recorded_calls(&self) -> Vec<(PathBuf, PathBuf, String)> {
        self.calls.read().await.clone()
    }
}

behavior_setters!(MockVoiceConverter);

#[async_trait]
impl VoiceConverter for MockVoiceConverter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        speaker: &SpeakerAssets,
        _params: &ConvertVoiceParams,
    ) -> Result<(), EngineError> {
        self.calls.write().await.push((
            input.to_path_buf(),
            output.to_path_buf(),
            speaker.name.clone(),
        ));
        if self.controls.before_call().await? {
            tokio::fs::copy(input, output).await?;
        }
        Ok(())
    }
}
