//! External engine traits.
//!
//! Each stage wraps one engine. Engines are opaque: they receive resolved
//! paths and the stage parameters and either produce their output or fail.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::command::CommandEngine;
use super::error::EngineError;
use super::params::{
    ConvertVoiceParams, IngestParams, SynthesizeParams, TranscribeParams, TranscriptSegment,
};
use crate::artifact::SpeakerAssets;
use crate::config::EnginesConfig;
use crate::job::StageKind;

/// Speech-to-text engine.
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    /// Transcribes one audio file. Timestamps are relative to its start.
    async fn transcribe(
        &self,
        audio: &Path,
        params: &TranscribeParams,
    ) -> Result<Vec<TranscriptSegment>, EngineError>;
}

/// Builds the retrieval index for a transcript.
#[async_trait]
pub trait Ingestor: Send + Sync {
    fn name(&self) -> &str;

    async fn ingest(
        &self,
        transcript: &Path,
        index_dir: &Path,
        params: &IngestParams,
    ) -> Result<(), EngineError>;
}

/// Text-to-speech engine.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Synthesizes one chunk of text into a WAV file at `output`.
    async fn synthesize(
        &self,
        text: &str,
        speaker: &SpeakerAssets,
        output: &Path,
        params: &SynthesizeParams,
    ) -> Result<(), EngineError>;
}

/// Voice conversion engine.
#[async_trait]
pub trait VoiceConverter: Send + Sync {
    fn name(&self) -> &str;

    /// Converts `input` to the speaker's voice, writing a WAV file at `output`.
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        speaker: &SpeakerAssets,
        params: &ConvertVoiceParams,
    ) -> Result<(), EngineError>;
}

/// The engine set used by the stage runner.
#[derive(Clone)]
pub struct Engines {
    pub transcriber: Arc<dyn Transcriber>,
    pub ingestor: Arc<dyn Ingestor>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub voice_converter: Arc<dyn VoiceConverter>,
}

impl Engines {
    /// Command-line engines for every configured stage. Stages without a
    /// command fail at execution with `NotConfigured`.
    pub fn from_config(config: &EnginesConfig) -> Self {
        let engine = |kind: StageKind| Arc::new(CommandEngine::new(kind, config.get(kind).cloned()));
        Self {
            transcriber: engine(StageKind::Transcribe),
            ingestor: engine(StageKind::Ingest),
            synthesizer: engine(StageKind::Synthesize),
            voice_converter: engine(StageKind::ConvertVoice),
        }
    }

    pub fn name_of(&self, kind: StageKind) -> &str {
        match kind {
            StageKind::Transcribe => self.transcriber.name(),
            StageKind::Ingest => self.ingestor.name(),
            StageKind::Synthesize => self.synthesizer.name(),
            StageKind::ConvertVoice => self.voice_converter.name(),
        }
    }
}

impl std::fmt::Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines")
            .field("transcriber", &self.transcriber.name())
            .field("ingestor", &self.ingestor.name())
            .field("synthesizer", &self.synthesizer.name())
            .field("voice_converter", &self.voice_converter.name())
            .finish()
    }
}
