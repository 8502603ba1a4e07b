use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::job::StageKind;

/// Extensions accepted for an episode's source audio, in lookup order.
pub const SOURCE_AUDIO_EXTENSIONS: [&str; 4] = ["wav", "mp3", "mp4", "mpeg"];

/// Errors from artifact resolution.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Identifier is empty or would escape its directory.
    #[error("invalid identifier: {0:?}")]
    InvalidId(String),

    /// The podcast's root directory does not exist.
    #[error("podcast not found: {podcast_id}")]
    PodcastNotFound { podcast_id: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A podcast episode, the owner of an artifact set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub podcast_id: String,
    pub episode_id: String,
}

impl EpisodeRef {
    pub fn new(podcast_id: impl Into<String>, episode_id: impl Into<String>) -> Self {
        Self {
            podcast_id: podcast_id.into(),
            episode_id: episode_id.into(),
        }
    }

    /// Checks both ids are usable as single path components.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        validate_component(&self.podcast_id)?;
        validate_component(&self.episode_id)
    }
}

impl fmt::Display for EpisodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.podcast_id, self.episode_id)
    }
}

/// Rejects ids that are empty, contain separators, or name `.`/`..`.
pub(crate) fn validate_component(id: &str) -> Result<(), ArtifactError> {
    let bad = id.trim().is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0']);
    if bad {
        Err(ArtifactError::InvalidId(id.to_string()))
    } else {
        Ok(())
    }
}

/// The artifacts an episode may own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Raw input audio for transcription.
    SourceAudio,
    /// JSON list of timed transcript segments.
    Transcript,
    /// Retrieval index directory.
    VectorIndex,
    /// Text-to-speech output, later converted in place.
    SynthesizedAudio,
    /// Voice conversion output before it replaces the synthesized audio.
    VoiceStaging,
    /// Durable job record of one stage.
    StatusMarker(StageKind),
    /// Scratch directory for a chunked stage.
    ChunkDir(StageKind),
}

impl ArtifactKind {
    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::SourceAudio => "source_audio",
            ArtifactKind::Transcript => "transcript",
            ArtifactKind::VectorIndex => "vector_index",
            ArtifactKind::SynthesizedAudio => "synthesized_audio",
            ArtifactKind::VoiceStaging => "voice_staging",
            ArtifactKind::StatusMarker(_) => "status_marker",
            ArtifactKind::ChunkDir(_) => "chunk_dir",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size and modification time of an artifact as recorded when a job
/// completed.
///
/// For directories `len` counts entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFingerprint {
    pub len: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_ms: Option<i64>,
}

/// Files making up a speaker's voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerAssets {
    pub name: String,
    pub dir: PathBuf,
    /// Voice conversion model (`{name}.pth`).
    pub model: PathBuf,
    /// Voice conversion feature index (`{name}.index`).
    pub index: PathBuf,
    /// Reference voice sample for synthesis (`{name}.wav`).
    pub sample: PathBuf,
}
