//! Error types for the stage module.

use std::path::PathBuf;
use thiserror::Error;

use super::audio::AudioError;
use crate::artifact::{ArtifactError, ArtifactKind};
use crate::job::{StageKind, StatusStoreError};

/// Longest stderr excerpt kept in a job's error detail.
const STDERR_TAIL_CHARS: usize = 2000;

/// Request parameters that cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("text contains nothing to synthesize")]
    EmptyText,
}

/// Why a stage may not start right now.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("precondition: missing input artifact {artifact} at {path}")]
    MissingInput { artifact: ArtifactKind, path: PathBuf },

    #[error("precondition: output artifact {artifact} already exists at {path}")]
    OutputExists { artifact: ArtifactKind, path: PathBuf },

    #[error("speaker not found: {speaker} (missing {path})")]
    SpeakerNotFound { speaker: String, path: PathBuf },

    #[error("precondition: input artifact {artifact} is still being produced by {stage}")]
    InputInProgress {
        artifact: ArtifactKind,
        stage: StageKind,
    },

    /// The producing stage's record could not be read.
    #[error(transparent)]
    Store(#[from] StatusStoreError),
}

/// Errors raised by an external engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No engine is configured for the stage.
    #[error("no {stage} engine configured")]
    NotConfigured { stage: StageKind },

    /// The engine program could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine ran and reported failure.
    #[error("{reason}")]
    Failed {
        reason: String,
        stderr: Option<String>,
    },

    /// The engine's output could not be used.
    #[error("invalid engine output: {reason}")]
    InvalidOutput { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            stderr,
        }
    }

    pub fn invalid_output(reason: impl Into<String>) -> Self {
        Self::InvalidOutput {
            reason: reason.into(),
        }
    }

    /// Message recorded in the failed job, including the tail of stderr.
    pub fn detail(&self) -> String {
        match self {
            Self::Failed {
                reason,
                stderr: Some(stderr),
            } if !stderr.trim().is_empty() => {
                let stderr = stderr.trim();
                let skip = stderr.chars().count().saturating_sub(STDERR_TAIL_CHARS);
                let tail: String = stderr.chars().skip(skip).collect();
                format!("{}\n{}", reason, tail)
            }
            other => other.to_string(),
        }
    }
}

/// Errors while executing a stage in the background.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("postcondition violation: {0}")]
    Postcondition(String),

    #[error("timeout: {stage} did not finish within {secs}s")]
    Timeout { stage: StageKind, secs: u64 },

    #[error("stage panicked: {0}")]
    Panicked(String),

    #[error("stage pool is closed")]
    PoolClosed(#[from] tokio::sync::AcquireError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("audio processing failed: {0}")]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn postcondition(reason: impl Into<String>) -> Self {
        Self::Postcondition(reason.into())
    }

    /// Text stored as the failed job's `error_detail`.
    pub fn detail(&self) -> String {
        match self {
            Self::Engine(e) => e.detail(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input_message() {
        let err = PreconditionError::MissingInput {
            artifact: ArtifactKind::SynthesizedAudio,
            path: PathBuf::from("/srv/p1/e1.wav"),
        };
        assert!(err
            .to_string()
            .starts_with("precondition: missing input artifact synthesized_audio"));
    }

    #[test]
    fn test_engine_detail_includes_stderr_tail() {
        let err = EngineError::failed(
            "engine exited with code 1",
            Some("Traceback...\nRuntimeError: CUDA out of memory\n".to_string()),
        );
        let detail = StageError::from(err).detail();
        assert!(detail.starts_with("engine exited with code 1\n"));
        assert!(detail.ends_with("CUDA out of memory"));
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let noisy = "x".repeat(STDERR_TAIL_CHARS * 3);
        let detail = EngineError::failed("boom", Some(noisy)).detail();
        assert_eq!(detail.len(), "boom\n".len() + STDERR_TAIL_CHARS);
    }

    #[test]
    fn test_postcondition_and_timeout_details_are_distinct() {
        let post = StageError::postcondition("transcript is empty").detail();
        let timeout = StageError::Timeout {
            stage: StageKind::Transcribe,
            secs: 5,
        }
        .detail();
        assert!(post.starts_with("postcondition violation"));
        assert!(timeout.starts_with("timeout"));
    }
}
