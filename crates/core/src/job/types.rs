//! Types for the job module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::artifact::{ArtifactFingerprint, ArtifactKind, EpisodeRef};

/// The kinds of stage a job can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Speech-to-text over the episode's source audio.
    Transcribe,
    /// Transcript ingestion into the retrieval index.
    Ingest,
    /// Text-to-speech into the episode audio.
    Synthesize,
    /// Voice conversion of the synthesized audio, in place.
    ConvertVoice,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Transcribe,
        StageKind::Ingest,
        StageKind::Synthesize,
        StageKind::ConvertVoice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Transcribe => "transcribe",
            StageKind::Ingest => "ingest",
            StageKind::Synthesize => "synthesize",
            StageKind::ConvertVoice => "convert_voice",
        }
    }

    /// Artifact that must exist before the stage may start.
    pub fn input_artifact(&self) -> Option<ArtifactKind> {
        match self {
            StageKind::Transcribe => Some(ArtifactKind::SourceAudio),
            StageKind::Ingest => Some(ArtifactKind::Transcript),
            StageKind::Synthesize => None,
            StageKind::ConvertVoice => Some(ArtifactKind::SynthesizedAudio),
        }
    }

    /// Stage whose output is this stage's input.
    pub fn producer(&self) -> Option<StageKind> {
        match self {
            StageKind::Ingest => Some(StageKind::Transcribe),
            StageKind::ConvertVoice => Some(StageKind::Synthesize),
            StageKind::Transcribe | StageKind::Synthesize => None,
        }
    }

    /// Artifact the stage produces once complete.
    pub fn output_artifact(&self) -> ArtifactKind {
        match self {
            StageKind::Transcribe => ArtifactKind::Transcript,
            StageKind::Ingest => ArtifactKind::VectorIndex,
            StageKind::Synthesize => ArtifactKind::SynthesizedAudio,
            StageKind::ConvertVoice => ArtifactKind::SynthesizedAudio,
        }
    }

    /// Whether the stage rewrites its input instead of producing a new artifact.
    ///
    /// For in-place stages the presence of the output says nothing about
    /// completion, only the job record does.
    pub fn is_in_place(&self) -> bool {
        matches!(self, StageKind::ConvertVoice)
    }

    /// Suffix of the per-episode status marker file.
    pub fn marker_suffix(&self) -> &'static str {
        match self {
            StageKind::Transcribe => "_status.txt",
            StageKind::Ingest => "_ingestion_status.txt",
            StageKind::Synthesize => "_tts_status.txt",
            StageKind::ConvertVoice => "_rvc_status.txt",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcribe" | "stt" => Ok(StageKind::Transcribe),
            "ingest" => Ok(StageKind::Ingest),
            "synthesize" | "tts" => Ok(StageKind::Synthesize),
            "convert_voice" | "rvc" => Ok(StageKind::ConvertVoice),
            other => Err(format!("unknown stage kind: {}", other)),
        }
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    InProgress,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::NotStarted => "not_started",
            JobStatus::InProgress => "in_progress",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether a new admission may start from this status.
    pub fn is_admissible(&self) -> bool {
        matches!(self, JobStatus::NotStarted | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of mutual exclusion: one stage of one episode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub episode: EpisodeRef,
    pub stage: StageKind,
}

impl JobKey {
    pub fn new(episode: EpisodeRef, stage: StageKind) -> Self {
        Self { episode, stage }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.episode, self.stage)
    }
}

/// Persisted state of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    /// Present only when `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Token of the handle that owns an `InProgress` record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Output artifact as observed when the job completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ArtifactFingerprint>,
}

impl JobRecord {
    pub fn not_started() -> Self {
        Self {
            status: JobStatus::NotStarted,
            error_detail: None,
            started_at: None,
            finished_at: None,
            token: None,
            output: None,
        }
    }

    pub fn in_progress(token: String, started_at: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::InProgress,
            started_at: Some(started_at),
            token: Some(token),
            ..Self::not_started()
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            error_detail: Some(detail.into()),
            ..Self::not_started()
        }
    }

    /// A completed record whose only evidence is the output artifact.
    pub fn inferred_complete() -> Self {
        Self {
            status: JobStatus::Complete,
            ..Self::not_started()
        }
    }
}

/// Tokens of handles that are still held by a worker.
#[derive(Debug, Default)]
pub(crate) struct LiveTokens(Mutex<HashSet<String>>);

impl LiveTokens {
    fn set(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, token: &str) {
        self.set().insert(token.to_string());
    }

    pub(crate) fn remove(&self, token: &str) {
        self.set().remove(token);
    }

    pub(crate) fn contains(&self, token: &str) -> bool {
        self.set().contains(token)
    }

    pub(crate) fn len(&self) -> usize {
        self.set().len()
    }
}

/// Proof of ownership of an `InProgress` job.
///
/// Handed out once by [`JobStatusStore::try_begin`](super::JobStatusStore::try_begin)
/// and consumed by exactly one of `complete` or `fail`. A handle dropped
/// without either gives up ownership, leaving a record an operator can reset.
#[derive(Debug)]
pub struct JobHandle {
    key: JobKey,
    token: String,
    started_at: DateTime<Utc>,
    live: Option<Arc<LiveTokens>>,
}

impl JobHandle {
    pub fn new(key: JobKey, token: String, started_at: DateTime<Utc>) -> Self {
        Self {
            key,
            token,
            started_at,
            live: None,
        }
    }

    /// A handle whose token is registered in `live` until it is dropped.
    pub(crate) fn tracked(
        key: JobKey,
        token: String,
        started_at: DateTime<Utc>,
        live: Arc<LiveTokens>,
    ) -> Self {
        live.insert(&token);
        Self {
            key,
            token,
            started_at,
            live: Some(live),
        }
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            live.remove(&self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_roundtrip_names() {
        for kind in StageKind::ALL {
            assert_eq!(kind.as_str().parse::<StageKind>().unwrap(), kind);
        }
        assert_eq!("rvc".parse::<StageKind>().unwrap(), StageKind::ConvertVoice);
        assert!("bogus".parse::<StageKind>().is_err());
    }

    #[test]
    fn test_stage_kind_serializes_snake_case() {
        let json = serde_json::to_string(&StageKind::ConvertVoice).unwrap();
        assert_eq!(json, "\"convert_voice\"");
    }

    #[test]
    fn test_marker_suffixes_are_distinct() {
        let mut suffixes: Vec<_> = StageKind::ALL.iter().map(|k| k.marker_suffix()).collect();
        suffixes.sort();
        suffixes.dedup();
        assert_eq!(suffixes.len(), 4);
    }

    #[test]
    fn test_admissible_statuses() {
        assert!(JobStatus::NotStarted.is_admissible());
        assert!(JobStatus::Failed.is_admissible());
        assert!(!JobStatus::InProgress.is_admissible());
        assert!(!JobStatus::Complete.is_admissible());
    }

    #[test]
    fn test_failed_record_serialization_omits_empty_fields() {
        let record = JobRecord::failed("boom");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error_detail"], "boom");
        assert!(json.get("token").is_none());
    }
}
