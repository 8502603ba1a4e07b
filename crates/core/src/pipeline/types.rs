//! Types for the pipeline module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::artifact::EpisodeRef;
use crate::job::StageKind;
use crate::stage::{
    ConvertVoiceParams, IngestParams, ParamError, StageOutcome, StageParams, SynthesizeParams,
    TranscribeParams,
};

/// The pipelines the API can submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Transcribe,
    Ingest,
    Synthesize,
    ConvertVoice,
    TranscribeThenIngest,
    SynthesizeThenConvertVoice,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 6] = [
        PipelineKind::Transcribe,
        PipelineKind::Ingest,
        PipelineKind::Synthesize,
        PipelineKind::ConvertVoice,
        PipelineKind::TranscribeThenIngest,
        PipelineKind::SynthesizeThenConvertVoice,
    ];

    /// Stages in execution order.
    pub fn stages(&self) -> &'static [StageKind] {
        match self {
            PipelineKind::Transcribe => &[StageKind::Transcribe],
            PipelineKind::Ingest => &[StageKind::Ingest],
            PipelineKind::Synthesize => &[StageKind::Synthesize],
            PipelineKind::ConvertVoice => &[StageKind::ConvertVoice],
            PipelineKind::TranscribeThenIngest => &[StageKind::Transcribe, StageKind::Ingest],
            PipelineKind::SynthesizeThenConvertVoice => {
                &[StageKind::Synthesize, StageKind::ConvertVoice]
            }
        }
    }

    /// Text returned to the client when a submission is accepted.
    pub fn acceptance_message(&self) -> &'static str {
        match self {
            PipelineKind::Transcribe => "Transcription process has been initiated.",
            PipelineKind::Ingest => "Ingest process has been initiated.",
            PipelineKind::Synthesize => "Text to speech process has been initiated.",
            PipelineKind::ConvertVoice => "RVC process has been initiated.",
            PipelineKind::TranscribeThenIngest => "STT started...",
            PipelineKind::SynthesizeThenConvertVoice => "TTS/RVC started...",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Transcribe => "transcribe",
            PipelineKind::Ingest => "ingest",
            PipelineKind::Synthesize => "synthesize",
            PipelineKind::ConvertVoice => "convert_voice",
            PipelineKind::TranscribeThenIngest => "transcribe_then_ingest",
            PipelineKind::SynthesizeThenConvertVoice => "synthesize_then_convert_voice",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PipelineKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown pipeline: {}", s))
    }
}

/// Parameters for every stage a pipeline may contain. Stages not in the
/// submitted pipeline ignore theirs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    pub transcribe: TranscribeParams,
    pub ingest: IngestParams,
    /// Required by synthesis, which has no default text.
    pub synthesize: Option<SynthesizeParams>,
    pub convert_voice: ConvertVoiceParams,
}

impl PipelineParams {
    /// Stage parameters for `kind`, in execution order.
    pub fn stages_for(&self, kind: PipelineKind) -> Result<Vec<StageParams>, ParamError> {
        kind.stages()
            .iter()
            .map(|stage| self.stage(*stage))
            .collect()
    }

    fn stage(&self, kind: StageKind) -> Result<StageParams, ParamError> {
        Ok(match kind {
            StageKind::Transcribe => StageParams::Transcribe(self.transcribe.clone()),
            StageKind::Ingest => StageParams::Ingest(self.ingest.clone()),
            StageKind::Synthesize => StageParams::Synthesize(
                self.synthesize
                    .clone()
                    .ok_or(ParamError::MissingField("text"))?,
            ),
            StageKind::ConvertVoice => StageParams::ConvertVoice(self.convert_voice.clone()),
        })
    }
}

/// An ordered list of stages to run for one episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinePlan {
    pub pipeline_id: String,
    /// Label used in logs, metrics and results.
    pub name: String,
    pub episode: EpisodeRef,
    pub stages: Vec<StageParams>,
}

impl PipelinePlan {
    pub fn new(name: impl Into<String>, episode: EpisodeRef, stages: Vec<StageParams>) -> Self {
        Self {
            pipeline_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            episode,
            stages,
        }
    }

    /// Plan for one of the standard pipelines.
    pub fn for_kind(
        kind: PipelineKind,
        episode: EpisodeRef,
        params: &PipelineParams,
    ) -> Result<Self, ParamError> {
        Ok(Self::new(kind.as_str(), episode, params.stages_for(kind)?))
    }

    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(StageParams::kind).collect()
    }
}

/// Result of running a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub pipeline_id: String,
    pub pipeline: String,
    pub episode: EpisodeRef,
    /// One outcome per planned stage, in order.
    pub stages: Vec<StageOutcome>,
    /// First stage that did not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<StageKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standing_pipelines() {
        assert_eq!(
            PipelineKind::TranscribeThenIngest.stages(),
            &[StageKind::Transcribe, StageKind::Ingest]
        );
        assert_eq!(
            PipelineKind::SynthesizeThenConvertVoice.stages(),
            &[StageKind::Synthesize, StageKind::ConvertVoice]
        );
    }

    #[test]
    fn test_pipeline_kind_from_str() {
        for kind in PipelineKind::ALL {
            assert_eq!(kind.as_str().parse::<PipelineKind>().unwrap(), kind);
        }
        assert!("stt".parse::<PipelineKind>().is_err());
    }

    #[test]
    fn test_synthesis_requires_text() {
        let params = PipelineParams::default();
        let err = params
            .stages_for(PipelineKind::SynthesizeThenConvertVoice)
            .unwrap_err();
        assert_eq!(err.to_string(), "missing required field: text");

        assert!(params.stages_for(PipelineKind::TranscribeThenIngest).is_ok());
    }

    #[test]
    fn test_plan_preserves_order() {
        let params = PipelineParams {
            synthesize: Some(SynthesizeParams::new("Hello.")),
            ..Default::default()
        };
        let plan = PipelinePlan::for_kind(
            PipelineKind::SynthesizeThenConvertVoice,
            EpisodeRef::new("p1", "e1"),
            &params,
        )
        .unwrap();
        assert_eq!(
            plan.stage_kinds(),
            vec![StageKind::Synthesize, StageKind::ConvertVoice]
        );
        assert_eq!(plan.name, "synthesize_then_convert_voice");
        assert!(!plan.pipeline_id.is_empty());
    }
}
