//! Typed per-stage parameters.
//!
//! Engine tuning values are passed through to the engines untouched; only
//! required identifiers are validated here.

use serde::{Deserialize, Serialize};

use super::error::ParamError;
use crate::job::StageKind;

fn default_language() -> String {
    "en".to_string()
}

fn default_speaker() -> String {
    "Default".to_string()
}

fn default_model() -> String {
    "base".to_string()
}

fn default_batch_size() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

fn default_index_rate() -> f64 {
    0.5
}

fn default_filter_radius() -> u32 {
    3
}

fn default_rms_mix_rate() -> f64 {
    0.25
}

fn default_protect() -> f64 {
    0.33
}

/// Speech-to-text parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeParams {
    /// Exact source file name inside the podcast directory. When absent the
    /// episode's audio is looked up by extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    /// ASR model name.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for TranscribeParams {
    fn default() -> Self {
        Self {
            source_file: None,
            language: default_language(),
            model: default_model(),
            batch_size: default_batch_size(),
        }
    }
}

/// Transcript ingestion parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestParams {
    /// Whether transcript segments carry speaker labels worth indexing.
    #[serde(default)]
    pub has_speaker_labels: bool,
}

/// Text-to-speech parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizeParams {
    pub text: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speaker")]
    pub speaker_name: String,
    /// Splits `text` into synthesis chunks. Empty means sentence-based chunking.
    #[serde(default)]
    pub delimiter: String,
    #[serde(default = "default_true")]
    pub use_tortoise: bool,
}

impl SynthesizeParams {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: default_language(),
            speaker_name: default_speaker(),
            delimiter: String::new(),
            use_tortoise: true,
        }
    }
}

/// Voice conversion parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertVoiceParams {
    #[serde(default = "default_speaker")]
    pub speaker_name: String,
    /// Semitone shift applied before conversion.
    #[serde(default)]
    pub pitch_shift: i32,
    #[serde(default = "default_index_rate")]
    pub index_rate: f64,
    #[serde(default = "default_filter_radius")]
    pub filter_radius: u32,
    /// Output sample rate, 0 keeps the input rate.
    #[serde(default)]
    pub resample_sr: u32,
    #[serde(default = "default_rms_mix_rate")]
    pub rms_mix_rate: f64,
    #[serde(default = "default_protect")]
    pub protect: f64,
}

impl Default for ConvertVoiceParams {
    fn default() -> Self {
        Self {
            speaker_name: default_speaker(),
            pitch_shift: 0,
            index_rate: default_index_rate(),
            filter_radius: default_filter_radius(),
            resample_sr: 0,
            rms_mix_rate: default_rms_mix_rate(),
            protect: default_protect(),
        }
    }
}

/// Parameters for one stage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageParams {
    Transcribe(TranscribeParams),
    Ingest(IngestParams),
    Synthesize(SynthesizeParams),
    ConvertVoice(ConvertVoiceParams),
}

impl StageParams {
    pub fn kind(&self) -> StageKind {
        match self {
            StageParams::Transcribe(_) => StageKind::Transcribe,
            StageParams::Ingest(_) => StageKind::Ingest,
            StageParams::Synthesize(_) => StageKind::Synthesize,
            StageParams::ConvertVoice(_) => StageKind::ConvertVoice,
        }
    }

    /// Checks that required identifiers are present.
    pub fn validate(&self) -> Result<(), ParamError> {
        match self {
            StageParams::Transcribe(p) => {
                if let Some(file) = &p.source_file {
                    require("source_file", file)?;
                }
                Ok(())
            }
            StageParams::Ingest(_) => Ok(()),
            StageParams::Synthesize(p) => {
                require("text", &p.text)?;
                require("speaker_name", &p.speaker_name)
            }
            StageParams::ConvertVoice(p) => require("speaker_name", &p.speaker_name),
        }
    }

    /// Speaker whose assets the stage needs, if any.
    pub fn speaker(&self) -> Option<&str> {
        match self {
            StageParams::Synthesize(p) => Some(&p.speaker_name),
            StageParams::ConvertVoice(p) => Some(&p.speaker_name),
            _ => None,
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ParamError> {
    if value.trim().is_empty() {
        Err(ParamError::MissingField(field))
    } else {
        Ok(())
    }
}

/// One timed span of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start offset in seconds.
    pub start: f64,
    /// End offset in seconds.
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_voice_defaults() {
        let params: ConvertVoiceParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params, ConvertVoiceParams::default());
        assert_eq!(params.speaker_name, "Default");
        assert_eq!(params.index_rate, 0.5);
        assert_eq!(params.filter_radius, 3);
        assert_eq!(params.resample_sr, 0);
        assert_eq!(params.rms_mix_rate, 0.25);
        assert_eq!(params.protect, 0.33);
    }

    #[test]
    fn test_synthesize_requires_text() {
        let params: Result<SynthesizeParams, _> = serde_json::from_str(r#"{"language":"en"}"#);
        assert!(params.is_err());

        let blank = StageParams::Synthesize(SynthesizeParams::new("   "));
        assert!(matches!(
            blank.validate(),
            Err(ParamError::MissingField("text"))
        ));

        let ok = StageParams::Synthesize(SynthesizeParams::new("Hello there."));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_blank_speaker_is_rejected() {
        let params = StageParams::ConvertVoice(ConvertVoiceParams {
            speaker_name: String::new(),
            ..Default::default()
        });
        assert!(matches!(
            params.validate(),
            Err(ParamError::MissingField("speaker_name"))
        ));
    }

    #[test]
    fn test_transcript_segment_speaker_is_optional() {
        let segments: Vec<TranscriptSegment> = serde_json::from_str(
            r#"[{"start":0.0,"end":1.5,"text":"hi"},{"start":1.5,"end":2.0,"text":"yo","speaker":"SPEAKER_01"}]"#,
        )
        .unwrap();
        assert_eq!(segments[0].speaker, None);
        assert_eq!(segments[1].speaker.as_deref(), Some("SPEAKER_01"));
    }

    #[test]
    fn test_stage_params_kind() {
        assert_eq!(
            StageParams::Ingest(IngestParams::default()).kind(),
            StageKind::Ingest
        );
        assert_eq!(
            StageParams::Transcribe(TranscribeParams::default()).kind(),
            StageKind::Transcribe
        );
    }
}
