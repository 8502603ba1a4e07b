//! Stage submission endpoints.
//!
//! These keep the plain-text contract existing clients rely on: `200` with an
//! acceptance message, `400` with the rejection reason, and `503` when the
//! dispatcher cannot take more work.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use podcast_jobs_core::{
    ConvertVoiceParams, DispatchError, EpisodeRef, IngestParams, PipelineKind, PipelineParams,
    SubmitRequest, SynthesizeParams, TranscribeParams,
};

use crate::state::AppState;

/// Response header carrying the id of the accepted pipeline run.
pub const PIPELINE_ID_HEADER: &str = "x-pipeline-id";

/// Podcast and episode ids arrive as strings or numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Text(String),
    Number(i64),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Text(s) => f.write_str(s),
            Identifier::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Body accepted by every submission endpoint. Fields a pipeline's stages
/// do not use are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct JobRequest {
    pub podcast_id: Option<Identifier>,
    pub episode_id: Option<Identifier>,

    // Transcription
    pub source_file: Option<String>,
    pub model: Option<String>,
    pub batch_size: Option<u32>,

    // Ingestion
    pub has_speaker_labels: Option<bool>,

    // Synthesis
    pub text: Option<String>,
    pub language: Option<String>,
    pub speaker_name: Option<String>,
    pub delimiter: Option<String>,
    pub use_tortoise: Option<bool>,

    // Voice conversion
    pub pitch_shift: Option<i32>,
    pub index_rate: Option<f64>,
    pub filter_radius: Option<u32>,
    pub resample_sr: Option<u32>,
    pub rms_mix_rate: Option<f64>,
    pub protect: Option<f64>,
}

impl JobRequest {
    fn episode(&self) -> Result<EpisodeRef, String> {
        let podcast_id = present(&self.podcast_id).ok_or("missing required field: podcast_id")?;
        let episode_id = present(&self.episode_id).ok_or("missing required field: episode_id")?;
        Ok(EpisodeRef::new(podcast_id, episode_id))
    }

    fn params(self) -> PipelineParams {
        let mut transcribe = TranscribeParams {
            source_file: self.source_file,
            ..Default::default()
        };
        if let Some(language) = &self.language {
            transcribe.language = language.clone();
        }
        if let Some(model) = self.model {
            transcribe.model = model;
        }
        if let Some(batch_size) = self.batch_size {
            transcribe.batch_size = batch_size;
        }

        let synthesize = self.text.map(|text| {
            let mut p = SynthesizeParams::new(text);
            if let Some(language) = self.language {
                p.language = language;
            }
            if let Some(speaker) = &self.speaker_name {
                p.speaker_name = speaker.clone();
            }
            if let Some(delimiter) = self.delimiter {
                p.delimiter = delimiter;
            }
            if let Some(use_tortoise) = self.use_tortoise {
                p.use_tortoise = use_tortoise;
            }
            p
        });

        let defaults = ConvertVoiceParams::default();
        let convert_voice = ConvertVoiceParams {
            speaker_name: self.speaker_name.unwrap_or(defaults.speaker_name),
            pitch_shift: self.pitch_shift.unwrap_or(defaults.pitch_shift),
            index_rate: self.index_rate.unwrap_or(defaults.index_rate),
            filter_radius: self.filter_radius.unwrap_or(defaults.filter_radius),
            resample_sr: self.resample_sr.unwrap_or(defaults.resample_sr),
            rms_mix_rate: self.rms_mix_rate.unwrap_or(defaults.rms_mix_rate),
            protect: self.protect.unwrap_or(defaults.protect),
        };

        PipelineParams {
            transcribe,
            ingest: IngestParams {
                has_speaker_labels: self.has_speaker_labels.unwrap_or(false),
            },
            synthesize,
            convert_voice,
        }
    }
}

/// Id as text, treating empty strings as absent.
fn present(id: &Option<Identifier>) -> Option<String> {
    id.as_ref()
        .map(ToString::to_string)
        .filter(|s| !s.trim().is_empty())
}

type Payload = Result<Json<JobRequest>, JsonRejection>;

/// `POST /stt`
pub async fn stt(State(state): State<Arc<AppState>>, body: Payload) -> Response {
    submit(&state, PipelineKind::Transcribe, body).await
}

/// `POST /stt_ingest`
pub async fn stt_ingest(State(state): State<Arc<AppState>>, body: Payload) -> Response {
    submit(&state, PipelineKind::TranscribeThenIngest, body).await
}

/// `POST /ingest`
pub async fn ingest(State(state): State<Arc<AppState>>, body: Payload) -> Response {
    submit(&state, PipelineKind::Ingest, body).await
}

/// `POST /tts`
pub async fn tts(State(state): State<Arc<AppState>>, body: Payload) -> Response {
    submit(&state, PipelineKind::Synthesize, body).await
}

/// `POST /rvc`
pub async fn rvc(State(state): State<Arc<AppState>>, body: Payload) -> Response {
    submit(&state, PipelineKind::ConvertVoice, body).await
}

/// `POST /tts_rvc`
pub async fn tts_rvc(State(state): State<Arc<AppState>>, body: Payload) -> Response {
    submit(&state, PipelineKind::SynthesizeThenConvertVoice, body).await
}

/// `GET /{podcast_id}/{episode_file_name}/create_transcript`
///
/// Transcribes the exact file named in the path. The episode id is the
/// file name up to its first dot.
pub async fn create_transcript(
    State(state): State<Arc<AppState>>,
    Path((podcast_id, episode_file_name)): Path<(String, String)>,
) -> Response {
    let episode_id = episode_file_name
        .split('.')
        .next()
        .unwrap_or_default()
        .to_string();
    let params = PipelineParams {
        transcribe: TranscribeParams {
            source_file: Some(episode_file_name),
            ..Default::default()
        },
        ..Default::default()
    };
    let request = SubmitRequest::new(
        EpisodeRef::new(podcast_id, episode_id),
        PipelineKind::Transcribe,
        params,
    );
    dispatch(&state, request).await
}

async fn submit(state: &AppState, pipeline: PipelineKind, body: Payload) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            debug!(%pipeline, error = %rejection.body_text(), "Malformed submission");
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };
    let episode = match body.episode() {
        Ok(episode) => episode,
        Err(reason) => return (StatusCode::BAD_REQUEST, reason.to_string()).into_response(),
    };
    let request = SubmitRequest::new(episode, pipeline, body.params());
    dispatch(state, request).await
}

async fn dispatch(state: &AppState, request: SubmitRequest) -> Response {
    let pipeline = request.pipeline;
    match state.dispatcher().submit(request).await {
        Ok(accepted) => {
            let mut response = (StatusCode::OK, accepted.message).into_response();
            if let Ok(value) = HeaderValue::from_str(&accepted.pipeline_id) {
                response.headers_mut().insert(PIPELINE_ID_HEADER, value);
            }
            response
        }
        Err(e) => rejection(pipeline, e),
    }
}

fn rejection(pipeline: PipelineKind, e: DispatchError) -> Response {
    let status = if e.is_rejection() {
        StatusCode::BAD_REQUEST
    } else if e.is_store_fault() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    if status.is_server_error() {
        warn!(%pipeline, error = %e, "Submission not accepted");
    }
    (status, e.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: serde_json::Value) -> JobRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_numeric_ids() {
        let request = parse(serde_json::json!({"podcast_id": 12, "episode_id": "34"}));
        let episode = request.episode().unwrap();
        assert_eq!(episode.podcast_id, "12");
        assert_eq!(episode.episode_id, "34");
    }

    #[test]
    fn test_blank_id_is_missing() {
        let request = parse(serde_json::json!({"podcast_id": " ", "episode_id": "e1"}));
        assert_eq!(
            request.episode().unwrap_err(),
            "missing required field: podcast_id"
        );
    }

    #[test]
    fn test_defaults_follow_stage_params() {
        let params = parse(serde_json::json!({"podcast_id": "p", "episode_id": "e"})).params();
        assert!(params.synthesize.is_none());
        assert_eq!(params.convert_voice, ConvertVoiceParams::default());
        assert_eq!(params.transcribe, TranscribeParams::default());
    }

    #[test]
    fn test_shared_fields_reach_every_stage() {
        let params = parse(serde_json::json!({
            "podcast_id": "p",
            "episode_id": "e",
            "text": "Hello.",
            "language": "it",
            "speaker_name": "Narrator",
            "index_rate": 0.75
        }))
        .params();
        let synthesize = params.synthesize.unwrap();
        assert_eq!(synthesize.language, "it");
        assert_eq!(synthesize.speaker_name, "Narrator");
        assert_eq!(params.convert_voice.speaker_name, "Narrator");
        assert_eq!(params.convert_voice.index_rate, 0.75);
        assert_eq!(params.transcribe.language, "it");
    }
}
