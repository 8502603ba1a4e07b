use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::job::StageKind;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub stages: StagesConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub engines: EnginesConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8000
}

/// Where episode artifacts and speaker assets live on disk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root holding one directory per podcast.
    #[serde(default = "default_podcasts_dir")]
    pub podcasts_dir: PathBuf,
    /// Root holding one directory per speaker (voice samples, models, indexes).
    #[serde(default = "default_speakers_dir")]
    pub speakers_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            podcasts_dir: default_podcasts_dir(),
            speakers_dir: default_speakers_dir(),
        }
    }
}

fn default_podcasts_dir() -> PathBuf {
    PathBuf::from("ServerFiles/Podcasts")
}

fn default_speakers_dir() -> PathBuf {
    PathBuf::from("ServerFiles/Speakers")
}

/// Admission queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
    /// Maximum accepted pipelines that have not finished yet.
    /// Submissions beyond this are rejected instead of queued.
    #[serde(default = "default_max_pending")]
    pub max_pending_pipelines: usize,

    /// How many finished pipeline results are kept for inspection.
    #[serde(default = "default_history")]
    pub result_history: usize,
}

fn default_max_pending() -> usize {
    32
}

fn default_history() -> usize {
    100
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_pending_pipelines: default_max_pending(),
            result_history: default_history(),
        }
    }
}

/// Concurrency and timeout for one stage kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageLaneConfig {
    /// Maximum jobs of this kind executing at once.
    pub max_concurrent: usize,
    /// Execution timeout in seconds (0 disables the timeout).
    pub timeout_secs: u64,
}

impl StageLaneConfig {
    fn new(max_concurrent: usize, timeout_secs: u64) -> Self {
        Self {
            max_concurrent,
            timeout_secs,
        }
    }
}

/// Per stage kind lanes. GPU-bound stages default to a single slot.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StagesConfig {
    #[serde(default = "default_transcribe_lane")]
    pub transcribe: StageLaneConfig,
    #[serde(default = "default_ingest_lane")]
    pub ingest: StageLaneConfig,
    #[serde(default = "default_synthesize_lane")]
    pub synthesize: StageLaneConfig,
    #[serde(default = "default_convert_voice_lane")]
    pub convert_voice: StageLaneConfig,
}

fn default_transcribe_lane() -> StageLaneConfig {
    StageLaneConfig::new(1, 7200) // 2 hours
}

fn default_ingest_lane() -> StageLaneConfig {
    StageLaneConfig::new(4, 1800) // 30 minutes
}

fn default_synthesize_lane() -> StageLaneConfig {
    StageLaneConfig::new(1, 7200)
}

fn default_convert_voice_lane() -> StageLaneConfig {
    StageLaneConfig::new(1, 3600)
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            transcribe: default_transcribe_lane(),
            ingest: default_ingest_lane(),
            synthesize: default_synthesize_lane(),
            convert_voice: default_convert_voice_lane(),
        }
    }
}

impl StagesConfig {
    /// Lane configuration for a stage kind.
    pub fn get(&self, kind: StageKind) -> &StageLaneConfig {
        match kind {
            StageKind::Transcribe => &self.transcribe,
            StageKind::Ingest => &self.ingest,
            StageKind::Synthesize => &self.synthesize,
            StageKind::ConvertVoice => &self.convert_voice,
        }
    }

    /// Mutable lane configuration for a stage kind.
    pub fn get_mut(&mut self, kind: StageKind) -> &mut StageLaneConfig {
        match kind {
            StageKind::Transcribe => &mut self.transcribe,
            StageKind::Ingest => &mut self.ingest,
            StageKind::Synthesize => &mut self.synthesize,
            StageKind::ConvertVoice => &mut self.convert_voice,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageKind, &StageLaneConfig)> {
        StageKind::ALL.iter().map(move |kind| (*kind, self.get(*kind)))
    }
}

/// How chunked stages split their input.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    /// Longest text chunk handed to the synthesizer when no delimiter is given.
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    /// WAV input longer than this is transcribed in windows (0 disables).
    #[serde(default = "default_transcribe_chunk_secs")]
    pub transcribe_chunk_secs: u64,

    /// Linear crossfade applied between synthesized chunks (0 disables).
    #[serde(default)]
    pub crossfade_ms: u32,
}

fn default_max_chunk_chars() -> usize {
    300
}

fn default_transcribe_chunk_secs() -> u64 {
    1800 // 30 minutes
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            transcribe_chunk_secs: default_transcribe_chunk_secs(),
            crossfade_ms: 0,
        }
    }
}

/// External programs backing each stage.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnginesConfig {
    #[serde(default)]
    pub transcribe: Option<EngineCommandConfig>,
    #[serde(default)]
    pub ingest: Option<EngineCommandConfig>,
    #[serde(default)]
    pub synthesize: Option<EngineCommandConfig>,
    #[serde(default)]
    pub convert_voice: Option<EngineCommandConfig>,
}

impl EnginesConfig {
    pub fn get(&self, kind: StageKind) -> Option<&EngineCommandConfig> {
        match kind {
            StageKind::Transcribe => self.transcribe.as_ref(),
            StageKind::Ingest => self.ingest.as_ref(),
            StageKind::Synthesize => self.synthesize.as_ref(),
            StageKind::ConvertVoice => self.convert_voice.as_ref(),
        }
    }
}

/// A command line template run for every engine invocation.
///
/// Arguments may contain `{placeholder}` tokens that are substituted per call,
/// e.g. `["infer_cli.py", "--input", "{input}", "--output", "{output}"]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineCommandConfig {
    /// Program to execute.
    pub program: PathBuf,
    /// Argument template.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Sanitized config for API responses (engine environment values redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub dispatcher: DispatcherConfig,
    pub stages: StagesConfig,
    pub chunking: ChunkingConfig,
    pub engines: BTreeMap<String, SanitizedEngineConfig>,
}

/// Engine command with environment values hidden.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedEngineConfig {
    pub program: String,
    pub args: Vec<String>,
    pub env_keys: Vec<String>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let engines = StageKind::ALL
            .iter()
            .filter_map(|kind| {
                config.engines.get(*kind).map(|engine| {
                    (
                        kind.as_str().to_string(),
                        SanitizedEngineConfig {
                            program: engine.program.display().to_string(),
                            args: engine.args.clone(),
                            env_keys: engine.env.keys().cloned().collect(),
                        },
                    )
                })
            })
            .collect();

        Self {
            server: config.server.clone(),
            storage: config.storage.clone(),
            dispatcher: config.dispatcher.clone(),
            stages: config.stages.clone(),
            chunking: config.chunking.clone(),
            engines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.storage.podcasts_dir, PathBuf::from("ServerFiles/Podcasts"));
        assert_eq!(config.dispatcher.max_pending_pipelines, 32);
        assert_eq!(config.chunking.max_chunk_chars, 300);
        assert!(config.engines.transcribe.is_none());
    }

    #[test]
    fn test_gpu_stages_default_to_single_slot() {
        let stages = StagesConfig::default();
        assert_eq!(stages.get(StageKind::Transcribe).max_concurrent, 1);
        assert_eq!(stages.get(StageKind::Synthesize).max_concurrent, 1);
        assert_eq!(stages.get(StageKind::ConvertVoice).max_concurrent, 1);
        assert_eq!(stages.get(StageKind::Ingest).max_concurrent, 4);
    }

    #[test]
    fn test_deserialize_engine_command() {
        let toml = r#"
[engines.convert_voice]
program = "python3"
args = ["rvc/infer_cli.py", "--input", "{input}", "--output", "{output}"]
working_dir = "/opt/rvc"

[engines.convert_voice.env]
CUDA_VISIBLE_DEVICES = "0"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let engine = config.engines.get(StageKind::ConvertVoice).unwrap();
        assert_eq!(engine.program, PathBuf::from("python3"));
        assert_eq!(engine.args.len(), 5);
        assert_eq!(engine.env.get("CUDA_VISIBLE_DEVICES").unwrap(), "0");
        assert!(config.engines.get(StageKind::Transcribe).is_none());
    }

    #[test]
    fn test_partial_stage_override() {
        let toml = r#"
[stages.ingest]
max_concurrent = 2
timeout_secs = 60
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.stages.ingest.max_concurrent, 2);
        assert_eq!(config.stages.ingest.timeout_secs, 60);
        assert_eq!(config.stages.synthesize.timeout_secs, 7200);
    }

    #[test]
    fn test_sanitized_config_hides_engine_env() {
        let toml = r#"
[engines.ingest]
program = "ingest"

[engines.ingest.env]
OPENAI_API_KEY = "sk-secret"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        let ingest = sanitized.engines.get("ingest").unwrap();
        assert_eq!(ingest.env_keys, vec!["OPENAI_API_KEY".to_string()]);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
