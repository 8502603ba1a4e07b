//! Engines backed by external command lines.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::error::EngineError;
use super::params::{
    ConvertVoiceParams, IngestParams, SynthesizeParams, TranscribeParams, TranscriptSegment,
};
use super::traits::{Ingestor, Synthesizer, Transcriber, VoiceConverter};
use crate::artifact::SpeakerAssets;
use crate::config::EngineCommandConfig;
use crate::job::StageKind;

/// Runs a configured program for each engine call.
///
/// Arguments are rendered from the configured template by replacing
/// `{name}` placeholders. The child is killed when the call is dropped,
/// which is how stage timeouts reach the process.
///
/// | stage | placeholders |
/// |---|---|
/// | transcribe | `{input}` `{language}` `{model}` `{batch_size}` |
/// | ingest | `{input}` `{output}` `{has_speaker_labels}` |
/// | synthesize | `{text}` `{output}` `{speaker}` `{speaker_dir}` `{speaker_sample}` `{language}` `{use_tortoise}` |
/// | convert_voice | `{input}` `{output}` `{speaker}` `{model}` `{index}` `{pitch_shift}` `{index_rate}` `{filter_radius}` `{resample_sr}` `{rms_mix_rate}` `{protect}` |
///
/// The transcribe command must print the transcript segments as a JSON
/// array on stdout.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    stage: StageKind,
    command: Option<EngineCommandConfig>,
}

impl CommandEngine {
    pub fn new(stage: StageKind, command: Option<EngineCommandConfig>) -> Self {
        Self { stage, command }
    }

    pub fn is_configured(&self) -> bool {
        self.command.is_some()
    }

    /// Substitutes placeholders in the argument template.
    pub fn render_args(&self, vars: &[(&str, String)]) -> Vec<String> {
        let Some(command) = &self.command else {
            return Vec::new();
        };
        command
            .args
            .iter()
            .map(|arg| render_template(arg, vars))
            .collect()
    }

    /// Runs the command to completion and returns its stdout.
    async fn run(&self, vars: &[(&str, String)]) -> Result<String, EngineError> {
        let command = self
            .command
            .as_ref()
            .ok_or(EngineError::NotConfigured { stage: self.stage })?;
        let args = self.render_args(vars);

        debug!(stage = %self.stage, program = %command.program.display(), ?args, "Running engine");

        let mut cmd = Command::new(&command.program);
        cmd.args(&args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|source| EngineError::Spawn {
            program: command.program.clone(),
            source,
        })?;
        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(EngineError::failed(
                format!(
                    "{} exited with code {:?}",
                    command.program.display(),
                    output.status.code()
                ),
                if stderr.trim().is_empty() {
                    None
                } else {
                    Some(stderr)
                },
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Replaces each known `{name}` in one left-to-right scan. Substituted
/// values are never rescanned, and unknown placeholders are kept verbatim.
fn render_template(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(var, _)| *var == name)
                .map(|(_, value)| (value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn path_var(path: &Path) -> String {
    path.display().to_string()
}

#[async_trait]
impl Transcriber for CommandEngine {
    fn name(&self) -> &str {
        "command"
    }

    async fn transcribe(
        &self,
        audio: &Path,
        params: &TranscribeParams,
    ) -> Result<Vec<TranscriptSegment>, EngineError> {
        let stdout = self
            .run(&[
                ("input", path_var(audio)),
                ("language", params.language.clone()),
                ("model", params.model.clone()),
                ("batch_size", params.batch_size.to_string()),
            ])
            .await?;
        serde_json::from_str(stdout.trim())
            .map_err(|e| EngineError::invalid_output(format!("transcript is not valid JSON: {}", e)))
    }
}

#[async_trait]
impl Ingestor for CommandEngine {
    fn name(&self) -> &str {
        "command"
    }

    async fn ingest(
        &self,
        transcript: &Path,
        index_dir: &Path,
        params: &IngestParams,
    ) -> Result<(), EngineError> {
        self.run(&[
            ("input", path_var(transcript)),
            ("output", path_var(index_dir)),
            ("has_speaker_labels", params.has_speaker_labels.to_string()),
        ])
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl Synthesizer for CommandEngine {
    fn name(&self) -> &str {
        "command"
    }

    async fn synthesize(
        &self,
        text: &str,
        speaker: &SpeakerAssets,
        output: &Path,
        params: &SynthesizeParams,
    ) -> Result<(), EngineError> {
        self.run(&[
            ("text", text.to_string()),
            ("output", path_var(output)),
            ("speaker", speaker.name.clone()),
            ("speaker_dir", path_var(&speaker.dir)),
            ("speaker_sample", path_var(&speaker.sample)),
            ("language", params.language.clone()),
            ("use_tortoise", params.use_tortoise.to_string()),
        ])
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl VoiceConverter for CommandEngine {
    fn name(&self) -> &str {
        "command"
    }

    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        speaker: &SpeakerAssets,
        params: &ConvertVoiceParams,
    ) -> Result<(), EngineError> {
        self.run(&[
            ("input", path_var(input)),
            ("output", path_var(output)),
            ("speaker", speaker.name.clone()),
            ("model", path_var(&speaker.model)),
            ("index", path_var(&speaker.index)),
            ("pitch_shift", params.pitch_shift.to_string()),
            ("index_rate", params.index_rate.to_string()),
            ("filter_radius", params.filter_radius.to_string()),
            ("resample_sr", params.resample_sr.to_string()),
            ("rms_mix_rate", params.rms_mix_rate.to_string()),
            ("protect", params.protect.to_string()),
        ])
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn engine(program: &str, args: &[&str]) -> CommandEngine {
        CommandEngine::new(
            StageKind::Transcribe,
            Some(EngineCommandConfig {
                program: PathBuf::from(program),
                args: args.iter().map(|s| s.to_string()).collect(),
                working_dir: None,
                env: BTreeMap::new(),
            }),
        )
    }

    #[test]
    fn test_render_args_substitutes_placeholders() {
        let engine = engine("whisperx", &["{input}", "--language={language}", "{unknown}"]);
        let args = engine.render_args(&[
            ("input", "/srv/p1/e1.wav".to_string()),
            ("language", "fr".to_string()),
        ]);
        assert_eq!(args, vec!["/srv/p1/e1.wav", "--language=fr", "{unknown}"]);
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let engine = engine("tts", &["--text={text}", "--out={output}"]);
        let args = engine.render_args(&[
            ("text", "say {output} and {speaker}".to_string()),
            ("output", "/srv/p1/e1.wav".to_string()),
            ("speaker", "Narrator".to_string()),
        ]);
        assert_eq!(
            args,
            vec!["--text=say {output} and {speaker}", "--out=/srv/p1/e1.wav"]
        );
    }

    #[test]
    fn test_unbalanced_braces_are_kept() {
        let engine = engine("tts", &["{", "a}{input", "{{input}}"]);
        let args = engine.render_args(&[("input", "x".to_string())]);
        assert_eq!(args, vec!["{", "a}{input", "{x}"]);
    }

    #[tokio::test]
    async fn test_unconfigured_engine_fails() {
        let engine = CommandEngine::new(StageKind::Ingest, None);
        assert!(!engine.is_configured());
        let err = engine
            .ingest(
                Path::new("e1.json"),
                Path::new("e1_vectorstore"),
                &IngestParams::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotConfigured {
                stage: StageKind::Ingest
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let engine = engine("/nonexistent/podjobs-engine", &[]);
        let err = engine
            .transcribe(Path::new("e1.wav"), &TranscribeParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_transcribe_parses_stdout() {
        let engine = engine(
            "sh",
            &[
                "-c",
                r#"echo '[{"start":0.0,"end":1.0,"text":"hello"}]'"#,
            ],
        );
        let segments = engine
            .transcribe(Path::new("e1.wav"), &TranscribeParams::default())
            .await
            .unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_captures_stderr() {
        let engine = engine("sh", &["-c", "echo 'model weights missing' >&2; exit 3"]);
        let err = engine
            .transcribe(Path::new("e1.wav"), &TranscribeParams::default())
            .await
            .unwrap_err();
        let detail = err.detail();
        assert!(detail.contains("Some(3)"));
        assert!(detail.contains("model weights missing"));
    }
}
