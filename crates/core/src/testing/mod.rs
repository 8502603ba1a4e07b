//! Testing utilities and mock implementations.
//!
//! This module provides controllable mock engines and filesystem fixtures,
//! allowing the dispatcher to be exercised end to end without any models.
//!
//! # Example
//!
//! ```rust,ignore
//! use podcast_jobs_core::testing::{fixtures, MockIngestor, MockTranscriber};
//!
//! let transcriber = Arc::new(MockTranscriber::new());
//! let ingestor = Arc::new(MockIngestor::new());
//! ingestor.set_failure("embedding service unreachable").await;
//!
//! fixtures::provision_podcast(&config.storage, "p1");
//! fixtures::write_wav(&podcast_dir.join("e1.wav"), 1.0)?;
//! ```

mod mock_engines;
mod recording_store;

pub use mock_engines::{MockIngestor, MockSynthesizer, MockTranscriber, MockVoiceConverter};
pub use recording_store::RecordingStatusStore;

use std::sync::Arc;

use crate::stage::Engines;

/// Mock engine set with handles kept for configuring and inspecting them.
#[derive(Clone, Default)]
pub struct MockEngines {
    pub transcriber: Arc<MockTranscriber>,
    pub ingestor: Arc<MockIngestor>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub voice_converter: Arc<MockVoiceConverter>,
}

impl MockEngines {
    pub fn new() -> Self {
        Self::default()
    }

    /// The engine set to hand to a stage runner.
    pub fn engines(&self) -> Engines {
        Engines {
            transcriber: Arc::clone(&self.transcriber) as _,
            ingestor: Arc::clone(&self.ingestor) as _,
            synthesizer: Arc::clone(&self.synthesizer) as _,
            voice_converter: Arc::clone(&self.voice_converter) as _,
        }
    }
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    use crate::config::{Config, StorageConfig};
    use crate::stage::TranscriptSegment;

    /// Sample rate of fixture audio.
    pub const SAMPLE_RATE: u32 = 16_000;

    /// Config rooted at `root` with short stage timeouts.
    pub fn config(root: &Path) -> Config {
        let mut config = Config::default();
        config.storage = storage(root);
        for kind in crate::job::StageKind::ALL {
            config.stages.get_mut(kind).timeout_secs = 30;
        }
        config
    }

    /// Storage roots under `root`.
    pub fn storage(root: &Path) -> StorageConfig {
        StorageConfig {
            podcasts_dir: root.join("Podcasts"),
            speakers_dir: root.join("Speakers"),
        }
    }

    /// Creates the podcast's directory and returns it.
    pub fn provision_podcast(storage: &StorageConfig, podcast_id: &str) -> PathBuf {
        let dir = storage.podcasts_dir.join(podcast_id);
        fs::create_dir_all(&dir).expect("failed to create podcast dir");
        dir
    }

    /// Creates a speaker with a voice sample, model and index.
    pub fn provision_speaker(storage: &StorageConfig, speaker: &str) -> PathBuf {
        let dir = storage.speakers_dir.join(speaker);
        fs::create_dir_all(&dir).expect("failed to create speaker dir");
        fs::write(dir.join(format!("{}.pth", speaker)), b"model").expect("write model");
        fs::write(dir.join(format!("{}.index", speaker)), b"index").expect("write index");
        write_wav(&dir.join(format!("{}.wav", speaker)), 0.5).expect("write sample");
        dir
    }

    /// Writes a mono 16-bit WAV file of a quiet tone.
    pub fn write_wav(path: &Path, secs: f32) -> io::Result<()> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let frames = (secs * SAMPLE_RATE as f32) as u32;
        let to_io = |e: hound::Error| io::Error::new(io::ErrorKind::Other, e);
        let mut writer = WavWriter::create(path, spec).map_err(to_io)?;
        for i in 0..frames {
            let t = i as f32 / SAMPLE_RATE as f32;
            let sample = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 1000.0;
            writer.write_sample(sample as i16).map_err(to_io)?;
        }
        writer.finalize().map_err(to_io)
    }

    /// Writes a transcript with `count` one-second segments.
    pub fn write_transcript(path: &Path, count: usize) -> io::Result<()> {
        let segments: Vec<TranscriptSegment> = (0..count)
            .map(|i| TranscriptSegment {
                start: i as f64,
                end: i as f64 + 1.0,
                text: format!("Segment {}.", i),
                speaker: None,
            })
            .collect();
        let body = serde_json::to_vec(&segments)?;
        fs::write(path, body)
    }
}
