use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::StorageConfig;

use super::types::{
    validate_component, ArtifactError, ArtifactFingerprint, ArtifactKind, EpisodeRef,
    SpeakerAssets, SOURCE_AUDIO_EXTENSIONS,
};

/// Resolves artifact paths under the configured storage roots.
///
/// Apart from [`remove`](Self::remove) the store only queries the filesystem.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    podcasts_dir: PathBuf,
    speakers_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            podcasts_dir: config.podcasts_dir.clone(),
            speakers_dir: config.speakers_dir.clone(),
        }
    }

    pub fn podcasts_dir(&self) -> &Path {
        &self.podcasts_dir
    }

    pub fn speakers_dir(&self) -> &Path {
        &self.speakers_dir
    }

    pub fn podcast_dir(&self, podcast_id: &str) -> PathBuf {
        self.podcasts_dir.join(podcast_id)
    }

    /// Canonical path of an artifact.
    ///
    /// Source audio resolves to the first existing file among the accepted
    /// extensions and falls back to `.wav` when none exists.
    pub fn resolve(&self, episode: &EpisodeRef, kind: ArtifactKind) -> PathBuf {
        let dir = self.podcast_dir(&episode.podcast_id);
        let id = &episode.episode_id;
        match kind {
            ArtifactKind::SourceAudio => SOURCE_AUDIO_EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{}.{}", id, ext)))
                .find(|path| path.is_file())
                .unwrap_or_else(|| dir.join(format!("{}.wav", id))),
            ArtifactKind::Transcript => dir.join(format!("{}.json", id)),
            ArtifactKind::VectorIndex => dir.join(format!("{}_vectorstore", id)),
            ArtifactKind::SynthesizedAudio => dir.join(format!("{}.wav", id)),
            ArtifactKind::VoiceStaging => dir.join(format!("{}_rvc.wav", id)),
            ArtifactKind::StatusMarker(stage) => {
                dir.join(format!("{}{}", id, stage.marker_suffix()))
            }
            ArtifactKind::ChunkDir(stage) => dir.join(format!("{}_{}_chunks", id, stage)),
        }
    }

    /// Path of an explicitly named file inside the podcast directory.
    pub fn resolve_named(&self, podcast_id: &str, file_name: &str) -> Result<PathBuf, ArtifactError> {
        validate_component(podcast_id)?;
        validate_component(file_name)?;
        Ok(self.podcast_dir(podcast_id).join(file_name))
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// A file with content, or a directory with at least one entry.
    pub fn is_populated(&self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => fs::read_dir(path)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false),
            Ok(meta) => meta.len() > 0,
            Err(_) => false,
        }
    }

    pub fn fingerprint(&self, path: &Path) -> Option<ArtifactFingerprint> {
        let meta = fs::metadata(path).ok()?;
        let len = if meta.is_dir() {
            fs::read_dir(path).ok()?.count() as u64
        } else {
            meta.len()
        };
        let modified_ms = meta
            .modified()
            .ok()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis());
        Some(ArtifactFingerprint { len, modified_ms })
    }

    /// Fails with `PodcastNotFound` if the podcast's directory is absent.
    pub fn ensure_container(&self, podcast_id: &str) -> Result<PathBuf, ArtifactError> {
        validate_component(podcast_id)?;
        let dir = self.podcast_dir(podcast_id);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(ArtifactError::PodcastNotFound {
                podcast_id: podcast_id.to_string(),
            })
        }
    }

    pub fn speaker_assets(&self, speaker: &str) -> Result<SpeakerAssets, ArtifactError> {
        validate_component(speaker)?;
        let dir = self.speakers_dir.join(speaker);
        Ok(SpeakerAssets {
            name: speaker.to_string(),
            model: dir.join(format!("{}.pth", speaker)),
            index: dir.join(format!("{}.index", speaker)),
            sample: dir.join(format!("{}.wav", speaker)),
            dir,
        })
    }

    /// Removes a file or directory tree. Missing paths are not an error.
    pub fn remove(&self, path: &Path) -> Result<(), ArtifactError> {
        let result = match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}
