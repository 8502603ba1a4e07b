//! Filesystem layout of episode artifacts.
//!
//! Every artifact of an episode lives next to the others inside its
//! podcast's directory:
//!
//! ```text
//! {podcasts_dir}/{podcast_id}/{episode_id}.wav            source or synthesized audio
//! {podcasts_dir}/{podcast_id}/{episode_id}.json           transcript
//! {podcasts_dir}/{podcast_id}/{episode_id}_vectorstore/   retrieval index
//! {podcasts_dir}/{podcast_id}/{episode_id}_status.txt     transcribe marker
//! ```
//!
//! Podcast directories are provisioned elsewhere and never created here.

mod store;
mod types;

pub use store::ArtifactStore;
pub use types::{
    ArtifactError, ArtifactFingerprint, ArtifactKind, EpisodeRef, SpeakerAssets,
    SOURCE_AUDIO_EXTENSIONS,
};
