//! Stage execution: engine traits, the runner envelope, and the helpers
//! chunked stages use.

pub mod audio;
pub mod chunking;
mod command;
mod error;
mod params;
mod pool;
mod runner;
mod traits;

pub use command::CommandEngine;
pub use error::{EngineError, ParamError, PreconditionError, StageError};
pub use params::{
    ConvertVoiceParams, IngestParams, StageParams, SynthesizeParams, TranscribeParams,
    TranscriptSegment,
};
pub use pool::{LanePermit, PoolStatus, StagePool};
pub use runner::{StageOutcome, StageRunner};
pub use traits::{Engines, Ingestor, Synthesizer, Transcriber, VoiceConverter};
