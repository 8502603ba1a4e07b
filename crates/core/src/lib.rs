pub mod artifact;
pub mod config;
pub mod dispatcher;
pub mod job;
pub mod metrics;
pub mod pipeline;
pub mod stage;
pub mod testing;

pub use artifact::{ArtifactError, ArtifactKind, ArtifactStore, EpisodeRef};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use dispatcher::{
    Accepted, DispatchError, Dispatcher, DispatcherStatus, StageStatus, SubmitRequest,
};
pub use job::{
    BeginError, FsJobStatusStore, JobHandle, JobKey, JobRecord, JobStatus, JobStatusStore,
    StageKind, StatusStoreError,
};
pub use pipeline::{PipelineKind, PipelineParams, PipelinePlan, PipelineResult};
pub use stage::{
    ConvertVoiceParams, Engines, IngestParams, ParamError, PreconditionError, StageOutcome,
    StageParams, StagePool, StageRunner, SynthesizeParams, TranscribeParams,
};
