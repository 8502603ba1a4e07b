//! Pipelines: ordered stages run as one logical job for an episode.

mod orchestrator;
mod types;

pub use orchestrator::PipelineOrchestrator;
pub use types::{PipelineKind, PipelineParams, PipelinePlan, PipelineResult};
