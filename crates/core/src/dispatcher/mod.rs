//! Dispatcher: validates submissions synchronously and runs accepted
//! pipelines in the background.

mod service;
mod types;

pub use service::Dispatcher;
pub use types::{
    Accepted, ActivePipeline, DispatchError, DispatcherStatus, StageStatus, SubmitRequest,
};
