pub mod error;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod status;

pub use jobs::PIPELINE_ID_HEADER;
pub use routes::create_router;
