//! Axum HTTP boundary for the analysis backend.
//!
//! A thin adapter over the job manager: `analyze` enqueues, `ingest`
//! stores an upload, `status`/`result` read the status cache and the
//! persisted bundle, `health` probes the collaborators.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
