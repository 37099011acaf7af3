//! HTTP server module.
//!
//! A thin JSON surface over the consensus router: route a prompt, inspect
//! the model registry, check liveness.

mod app;
mod handlers;
pub mod types;

pub use app::{build_router, create_router, run_server, AppState};
pub use handlers::{CONCORD_LATENCY_MS_HEADER, CONCORD_REQUEST_ID_HEADER};
pub use types::RouteRequestBody;
