//! HTTP front of the relay: webhook endpoints, operational endpoints and the
//! background conversation pipeline.

pub mod app;
pub mod http;
pub mod pipeline;

pub use app::{build_router, AppState};
