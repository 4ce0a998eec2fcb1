//! Axum HTTP API server.
//!
//! This crate provides:
//! - Job submission for every pipeline stage
//! - Per-job server-sent progress streams with keep-alive
//! - Job snapshots and format listing
//! - Security headers, request ids and Prometheus metrics

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
