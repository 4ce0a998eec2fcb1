//! Pipeline stages and background job execution.
//!
//! This crate provides:
//! - The fetch-and-merge, direct-fetch, transcode and publish stages
//! - A job runner that starts stages immediately on the tokio runtime
//! - Terminal `error`/`DONE` handling for every job, including panics
//! - Structured job logging

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod logging;
pub mod stages;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobRunner;
pub use logging::JobLogger;
pub use stages::StageOutcome;
