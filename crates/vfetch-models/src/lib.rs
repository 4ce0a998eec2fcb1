//! Shared data models for the vfetch backend.
//!
//! This crate provides Serde-serializable types for:
//! - Stream candidates reported by the extraction tool
//! - Stage requests and transcode configuration
//! - Job identity, lifecycle state and snapshots
//! - The progress event schema streamed to observers

pub mod encoding;
pub mod job;
pub mod progress;
pub mod request;
pub mod stream;
pub mod utils;

// Re-export common types
pub use encoding::{PassMode, TranscodeOptions, VideoCodec};
pub use job::{JobId, JobSnapshot, JobState, StageKind};
pub use progress::{escape_log_line, ProgressEvent, DONE_SENTINEL};
pub use request::{
    DirectFetchRequest, FetchMergeRequest, PublishRequest, StageRequest, TranscodeRequest,
};
pub use stream::{StreamCandidate, StreamKind};
pub use utils::{ensure_extension, human_size, output_filename, sanitize_filename, DEFAULT_FILENAME};
