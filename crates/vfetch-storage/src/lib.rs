//! Remote file host client.
//!
//! This crate provides:
//! - Streaming multipart upload of local files
//! - Optional bearer authentication
//! - Shareable URL construction from the returned file id

pub mod client;
pub mod error;

pub use client::{PublishClient, PublishConfig, PublishedFile};
pub use error::{StorageError, StorageResult};
