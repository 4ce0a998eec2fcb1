//! Per-job progress event channels.
//!
//! This crate provides:
//! - A process-wide registry of job channels keyed by job id
//! - Ordered, unbounded event delivery to a single observer per job
//! - Bounded-wait receive with keep-alive signalling
//! - Job snapshots readable without consuming events

pub mod error;
pub mod progress;

pub use error::{QueueError, QueueResult};
pub use progress::{ProgressHub, ProgressSender, ProgressSubscription, Received};
