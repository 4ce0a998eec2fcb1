//! Request handlers.

pub mod events;
pub mod formats;
pub mod health;
pub mod jobs;

pub use events::*;
pub use formats::*;
pub use health::*;
pub use jobs::*;
