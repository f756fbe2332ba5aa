//! Infrastructure layer: job storage, the queue processor, email delivery and config.

pub mod config;
pub mod delivery;
pub mod jobs;
