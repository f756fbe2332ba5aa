//! `paddock-core`: shared building blocks for the stable notification workspace.
//!
//! This crate contains **pure** primitives (identifiers, domain errors) with no
//! infrastructure concerns.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{HorseId, JobId, UserId};
