//! `census-action-core`: shared building blocks for the action processor.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{CaseId, FulfilmentId, UacQidLinkId};
