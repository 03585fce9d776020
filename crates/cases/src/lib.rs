//! Case and UAC domain module.
//!
//! This crate contains the reconciliation rules for case and UAC state, implemented
//! purely as deterministic domain logic (no IO, no storage). The infra layer loads
//! and saves the records; the decisions live here.

pub mod case;
pub mod survey;
pub mod uac;

pub use case::{CaseRecord, CaseUpdate};
pub use survey::SurveyScope;
pub use uac::UacQidLink;
