//! Fulfilment rules.
//!
//! Pure decision logic for print/SMS fulfilment requests (no IO, no storage):
//!
//! - [`rules`]: fulfilment code → [`ActionType`] table, loaded once and injected
//! - [`eligibility`]: deferral of individual-response requests against household cases
//! - [`validation`]: mandatory case fields per fulfilment
//! - [`work_item`]: the denormalised outbox record

pub mod action_type;
pub mod eligibility;
pub mod rules;
pub mod validation;
pub mod work_item;

pub use action_type::ActionType;
pub use eligibility::{Eligibility, check_eligibility};
pub use rules::{Classification, FulfilmentRules, RulesError};
pub use validation::{MissingMandatoryFields, validate_mandatory_fields};
pub use work_item::FulfilmentToProcess;
