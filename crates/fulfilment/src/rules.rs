//! Data-driven fulfilment code table.
//!
//! The table maps each known fulfilment code to exactly one [`ActionType`] or to the
//! explicit ignore list. It also carries the two code sets the gate and validator
//! need. New codes are added to `rules/fulfilment_codes.json`, not to control flow.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::action_type::ActionType;

const CENSUS_RULES_JSON: &str = include_str!("../rules/fulfilment_codes.json");

/// Result of classifying a fulfilment code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Produce a work item of this type.
    Dispatch(ActionType),
    /// Known code handled elsewhere (SMS, internal reissue); acknowledged and dropped.
    Ignored,
    /// Code not in the table; dropped but worth an operator's attention.
    Unrecognised,
}

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("failed to read fulfilment rules from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse fulfilment rules: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("fulfilment code '{code}' is mapped to both {first} and {second}")]
    DuplicateCode {
        code: String,
        first: ActionType,
        second: ActionType,
    },

    #[error("fulfilment code '{0}' is both mapped to an action type and ignored")]
    MappedAndIgnored(String),

    #[error("{set} code '{code}' has no action type")]
    Unmapped { set: &'static str, code: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RulesFile {
    action_types: BTreeMap<ActionType, Vec<String>>,
    #[serde(default)]
    ignored: Vec<String>,
    #[serde(default)]
    individual_response_codes: Vec<String>,
    #[serde(default)]
    paper_questionnaire_codes: Vec<String>,
}

/// Immutable fulfilment rules, built once at start-up and shared by reference.
#[derive(Debug, Clone)]
pub struct FulfilmentRules {
    action_types: HashMap<String, ActionType>,
    ignored: HashSet<String>,
    individual_response: HashSet<String>,
    paper_questionnaire: HashSet<String>,
}

impl FulfilmentRules {
    /// The census 2021 table shipped with the crate.
    pub fn census() -> Result<Self, RulesError> {
        Self::from_json(CENSUS_RULES_JSON)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RulesError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse and check a rules document.
    ///
    /// Rejects codes mapped twice, codes both mapped and ignored, and
    /// individual-response or paper codes without an action type.
    pub fn from_json(raw: &str) -> Result<Self, RulesError> {
        let file: RulesFile = serde_json::from_str(raw)?;

        let mut action_types = HashMap::new();
        for (action_type, codes) in file.action_types {
            for code in codes {
                if let Some(first) = action_types.insert(code.clone(), action_type) {
                    return Err(RulesError::DuplicateCode {
                        code,
                        first,
                        second: action_type,
                    });
                }
            }
        }

        let ignored: HashSet<String> = file.ignored.into_iter().collect();
        if let Some(code) = ignored.iter().find(|c| action_types.contains_key(*c)) {
            return Err(RulesError::MappedAndIgnored(code.clone()));
        }

        let individual_response = mapped_set("individual-response", file.individual_response_codes, &action_types)?;
        let paper_questionnaire = mapped_set("paper-questionnaire", file.paper_questionnaire_codes, &action_types)?;

        Ok(Self {
            action_types,
            ignored,
            individual_response,
            paper_questionnaire,
        })
    }

    /// Total classification: every code yields exactly one outcome, never an error.
    pub fn classify(&self, fulfilment_code: &str) -> Classification {
        if let Some(action_type) = self.action_types.get(fulfilment_code) {
            Classification::Dispatch(*action_type)
        } else if self.ignored.contains(fulfilment_code) {
            Classification::Ignored
        } else {
            Classification::Unrecognised
        }
    }

    /// Codes requesting a questionnaire/UAC for one individual in a household.
    pub fn is_individual_response(&self, fulfilment_code: &str) -> bool {
        self.individual_response.contains(fulfilment_code)
    }

    /// Paper questionnaires are exempt from the hand-delivery field checks.
    pub fn is_paper_questionnaire(&self, fulfilment_code: &str) -> bool {
        self.paper_questionnaire.contains(fulfilment_code)
    }

    pub fn mapped_codes(&self) -> impl Iterator<Item = (&str, ActionType)> {
        self.action_types.iter().map(|(code, t)| (code.as_str(), *t))
    }

    pub fn ignored_codes(&self) -> impl Iterator<Item = &str> {
        self.ignored.iter().map(String::as_str)
    }
}

fn mapped_set(
    set: &'static str,
    codes: Vec<String>,
    action_types: &HashMap<String, ActionType>,
) -> Result<HashSet<String>, RulesError> {
    codes
        .into_iter()
        .map(|code| {
            if action_types.contains_key(&code) {
                Ok(code)
            } else {
                Err(RulesError::Unmapped { set, code })
            }
        })
        .collect()
}
