//! Survey scope filter.
//!
//! Coverage Check Survey (CCS) traffic shares the census topics but is handled by a
//! different pipeline. Such events are acknowledged and discarded here.

use std::collections::HashSet;

use census_action_events::CollectionCase;

pub const CCS_SURVEY: &str = "CCS";

/// Questionnaire types (first two digits of a qid) belonging to the CCS.
pub const DEFAULT_CCS_QUESTIONNAIRE_TYPES: [&str; 8] =
    ["71", "72", "73", "74", "81", "82", "83", "84"];

/// Immutable survey-scope rules, built once at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyScope {
    ccs_questionnaire_types: HashSet<String>,
}

impl SurveyScope {
    pub fn new<I, S>(ccs_questionnaire_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ccs_questionnaire_types: ccs_questionnaire_types.into_iter().map(Into::into).collect(),
        }
    }

    /// A case event is out of scope when its survey tag is `CCS`.
    pub fn is_out_of_scope_case(&self, case: &CollectionCase) -> bool {
        case.survey.as_deref() == Some(CCS_SURVEY)
    }

    /// A UAC event is out of scope when its qid starts with a CCS questionnaire type.
    ///
    /// A qid shorter than two characters has no type and is treated as in scope.
    pub fn is_out_of_scope_qid(&self, questionnaire_id: &str) -> bool {
        questionnaire_id
            .get(..2)
            .is_some_and(|qt| self.ccs_questionnaire_types.contains(qt))
    }
}

impl Default for SurveyScope {
    fn default() -> Self {
        Self::new(DEFAULT_CCS_QUESTIONNAIRE_TYPES)
    }
}
