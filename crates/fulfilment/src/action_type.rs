use serde::{Deserialize, Serialize};

/// Dispatchable fulfilment type, as understood by the print/SMS sender.
///
/// The serialised names are the sender's pack codes and are what gets stored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionType {
    /// Household paper questionnaire.
    #[serde(rename = "P_OR_HX")]
    HouseholdQuestionnaire,
    /// Household UAC letter.
    #[serde(rename = "P_UAC_HX")]
    HouseholdUac,
    #[serde(rename = "P_LP_HLX")]
    LargePrintHouseholdQuestionnaire,
    #[serde(rename = "P_LP_ILX")]
    LargePrintIndividualQuestionnaire,
    #[serde(rename = "P_ER_IL")]
    InformationLeaflet,
    /// One type for every language-specific translation booklet code.
    #[serde(rename = "P_TB_TBX")]
    TranslationBooklet,
    /// Individual paper questionnaire.
    #[serde(rename = "P_OR_IX")]
    IndividualQuestionnaire,
    #[serde(rename = "P_UAC_IX")]
    IndividualUac,
    /// Communal establishment continuation UAC.
    #[serde(rename = "P_UAC_CX")]
    ContinuationUac,
}

impl ActionType {
    pub const ALL: [ActionType; 9] = [
        ActionType::HouseholdQuestionnaire,
        ActionType::HouseholdUac,
        ActionType::LargePrintHouseholdQuestionnaire,
        ActionType::LargePrintIndividualQuestionnaire,
        ActionType::InformationLeaflet,
        ActionType::TranslationBooklet,
        ActionType::IndividualQuestionnaire,
        ActionType::IndividualUac,
        ActionType::ContinuationUac,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::HouseholdQuestionnaire => "P_OR_HX",
            ActionType::HouseholdUac => "P_UAC_HX",
            ActionType::LargePrintHouseholdQuestionnaire => "P_LP_HLX",
            ActionType::LargePrintIndividualQuestionnaire => "P_LP_ILX",
            ActionType::InformationLeaflet => "P_ER_IL",
            ActionType::TranslationBooklet => "P_TB_TBX",
            ActionType::IndividualQuestionnaire => "P_OR_IX",
            ActionType::IndividualUac => "P_UAC_IX",
            ActionType::ContinuationUac => "P_UAC_CX",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl core::fmt::Display for ActionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ActionType;

    #[test]
    fn stored_name_parses_back() {
        for t in ActionType::ALL {
            assert_eq!(ActionType::parse(t.as_str()), Some(t));
            assert_eq!(serde_json::to_string(&t).unwrap(), format!("\"{}\"", t.as_str()));
        }
        assert_eq!(ActionType::parse("P_XX"), None);
    }
}
