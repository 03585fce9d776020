//! Eligibility gate for fulfilment requests.

use census_action_cases::CaseRecord;

use crate::rules::FulfilmentRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Process now.
    Eligible,
    /// An individual-response request against a household case. The individual's own
    /// case has not been created yet; its "case created" event will carry this
    /// request again, and it will be processed then.
    Deferred,
}

/// Decide whether `fulfilment_code` can be serviced against `case` now.
pub fn check_eligibility(rules: &FulfilmentRules, fulfilment_code: &str, case: &CaseRecord) -> Eligibility {
    if case.is_household() && rules.is_individual_response(fulfilment_code) {
        Eligibility::Deferred
    } else {
        Eligibility::Eligible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_item::tests::case_record;

    #[test]
    fn individual_codes_against_household_are_deferred() {
        let rules = FulfilmentRules::census().unwrap();
        let hh = case_record("HH");
        for code in ["P_OR_I1", "P_OR_I4", "P_UAC_UACIP1", "P_UAC_UACIPA2B"] {
            assert_eq!(check_eligibility(&rules, code, &hh), Eligibility::Deferred, "{code}");
        }
    }

    #[test]
    fn individual_codes_against_other_case_types_are_eligible() {
        let rules = FulfilmentRules::census().unwrap();
        for case_type in ["SPG", "CE", "HI"] {
            let case = case_record(case_type);
            assert_eq!(check_eligibility(&rules, "P_OR_I1", &case), Eligibility::Eligible);
        }
    }

    #[test]
    fn household_codes_against_household_are_eligible() {
        let rules = FulfilmentRules::census().unwrap();
        let hh = case_record("HH");
        for code in ["P_OR_H1", "P_LP_ILP1", "P_TB_TBPOL4"] {
            assert_eq!(check_eligibility(&rules, code, &hh), Eligibility::Eligible, "{code}");
        }
    }
}
