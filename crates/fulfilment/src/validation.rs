//! Mandatory-field checks before a work item may be queued.

use thiserror::Error;

use census_action_cases::CaseRecord;
use census_action_core::CaseId;

use crate::rules::FulfilmentRules;

/// A case lacks data the sender needs. Names every missing field at once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "received fulfilment request for case which is missing mandatory values: [{}], fulfilmentCode: {fulfilment_code}, caseId: {case_id}",
    .missing.join(", ")
)]
pub struct MissingMandatoryFields {
    pub missing: Vec<&'static str>,
    pub fulfilment_code: String,
    pub case_id: CaseId,
}

/// Check `case` carries the fields required to fulfil `fulfilment_code`.
///
/// Always required: `addressLine1`, `postcode`, `townName`. Hand-delivered cases
/// additionally need `fieldCoordinatorId` and `fieldOfficerId`, unless the
/// fulfilment is a paper questionnaire.
pub fn validate_mandatory_fields(
    rules: &FulfilmentRules,
    fulfilment_code: &str,
    case: &CaseRecord,
) -> Result<(), MissingMandatoryFields> {
    let mut required: Vec<(&'static str, bool)> = vec![
        ("addressLine1", case.address_line1.is_some()),
        ("postcode", case.postcode.is_some()),
        ("townName", case.town_name.is_some()),
    ];

    if case.hand_delivery && !rules.is_paper_questionnaire(fulfilment_code) {
        required.push(("fieldCoordinatorId", case.field_coordinator_id.is_some()));
        required.push(("fieldOfficerId", case.field_officer_id.is_some()));
    }

    let missing: Vec<&'static str> = required
        .into_iter()
        .filter_map(|(name, present)| (!present).then_some(name))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MissingMandatoryFields {
            missing,
            fulfilment_code: fulfilment_code.to_string(),
            case_id: case.case_id,
        })
    }
}
