use serde::{Deserialize, Serialize};

use census_action_cases::CaseRecord;
use census_action_core::{CaseId, FulfilmentId};
use census_action_events::FulfilmentRequest;

use crate::action_type::ActionType;

/// Outbox record: one validated fulfilment waiting for the sender.
///
/// Contact and address fields are copied at write time, not referenced, so later case
/// updates do not change what gets printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfilmentToProcess {
    pub id: FulfilmentId,
    pub case_id: CaseId,
    pub case_ref: i64,

    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub address_line3: Option<String>,
    pub town_name: Option<String>,
    pub postcode: Option<String>,

    pub title: Option<String>,
    pub forename: Option<String>,
    pub surname: Option<String>,

    pub field_coordinator_id: Option<String>,
    pub field_officer_id: Option<String>,
    pub organisation_name: Option<String>,

    pub fulfilment_code: String,
    pub action_type: ActionType,
}

impl FulfilmentToProcess {
    pub fn assemble(
        id: FulfilmentId,
        case: &CaseRecord,
        request: &FulfilmentRequest,
        action_type: ActionType,
    ) -> Self {
        Self {
            id,
            case_id: case.case_id,
            case_ref: case.case_ref,

            address_line1: case.address_line1.clone(),
            address_line2: case.address_line2.clone(),
            address_line3: case.address_line3.clone(),
            town_name: case.town_name.clone(),
            postcode: case.postcode.clone(),

            title: request.contact.title.clone(),
            forename: request.contact.forename.clone(),
            surname: request.contact.surname.clone(),

            field_coordinator_id: case.field_coordinator_id.clone(),
            field_officer_id: case.field_officer_id.clone(),
            organisation_name: case.organisation_name.clone(),

            fulfilment_code: request.fulfilment_code.clone(),
            action_type,
        }
    }
}
