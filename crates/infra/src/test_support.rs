//! Wire-shaped fixtures shared by the infra tests.

use serde_json::{Value, json};
use uuid::Uuid;

use census_action_cases::CaseRecord;
use census_action_core::CaseId;
use census_action_events::{CollectionCase, ResponseManagementEvent};

pub(crate) const INITIAL_LAST_UPDATED: &str = "2020-01-01T00:00Z";

pub(crate) fn collection_case_json(case_id: CaseId, case_type: &str, last_updated: &str) -> Value {
    json!({
        "id": case_id,
        "caseRef": "100",
        "caseType": case_type,
        "survey": "CENSUS",
        "lastUpdated": last_updated,
        "address": {
            "addressLine1": "1 Road",
            "postcode": "AB1 2CD",
            "townName": "Town"
        }
    })
}

pub(crate) fn household_snapshot(case_id: CaseId) -> CollectionCase {
    serde_json::from_value(collection_case_json(case_id, "HH", INITIAL_LAST_UPDATED)).unwrap()
}

pub(crate) fn case_record(snapshot: &CollectionCase) -> CaseRecord {
    CaseRecord::from_snapshot(snapshot).unwrap()
}

/// Each call is a distinct message with its own transaction id.
fn event(event_type: &str, payload: Value) -> ResponseManagementEvent {
    serde_json::from_value(json!({
        "event": {
            "type": event_type,
            "source": "CASE_SERVICE",
            "channel": "RM",
            "dateTime": "2020-01-01T00:00:00Z",
            "transactionId": Uuid::now_v7()
        },
        "payload": payload
    }))
    .unwrap()
}

pub(crate) fn case_created(collection_case: Value) -> ResponseManagementEvent {
    event("CASE_CREATED", json!({ "collectionCase": collection_case }))
}

pub(crate) fn case_created_with_fulfilment(
    collection_case: Value,
    fulfilment_request: Value,
) -> ResponseManagementEvent {
    event(
        "CASE_CREATED",
        json!({
            "collectionCase": collection_case,
            "fulfilmentRequest": fulfilment_request
        }),
    )
}

pub(crate) fn case_updated(collection_case: Value) -> ResponseManagementEvent {
    event("CASE_UPDATED", json!({ "collectionCase": collection_case }))
}

pub(crate) fn uac_updated(qid: &str, uac: &str, case_id: Option<CaseId>, active: bool) -> ResponseManagementEvent {
    event(
        "UAC_UPDATED",
        json!({
            "uac": {
                "questionnaireId": qid,
                "uac": uac,
                "caseId": case_id,
                "active": active
            }
        }),
    )
}

pub(crate) fn fulfilment_request_json(code: &str, case_id: CaseId) -> Value {
    json!({
        "fulfilmentCode": code,
        "caseId": case_id,
        "contact": { "title": "Mr", "forename": "A", "surname": "B" }
    })
}

pub(crate) fn fulfilment_requested(code: &str, case_id: CaseId) -> ResponseManagementEvent {
    event(
        "FULFILMENT_REQUESTED",
        json!({ "fulfilmentRequest": fulfilment_request_json(code, case_id) }),
    )
}

pub(crate) fn unknown_event() -> ResponseManagementEvent {
    event("RESPONSE_RECEIVED", json!({}))
}
