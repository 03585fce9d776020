//! Payload sub-objects carried by response-management events.
//!
//! Unknown JSON properties are ignored so upstream producers can add fields freely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use census_action_core::CaseId;

/// Body of an event. Which member is present depends on the event type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(default)]
    pub collection_case: Option<CollectionCase>,
    #[serde(default)]
    pub uac: Option<Uac>,
    #[serde(default)]
    pub fulfilment_request: Option<FulfilmentRequest>,
}

/// Full case snapshot as published by the case processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionCase {
    pub id: CaseId,
    pub case_ref: String,
    #[serde(default)]
    pub case_type: Option<String>,
    #[serde(default)]
    pub survey: Option<String>,
    #[serde(default)]
    pub collection_exercise_id: Option<Uuid>,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub actionable_from: Option<String>,
    #[serde(default, with = "crate::timestamp::option")]
    pub created_date_time: Option<DateTime<Utc>>,
    #[serde(with = "crate::timestamp")]
    pub last_updated: DateTime<Utc>,

    #[serde(default)]
    pub action_plan_id: Option<Uuid>,
    #[serde(default)]
    pub treatment_code: Option<String>,
    #[serde(default)]
    pub oa: Option<String>,
    #[serde(default)]
    pub lsoa: Option<String>,
    #[serde(default)]
    pub msoa: Option<String>,
    #[serde(default)]
    pub lad: Option<String>,
    #[serde(default)]
    pub htc_willingness: Option<String>,
    #[serde(default)]
    pub htc_digital: Option<String>,
    #[serde(default)]
    pub field_coordinator_id: Option<String>,
    #[serde(default)]
    pub field_officer_id: Option<String>,
    #[serde(default)]
    pub ce_expected_capacity: Option<i32>,
    #[serde(default)]
    pub ce_actual_responses: i32,
    #[serde(default)]
    pub receipt_received: Option<bool>,
    #[serde(default)]
    pub refusal_received: Option<RefusalType>,
    #[serde(default)]
    pub address_invalid: Option<bool>,
    #[serde(default)]
    pub hand_delivery: bool,
    #[serde(default)]
    pub skeleton: bool,
    #[serde(default)]
    pub metadata: Option<CaseMetadata>,
    #[serde(default)]
    pub print_batch: Option<String>,
    #[serde(default)]
    pub survey_launched: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default)]
    pub address_line1: Option<String>,
    #[serde(default)]
    pub address_line2: Option<String>,
    #[serde(default)]
    pub address_line3: Option<String>,
    #[serde(default)]
    pub town_name: Option<String>,
    #[serde(default)]
    pub postcode: Option<String>,
    #[serde(default)]
    pub latitude: Option<String>,
    #[serde(default)]
    pub longitude: Option<String>,
    #[serde(default)]
    pub uprn: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub address_level: Option<String>,
    #[serde(default)]
    pub abp_code: Option<String>,
    #[serde(default)]
    pub address_type: Option<String>,
    #[serde(default)]
    pub estab_uprn: Option<String>,
    #[serde(default)]
    pub estab_type: Option<String>,
    #[serde(default)]
    pub organisation_name: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefusalType {
    HardRefusal,
    ExtraordinaryRefusal,
}

impl RefusalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefusalType::HardRefusal => "HARD_REFUSAL",
            RefusalType::ExtraordinaryRefusal => "EXTRAORDINARY_REFUSAL",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseMetadata {
    #[serde(default)]
    pub secure_establishment: Option<bool>,
}

/// UAC/QID pairing as published by the UAC service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Uac {
    #[serde(default)]
    pub uac_hash: Option<String>,
    #[serde(default)]
    pub uac: Option<String>,
    #[serde(default)]
    pub active: bool,
    pub questionnaire_id: String,
    #[serde(default)]
    pub case_type: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub case_id: Option<CaseId>,
    #[serde(default)]
    pub collection_exercise_id: Option<Uuid>,
}

/// A request to print/send something for a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfilmentRequest {
    pub fulfilment_code: String,
    pub case_id: CaseId,
    #[serde(default)]
    pub individual_case_id: Option<CaseId>,
    #[serde(default)]
    pub contact: Contact,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub forename: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
}
