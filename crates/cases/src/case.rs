use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use census_action_core::{CaseId, DomainError, DomainResult};
use census_action_events::{CollectionCase, RefusalType};

/// Case type whose individual-response requests must wait for a child case.
pub const HOUSEHOLD_CASE_TYPE: &str = "HH";

/// Persisted case snapshot.
///
/// Every field is overwritten wholesale from the upstream snapshot; nothing is merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_id: CaseId,
    pub case_ref: i64,
    pub case_type: Option<String>,
    pub collection_exercise_id: Option<Uuid>,
    pub action_plan_id: Option<Uuid>,
    pub treatment_code: Option<String>,

    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub address_line3: Option<String>,
    pub town_name: Option<String>,
    pub postcode: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub uprn: Option<String>,
    pub region: Option<String>,
    pub address_level: Option<String>,
    pub abp_code: Option<String>,
    pub address_type: Option<String>,
    pub estab_uprn: Option<String>,
    pub estab_type: Option<String>,
    pub organisation_name: Option<String>,

    pub oa: Option<String>,
    pub lsoa: Option<String>,
    pub msoa: Option<String>,
    pub lad: Option<String>,
    pub htc_willingness: Option<String>,
    pub htc_digital: Option<String>,
    pub field_coordinator_id: Option<String>,
    pub field_officer_id: Option<String>,

    pub ce_expected_capacity: Option<i32>,
    pub ce_actual_responses: i32,
    pub receipt_received: Option<bool>,
    pub refusal_received: Option<RefusalType>,
    pub address_invalid: Option<bool>,
    pub hand_delivery: bool,
    pub skeleton: bool,
    pub secure_establishment: Option<bool>,
    pub print_batch: Option<String>,
    pub survey_launched: bool,

    pub created_date_time: Option<DateTime<Utc>>,
    /// Producer-supplied timestamp of the snapshot; only ever moves forward.
    pub last_updated: DateTime<Utc>,
}

/// Outcome of applying a "case updated" snapshot to a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseUpdate {
    /// The snapshot was newer; all fields were overwritten.
    Applied,
    /// The snapshot was not newer than what is stored; nothing changed.
    Stale {
        incoming: DateTime<Utc>,
        stored: DateTime<Utc>,
    },
}

impl CaseRecord {
    /// Build a record from an upstream snapshot.
    pub fn from_snapshot(snapshot: &CollectionCase) -> DomainResult<Self> {
        let case_ref = parse_case_ref(&snapshot.case_ref)?;
        let address = &snapshot.address;

        Ok(Self {
            case_id: snapshot.id,
            case_ref,
            case_type: snapshot.case_type.clone(),
            collection_exercise_id: snapshot.collection_exercise_id,
            action_plan_id: snapshot.action_plan_id,
            treatment_code: snapshot.treatment_code.clone(),

            address_line1: address.address_line1.clone(),
            address_line2: address.address_line2.clone(),
            address_line3: address.address_line3.clone(),
            town_name: address.town_name.clone(),
            postcode: address.postcode.clone(),
            latitude: address.latitude.clone(),
            longitude: address.longitude.clone(),
            uprn: address.uprn.clone(),
            region: address.region.clone(),
            address_level: address.address_level.clone(),
            abp_code: address.abp_code.clone(),
            address_type: address.address_type.clone(),
            estab_uprn: address.estab_uprn.clone(),
            estab_type: address.estab_type.clone(),
            organisation_name: address.organisation_name.clone(),

            oa: snapshot.oa.clone(),
            lsoa: snapshot.lsoa.clone(),
            msoa: snapshot.msoa.clone(),
            lad: snapshot.lad.clone(),
            htc_willingness: snapshot.htc_willingness.clone(),
            htc_digital: snapshot.htc_digital.clone(),
            field_coordinator_id: snapshot.field_coordinator_id.clone(),
            field_officer_id: snapshot.field_officer_id.clone(),

            ce_expected_capacity: snapshot.ce_expected_capacity,
            ce_actual_responses: snapshot.ce_actual_responses,
            receipt_received: snapshot.receipt_received,
            refusal_received: snapshot.refusal_received,
            address_invalid: snapshot.address_invalid,
            hand_delivery: snapshot.hand_delivery,
            skeleton: snapshot.skeleton,
            secure_establishment: snapshot
                .metadata
                .as_ref()
                .and_then(|m| m.secure_establishment),
            print_batch: snapshot.print_batch.clone(),
            survey_launched: snapshot.survey_launched,

            created_date_time: snapshot.created_date_time,
            last_updated: snapshot.last_updated,
        })
    }

    /// Apply a newer snapshot, or report it as stale.
    ///
    /// The update applies only when `snapshot.last_updated` is strictly after the
    /// stored `last_updated`. On error the record is left untouched.
    pub fn apply_update(&mut self, snapshot: &CollectionCase) -> DomainResult<CaseUpdate> {
        if snapshot.id != self.case_id {
            return Err(DomainError::validation(format!(
                "snapshot for case '{}' applied to case '{}'",
                snapshot.id, self.case_id
            )));
        }

        if snapshot.last_updated <= self.last_updated {
            return Ok(CaseUpdate::Stale {
                incoming: snapshot.last_updated,
                stored: self.last_updated,
            });
        }

        *self = Self::from_snapshot(snapshot)?;
        Ok(CaseUpdate::Applied)
    }

    pub fn is_household(&self) -> bool {
        self.case_type.as_deref() == Some(HOUSEHOLD_CASE_TYPE)
    }
}

fn parse_case_ref(raw: &str) -> DomainResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|e| DomainError::validation(format!("invalid caseRef '{raw}': {e}")))
}
