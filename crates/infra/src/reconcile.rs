//! Case and UAC link reconciliation against the store.
//!
//! The decisions (staleness, upsert) live in `census-action-cases`; these functions
//! only load, decide and save inside the caller's unit of work.

use tracing::{debug, warn};

use census_action_cases::{CaseRecord, CaseUpdate, UacQidLink};
use census_action_core::UacQidLinkId;
use census_action_events::{CollectionCase, Uac};

use crate::dispatcher::DispatchError;
use crate::store::UnitOfWork;

/// Insert a new case from its first snapshot.
///
/// A second insert for the same id fails the unit of work with
/// [`StoreError::Duplicate`](crate::store::StoreError::Duplicate); duplicates are not
/// silently absorbed.
pub async fn create_case(
    uow: &mut dyn UnitOfWork,
    snapshot: &CollectionCase,
) -> Result<CaseRecord, DispatchError> {
    let case = CaseRecord::from_snapshot(snapshot).map_err(|e| DispatchError::InvalidSnapshot {
        case_id: snapshot.id,
        reason: e.to_string(),
    })?;

    uow.insert_case(&case).await?;
    debug!(case_id = %case.case_id, case_ref = case.case_ref, "case created");
    Ok(case)
}

/// Apply a later snapshot to an existing case.
///
/// Stale snapshots (not strictly newer than what is stored) change nothing and are
/// not an error.
pub async fn update_case(
    uow: &mut dyn UnitOfWork,
    snapshot: &CollectionCase,
) -> Result<CaseUpdate, DispatchError> {
    let Some(mut case) = uow.find_case_for_update(snapshot.id).await? else {
        return Err(DispatchError::CaseNotFound(snapshot.id));
    };

    let update = case
        .apply_update(snapshot)
        .map_err(|e| DispatchError::InvalidSnapshot {
            case_id: snapshot.id,
            reason: e.to_string(),
        })?;

    match update {
        CaseUpdate::Applied => {
            uow.update_case(&case).await?;
            debug!(case_id = %case.case_id, last_updated = %case.last_updated, "case updated");
        }
        CaseUpdate::Stale { incoming, stored } => {
            warn!(
                case_id = %snapshot.id,
                incoming_last_updated = %incoming,
                stored_last_updated = %stored,
                "discarding stale case update"
            );
        }
    }

    Ok(update)
}

/// Create or overwrite the link for `uac.questionnaire_id`.
///
/// Replaying the same event converges to the same stored link.
pub async fn upsert_uac(uow: &mut dyn UnitOfWork, uac: &Uac) -> Result<UacQidLink, DispatchError> {
    let existing = uow.find_uac_link_for_update(&uac.questionnaire_id).await?;
    let created = existing.is_none();

    let link = UacQidLink::upsert(existing, uac, UacQidLinkId::new);
    uow.save_uac_link(&link).await?;

    debug!(
        qid = %link.qid,
        case_id = ?link.case_id,
        active = link.active,
        created,
        "uac link saved"
    );
    Ok(link)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    use super::*;
    use crate::store::{ActionStore, InMemoryActionStore};
    use crate::test_support::{collection_case_json, household_snapshot, INITIAL_LAST_UPDATED};
    use census_action_core::CaseId;

    fn snapshot_at(case_id: CaseId, last_updated: &str, postcode: &str) -> CollectionCase {
        let mut json = collection_case_json(case_id, "HH", last_updated);
        json["address"]["postcode"] = postcode.into();
        serde_json::from_value(json).unwrap()
    }

    #[tokio::test]
    async fn update_of_unknown_case_is_not_found() {
        let store = InMemoryActionStore::new();
        let mut uow = store.begin().await.unwrap();
        let case_id = CaseId::new();

        let err = update_case(uow.as_mut(), &household_snapshot(case_id)).await.unwrap_err();
        assert!(matches!(err, DispatchError::CaseNotFound(id) if id == case_id));
    }

    #[tokio::test]
    async fn unparsable_case_ref_is_rejected_before_any_write() {
        let store = InMemoryActionStore::new();
        let mut uow = store.begin().await.unwrap();
        let mut snapshot = household_snapshot(CaseId::new());
        snapshot.case_ref = "not-a-number".to_string();

        let err = create_case(uow.as_mut(), &snapshot).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidSnapshot { .. }));
        uow.commit().await.unwrap();
        assert_eq!(store.case_count().await, 0);
    }

    #[tokio::test]
    async fn invalid_newer_snapshot_fails_and_keeps_the_stored_case() {
        let store = InMemoryActionStore::new();
        let case_id = CaseId::new();
        let mut uow = store.begin().await.unwrap();
        create_case(uow.as_mut(), &household_snapshot(case_id)).await.unwrap();
        uow.commit().await.unwrap();

        let mut newer = snapshot_at(case_id, "2020-02-01T00:00Z", "ZZ9 9ZZ");
        newer.case_ref = "ref-7".to_string();

        let mut uow = store.begin().await.unwrap();
        let err = update_case(uow.as_mut(), &newer).await.unwrap_err();
        let DispatchError::InvalidSnapshot { case_id: id, reason } = err else {
            panic!("expected an invalid snapshot error, got {err:?}");
        };
        assert_eq!(id, case_id);
        assert!(reason.contains("ref-7"));
        drop(uow);
        assert_eq!(store.case(case_id).await.unwrap().postcode.as_deref(), Some("AB1 2CD"));
    }

    #[tokio::test]
    async fn uac_value_survives_later_updates() {
        let store = InMemoryActionStore::new();
        let case_a = CaseId::new();
        let case_b = CaseId::new();

        let first: Uac = serde_json::from_value(serde_json::json!({
            "questionnaireId": "0120000000000100",
            "uac": "first-uac",
            "caseId": case_a,
            "active": true
        }))
        .unwrap();
        let later: Uac = serde_json::from_value(serde_json::json!({
            "questionnaireId": "0120000000000100",
            "uac": "other-uac",
            "caseId": case_b,
            "active": false
        }))
        .unwrap();

        let mut uow = store.begin().await.unwrap();
        let created = upsert_uac(uow.as_mut(), &first).await.unwrap();
        let updated = upsert_uac(uow.as_mut(), &later).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(created.id, updated.id);
        assert_eq!(updated.uac.as_deref(), Some("first-uac"));
        assert_eq!(updated.case_id, Some(case_b));
        assert!(!updated.active);
        assert_eq!(store.uac_link_count().await, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        /// Property: a stored case only ever moves forward in time; an update at or before
        /// the stored timestamp leaves every stored field unchanged.
        #[test]
        fn stored_case_only_moves_forward(offset_minutes in -120i64..120) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = InMemoryActionStore::new();
                let case_id = CaseId::new();
                let base = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
                let incoming = (base + Duration::minutes(offset_minutes)).to_rfc3339();

                let mut uow = store.begin().await.unwrap();
                create_case(uow.as_mut(), &snapshot_at(case_id, INITIAL_LAST_UPDATED, "AB1 2CD")).await.unwrap();
                let update = update_case(uow.as_mut(), &snapshot_at(case_id, &incoming, "ZZ9 9ZZ")).await.unwrap();
                uow.commit().await.unwrap();

                let stored = store.case(case_id).await.unwrap();
                if offset_minutes > 0 {
                    prop_assert_eq!(update, CaseUpdate::Applied);
                    prop_assert_eq!(stored.postcode.as_deref(), Some("ZZ9 9ZZ"));
                    prop_assert_eq!(stored.last_updated, base + Duration::minutes(offset_minutes));
                } else {
                    prop_assert!(matches!(update, CaseUpdate::Stale { .. }), "expected stale update");
                    prop_assert_eq!(stored.postcode.as_deref(), Some("AB1 2CD"));
                    prop_assert_eq!(stored.last_updated, base);
                }
                Ok(())
            })?;
        }
    }
}
