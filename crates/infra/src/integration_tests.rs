//! Integration tests for the full consumer pipeline.
//!
//! Tests: Broker → EventWorker → EventDispatcher → UnitOfWork → ack/nack
//!
//! Verifies:
//! - Case, UAC and fulfilment events end up in the store exactly as expected
//! - Benign no-ops are acknowledged without state changes
//! - Failures roll back every write and leave the message for redelivery
//! - Redelivery after a failed commit converges to a single persisted effect

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use census_action_cases::{CaseUpdate, SurveyScope};
    use census_action_core::CaseId;
    use census_action_events::{InMemoryBroker, MessageBroker, ResponseManagementEvent};
    use census_action_fulfilment::{ActionType, FulfilmentRules};

    use crate::dispatcher::{
        DispatchError, DispatchOutcome, DispatcherConfig, EventDispatcher, FulfilmentOutcome,
    };
    use crate::store::{ActionStore, InMemoryActionStore};
    use crate::test_support::*;
    use crate::workers::{EventWorker, Settlement};

    struct Harness {
        broker: Arc<InMemoryBroker>,
        dispatcher: Arc<EventDispatcher<InMemoryActionStore>>,
        worker: EventWorker<Arc<InMemoryBroker>, InMemoryActionStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_max_attempts(5)
        }

        fn with_max_attempts(max_attempts: u32) -> Self {
            let broker = Arc::new(InMemoryBroker::with_max_attempts(max_attempts));
            let dispatcher = Arc::new(EventDispatcher::new(
                InMemoryActionStore::new(),
                DispatcherConfig {
                    rules: Arc::new(FulfilmentRules::census().unwrap()),
                    survey_scope: SurveyScope::default(),
                },
            ));
            let worker = EventWorker::new("it-worker", broker.clone(), dispatcher.clone());
            Self {
                broker,
                dispatcher,
                worker,
            }
        }

        fn store(&self) -> &InMemoryActionStore {
            self.dispatcher.store()
        }

        /// Publish one event and let the worker settle it.
        async fn deliver(&self, event: &ResponseManagementEvent) -> Settlement {
            self.broker.publish(event.to_vec().unwrap()).await.unwrap();
            self.worker.process_next().await.unwrap().unwrap()
        }

        async fn create_case(&self, case_id: CaseId, case_type: &str) {
            let settlement = self
                .deliver(&case_created(collection_case_json(
                    case_id,
                    case_type,
                    INITIAL_LAST_UPDATED,
                )))
                .await;
            assert!(matches!(settlement, Settlement::Acked(_)));
        }
    }

    #[tokio::test]
    async fn case_created_stores_one_case_and_no_work_item() {
        let h = Harness::new();
        let case_id = CaseId::new();

        let settlement = h
            .deliver(&case_created(collection_case_json(case_id, "HH", "2020-01-01T00:00Z")))
            .await;

        assert_eq!(
            settlement,
            Settlement::Acked(DispatchOutcome::CaseCreated {
                case_id,
                fulfilment: None
            })
        );
        assert_eq!(h.store().case_count().await, 1);
        let case = h.store().case(case_id).await.unwrap();
        assert_eq!(case.case_ref, 100);
        assert_eq!(case.case_type.as_deref(), Some("HH"));
        assert_eq!(case.address_line1.as_deref(), Some("1 Road"));
        assert_eq!(case.postcode.as_deref(), Some("AB1 2CD"));
        assert_eq!(case.town_name.as_deref(), Some("Town"));
        assert_eq!(case.last_updated.to_rfc3339(), "2020-01-01T00:00:00+00:00");
        assert!(h.store().fulfilments().await.is_empty());
        assert!(h.broker.is_drained());
    }

    #[tokio::test]
    async fn household_paper_request_queues_one_work_item() {
        let h = Harness::new();
        let case_id = CaseId::new();
        h.create_case(case_id, "HH").await;

        let settlement = h.deliver(&fulfilment_requested("P_OR_H1", case_id)).await;

        assert!(matches!(
            settlement,
            Settlement::Acked(DispatchOutcome::Fulfilment(FulfilmentOutcome::Queued {
                action_type: ActionType::HouseholdQuestionnaire,
                ..
            }))
        ));
        let items = h.store().fulfilments().await;
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.case_id, case_id);
        assert_eq!(item.case_ref, 100);
        assert_eq!(item.fulfilment_code, "P_OR_H1");
        assert_eq!(item.action_type, ActionType::HouseholdQuestionnaire);
        assert_eq!(item.address_line1.as_deref(), Some("1 Road"));
        assert_eq!(item.postcode.as_deref(), Some("AB1 2CD"));
        assert_eq!(item.town_name.as_deref(), Some("Town"));
        assert_eq!(item.title.as_deref(), Some("Mr"));
        assert_eq!(item.forename.as_deref(), Some("A"));
        assert_eq!(item.surname.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn individual_request_against_household_case_is_deferred() {
        let h = Harness::new();
        let case_id = CaseId::new();
        h.create_case(case_id, "HH").await;

        let settlement = h.deliver(&fulfilment_requested("P_OR_I1", case_id)).await;

        assert_eq!(
            settlement,
            Settlement::Acked(DispatchOutcome::Fulfilment(FulfilmentOutcome::Deferred))
        );
        assert!(h.store().fulfilments().await.is_empty());
        assert!(h.broker.is_drained());
    }

    #[tokio::test]
    async fn individual_request_against_spg_case_is_queued() {
        let h = Harness::new();
        let case_id = CaseId::new();
        h.create_case(case_id, "SPG").await;

        h.deliver(&fulfilment_requested("P_OR_I1", case_id)).await;

        let items = h.store().fulfilments().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].action_type, ActionType::IndividualQuestionnaire);
    }

    #[tokio::test]
    async fn bundled_fulfilment_is_processed_against_the_new_case() {
        let h = Harness::new();
        let case_id = CaseId::new();
        let household_id = CaseId::new();

        let mut request = fulfilment_request_json("P_UAC_UACIP1", household_id);
        request["individualCaseId"] = json!(case_id);
        let settlement = h
            .deliver(&case_created_with_fulfilment(
                collection_case_json(case_id, "HI", INITIAL_LAST_UPDATED),
                request,
            ))
            .await;

        let Settlement::Acked(DispatchOutcome::CaseCreated {
            fulfilment: Some(FulfilmentOutcome::Queued { action_type, .. }),
            ..
        }) = settlement
        else {
            panic!("expected a queued bundled fulfilment");
        };
        assert_eq!(action_type, ActionType::IndividualUac);

        let items = h.store().fulfilments().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].case_id, case_id);
        assert_eq!(h.store().case_count().await, 1);
    }

    #[tokio::test]
    async fn bundled_individual_code_on_household_case_is_deferred() {
        let h = Harness::new();
        let case_id = CaseId::new();

        let settlement = h
            .deliver(&case_created_with_fulfilment(
                collection_case_json(case_id, "HH", INITIAL_LAST_UPDATED),
                fulfilment_request_json("P_OR_I1", case_id),
            ))
            .await;

        assert_eq!(
            settlement,
            Settlement::Acked(DispatchOutcome::CaseCreated {
                case_id,
                fulfilment: Some(FulfilmentOutcome::Deferred)
            })
        );
        assert_eq!(h.store().case_count().await, 1);
        assert!(h.store().fulfilments().await.is_empty());
        assert!(h.broker.is_drained());
    }

    #[tokio::test]
    async fn bundled_codes_without_action_store_only_the_case() {
        let h = Harness::new();

        for (code, expected) in [
            ("UACIT1", FulfilmentOutcome::Ignored),
            ("NOT_A_REAL_CODE", FulfilmentOutcome::Unrecognised),
        ] {
            let case_id = CaseId::new();
            let settlement = h
                .deliver(&case_created_with_fulfilment(
                    collection_case_json(case_id, "HH", INITIAL_LAST_UPDATED),
                    fulfilment_request_json(code, case_id),
                ))
                .await;

            assert_eq!(
                settlement,
                Settlement::Acked(DispatchOutcome::CaseCreated {
                    case_id,
                    fulfilment: Some(expected)
                }),
                "code {code}"
            );
            assert!(h.store().case(case_id).await.is_some());
        }

        assert!(h.store().fulfilments().await.is_empty());
        assert!(h.broker.is_drained());
    }

    #[tokio::test]
    async fn redelivered_fulfilment_queues_one_work_item() {
        let h = Harness::new();
        let case_id = CaseId::new();
        h.create_case(case_id, "HH").await;
        let event = fulfilment_requested("P_OR_H1", case_id);

        // Committed but unacknowledged, then delivered again.
        let first = h.deliver(&event).await;
        let second = h.deliver(&event).await;

        let Settlement::Acked(DispatchOutcome::Fulfilment(FulfilmentOutcome::Queued { id, .. })) =
            first
        else {
            panic!("first delivery should queue a work item");
        };
        assert_eq!(
            second,
            Settlement::Acked(DispatchOutcome::Fulfilment(FulfilmentOutcome::AlreadyQueued {
                id
            }))
        );
        let items = h.store().fulfilments().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);
    }

    #[tokio::test]
    async fn missing_mandatory_fields_fail_with_every_field_named() {
        let h = Harness::new();
        let case_id = CaseId::new();
        let mut case = collection_case_json(case_id, "HH", INITIAL_LAST_UPDATED);
        case["address"] = json!({ "townName": "Town" });
        h.deliver(&case_created(case)).await;

        let err = h
            .dispatcher
            .dispatch(&fulfilment_requested("P_OR_H1", case_id))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Validation(_)));
        assert_eq!(
            err.to_string(),
            format!(
                "received fulfilment request for case which is missing mandatory values: \
                 [addressLine1, postcode], fulfilmentCode: P_OR_H1, caseId: {case_id}"
            )
        );
        assert!(h.store().fulfilments().await.is_empty());
    }

    #[tokio::test]
    async fn validation_failure_rolls_back_the_bundled_case_and_nacks() {
        let h = Harness::with_max_attempts(1);
        let case_id = CaseId::new();
        let mut case = collection_case_json(case_id, "SPG", INITIAL_LAST_UPDATED);
        case["address"]["postcode"] = serde_json::Value::Null;

        let settlement = h
            .deliver(&case_created_with_fulfilment(
                case,
                fulfilment_request_json("P_OR_I1", case_id),
            ))
            .await;

        assert_eq!(settlement, Settlement::Nacked);
        assert_eq!(h.store().case_count().await, 0);
        assert!(h.store().fulfilments().await.is_empty());
        assert_eq!(h.broker.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn hand_delivery_needs_field_staff_unless_paper_questionnaire() {
        let h = Harness::new();
        let case_id = CaseId::new();
        let mut case = collection_case_json(case_id, "SPG", INITIAL_LAST_UPDATED);
        case["handDelivery"] = json!(true);
        h.deliver(&case_created(case)).await;

        let err = h
            .dispatcher
            .dispatch(&fulfilment_requested("P_UAC_UACHHP1", case_id))
            .await
            .unwrap_err();
        let DispatchError::Validation(missing) = err else {
            panic!("expected a validation failure");
        };
        assert_eq!(missing.missing, vec!["fieldCoordinatorId", "fieldOfficerId"]);

        h.dispatcher
            .dispatch(&fulfilment_requested("P_OR_H1", case_id))
            .await
            .unwrap();
        assert_eq!(h.store().fulfilments().await.len(), 1);
    }

    #[tokio::test]
    async fn repeated_uac_event_converges_to_one_link() {
        let h = Harness::new();
        let case_id = CaseId::new();
        let event = uac_updated("0120000000000100", "uac-1", Some(case_id), true);

        h.deliver(&event).await;
        let once = h.store().uac_link("0120000000000100").await.unwrap();
        for _ in 0..3 {
            h.deliver(&event).await;
        }

        assert_eq!(h.store().uac_link_count().await, 1);
        assert_eq!(h.store().uac_link("0120000000000100").await.unwrap(), once);
    }

    #[tokio::test]
    async fn out_of_order_updates_keep_the_newest_snapshot() {
        let h = Harness::new();
        let case_id = CaseId::new();
        h.create_case(case_id, "HH").await;

        let mut newer = collection_case_json(case_id, "HH", "2020-01-03T00:00Z");
        newer["address"]["postcode"] = json!("NEW 1AA");
        let mut older = collection_case_json(case_id, "HH", "2020-01-02T00:00Z");
        older["address"]["postcode"] = json!("OLD 1AA");

        let applied = h.deliver(&case_updated(newer)).await;
        let stale = h.deliver(&case_updated(older)).await;

        assert!(matches!(
            applied,
            Settlement::Acked(DispatchOutcome::CaseUpdated {
                update: CaseUpdate::Applied,
                ..
            })
        ));
        assert!(matches!(
            stale,
            Settlement::Acked(DispatchOutcome::CaseUpdated {
                update: CaseUpdate::Stale { .. },
                ..
            })
        ));
        let case = h.store().case(case_id).await.unwrap();
        assert_eq!(case.postcode.as_deref(), Some("NEW 1AA"));
        assert_eq!(case.last_updated.to_rfc3339(), "2020-01-03T00:00:00+00:00");
    }

    #[tokio::test]
    async fn update_for_unknown_case_is_nacked() {
        let h = Harness::new();
        let settlement = h
            .deliver(&case_updated(collection_case_json(
                CaseId::new(),
                "HH",
                INITIAL_LAST_UPDATED,
            )))
            .await;

        assert_eq!(settlement, Settlement::Nacked);
        assert_eq!(h.store().case_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_event_type_is_never_acked() {
        let h = Harness::with_max_attempts(3);
        h.broker
            .publish(unknown_event().to_vec().unwrap())
            .await
            .unwrap();

        for _ in 0..3 {
            assert_eq!(h.worker.process_next().await.unwrap(), Some(Settlement::Nacked));
        }
        assert_eq!(h.worker.process_next().await.unwrap(), None);
        assert_eq!(h.broker.acked_count(), 0);
        assert_eq!(h.broker.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn coverage_survey_events_are_acked_and_discarded() {
        let h = Harness::new();
        let mut ccs_case = collection_case_json(CaseId::new(), "HH", INITIAL_LAST_UPDATED);
        ccs_case["survey"] = json!("CCS");

        let case_settlement = h.deliver(&case_created(ccs_case)).await;
        let uac_settlement = h
            .deliver(&uac_updated("7100000000000001", "uac-ccs", None, true))
            .await;

        assert_eq!(case_settlement, Settlement::Acked(DispatchOutcome::OutOfScope));
        assert_eq!(uac_settlement, Settlement::Acked(DispatchOutcome::OutOfScope));
        assert_eq!(h.store().case_count().await, 0);
        assert_eq!(h.store().uac_link_count().await, 0);
        assert!(h.broker.is_drained());
    }

    #[tokio::test]
    async fn coverage_survey_update_is_discarded_before_case_lookup() {
        let h = Harness::new();
        let mut ccs_case = collection_case_json(CaseId::new(), "HH", INITIAL_LAST_UPDATED);
        ccs_case["survey"] = json!("CCS");

        let settlement = h.deliver(&case_updated(ccs_case)).await;

        assert_eq!(settlement, Settlement::Acked(DispatchOutcome::OutOfScope));
        assert_eq!(h.store().case_count().await, 0);
        assert!(h.broker.is_drained());
    }

    #[tokio::test]
    async fn redelivery_after_failed_commit_persists_once() {
        let h = Harness::new();
        let case_id = CaseId::new();
        h.store().fail_next_commit();

        let first = h
            .deliver(&case_created(collection_case_json(case_id, "HH", INITIAL_LAST_UPDATED)))
            .await;
        assert_eq!(first, Settlement::Nacked);
        assert_eq!(h.store().case_count().await, 0);

        let retry = h.worker.process_next().await.unwrap().unwrap();
        assert!(matches!(retry, Settlement::Acked(DispatchOutcome::CaseCreated { .. })));
        assert_eq!(h.store().case_count().await, 1);
        assert!(h.broker.is_drained());
    }

    #[tokio::test]
    async fn outbox_reports_distinct_pending_codes() {
        let h = Harness::new();
        let case_id = CaseId::new();
        h.create_case(case_id, "SPG").await;

        for code in ["P_OR_H1", "P_OR_I1", "P_OR_H1", "UACHHT1"] {
            h.deliver(&fulfilment_requested(code, case_id)).await;
        }

        assert_eq!(h.store().fulfilments().await.len(), 3);
        assert_eq!(
            h.store().pending_fulfilment_codes().await.unwrap(),
            vec!["P_OR_H1".to_string(), "P_OR_I1".to_string()]
        );
    }
}
