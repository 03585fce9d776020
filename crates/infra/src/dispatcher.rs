//! Event dispatch pipeline.
//!
//! The `EventDispatcher` routes one decoded event to its handler inside one unit of
//! work:
//!
//! ```text
//! ResponseManagementEvent
//!   ↓
//! 1. Route by event type (unknown type / missing payload: fatal)
//!   ↓
//! 2. Survey scope filter (CCS events: discarded, no transaction)
//!   ↓
//! 3. Begin unit of work
//!   ↓
//! 4. Reconcile case / UAC state, then (fulfilment paths) classify, gate, validate
//!    and write the outbox item
//!   ↓
//! 5. Commit (any error: roll back)
//! ```
//!
//! The caller acknowledges the message only after `dispatch` returns `Ok`, i.e. after
//! the commit. On error nothing was persisted and the message is left for redelivery.
//! A message redelivered after its commit is absorbed by case updates (staleness),
//! UAC links (keyed upsert) and fulfilments (outbox id derived from the transaction
//! id). A redelivered case creation is a duplicate and fails.

use std::ops::ControlFlow;
use std::sync::Arc;

use thiserror::Error;
use tracing::{Span, debug, field, info, instrument, warn};
use uuid::Uuid;

use census_action_cases::{CaseRecord, CaseUpdate, SurveyScope};
use census_action_core::{CaseId, FulfilmentId};
use census_action_events::{
    CollectionCase, EventType, FulfilmentRequest, ResponseManagementEvent, Uac,
};
use census_action_fulfilment::{
    ActionType, Classification, Eligibility, FulfilmentRules, MissingMandatoryFields,
    check_eligibility, validate_mandatory_fields,
};

use crate::outbox::{self, OutboxWrite};
use crate::reconcile;
use crate::store::{ActionStore, StoreError, UnitOfWork};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Event type this consumer does not handle.
    #[error("unknown event type '{0}'")]
    UnknownEventType(String),

    /// The payload section the event type requires is absent.
    #[error("{event_type} event has no {section} payload")]
    MissingPayload {
        event_type: EventType,
        section: &'static str,
    },

    /// Update or fulfilment for a case that was never created.
    #[error("case not found: {0}")]
    CaseNotFound(CaseId),

    /// The case lacks fields the fulfilment needs.
    #[error(transparent)]
    Validation(#[from] MissingMandatoryFields),

    /// The snapshot cannot become a case record (e.g. unparsable caseRef).
    #[error("invalid snapshot for case {case_id}: {reason}")]
    InvalidSnapshot { case_id: CaseId, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// True for infrastructure failures that a later redelivery may get past.
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Store(e) if e.is_transient())
    }
}

/// What a successfully dispatched event did. Every variant is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Coverage-survey event, discarded.
    OutOfScope,
    CaseCreated {
        case_id: CaseId,
        fulfilment: Option<FulfilmentOutcome>,
    },
    CaseUpdated {
        case_id: CaseId,
        update: CaseUpdate,
    },
    UacLinked {
        qid: String,
        case_id: Option<CaseId>,
    },
    Fulfilment(FulfilmentOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfilmentOutcome {
    /// A work item was written to the outbox.
    Queued {
        id: FulfilmentId,
        action_type: ActionType,
    },
    /// Redelivered request whose work item is already in the outbox.
    AlreadyQueued { id: FulfilmentId },
    /// Individual request against a household case; the child case will carry it.
    Deferred,
    /// Known code handled by another system.
    Ignored,
    /// Code missing from the rules table.
    Unrecognised,
}

/// Immutable lookup tables injected into the dispatcher at start-up.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub rules: Arc<FulfilmentRules>,
    pub survey_scope: SurveyScope,
}

/// Work left for the unit of work once routing, scope filtering and fulfilment
/// classification have passed.
enum Work<'a> {
    CaseCreated {
        case: &'a CollectionCase,
        fulfilment: Option<&'a FulfilmentRequest>,
    },
    CaseUpdated(&'a CollectionCase),
    UacUpdated(&'a Uac),
    FulfilmentRequested {
        request: &'a FulfilmentRequest,
        action_type: ActionType,
    },
}

#[derive(Debug)]
pub struct EventDispatcher<S> {
    store: S,
    config: DispatcherConfig,
}

impl<S> EventDispatcher<S>
where
    S: ActionStore,
{
    pub fn new(store: S, config: DispatcherConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process one event to completion. Returns only after the unit of work has
    /// committed (or nothing needed writing).
    #[instrument(
        name = "dispatch",
        skip(self, event),
        fields(
            event_type = %event.event.event_type,
            source = field::Empty,
            channel = field::Empty,
            transaction_id = field::Empty,
            case_id = field::Empty,
            qid = field::Empty,
            fulfilment_code = field::Empty
        ),
        err
    )]
    pub async fn dispatch(
        &self,
        event: &ResponseManagementEvent,
    ) -> Result<DispatchOutcome, DispatchError> {
        record_header(event);

        let work = match self.plan(event)? {
            ControlFlow::Continue(work) => work,
            ControlFlow::Break(outcome) => return Ok(outcome),
        };

        let transaction_id = event.event.transaction_id;
        let mut uow = self.store.begin().await?;
        let result = match work {
            Work::CaseCreated { case, fulfilment } => {
                self.case_created(uow.as_mut(), transaction_id, case, fulfilment)
                    .await
            }
            Work::CaseUpdated(case) => reconcile::update_case(uow.as_mut(), case)
                .await
                .map(|update| DispatchOutcome::CaseUpdated {
                    case_id: case.id,
                    update,
                }),
            Work::UacUpdated(uac) => reconcile::upsert_uac(uow.as_mut(), uac).await.map(|link| {
                DispatchOutcome::UacLinked {
                    qid: link.qid,
                    case_id: link.case_id,
                }
            }),
            Work::FulfilmentRequested {
                request,
                action_type,
            } => self
                .fulfilment_requested(uow.as_mut(), transaction_id, request, action_type)
                .await
                .map(DispatchOutcome::Fulfilment),
        };

        match result {
            Ok(outcome) => {
                uow.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = uow.rollback().await {
                    warn!(error = %rollback_err, "rollback failed after dispatch error");
                }
                Err(err)
            }
        }
    }

    /// Decide everything that needs no store access: route by type, drop coverage
    /// survey events, classify a standalone fulfilment code.
    fn plan<'a>(
        &self,
        event: &'a ResponseManagementEvent,
    ) -> Result<ControlFlow<DispatchOutcome, Work<'a>>, DispatchError> {
        let event_type = &event.event.event_type;
        let payload = &event.payload;
        let scope = &self.config.survey_scope;
        let span = Span::current();

        let missing = |section| DispatchError::MissingPayload {
            event_type: event_type.clone(),
            section,
        };

        let work = match event_type {
            EventType::CaseCreated | EventType::CaseUpdated => {
                let case = payload
                    .collection_case
                    .as_ref()
                    .ok_or_else(|| missing("collectionCase"))?;
                span.record("case_id", field::display(case.id));

                if scope.is_out_of_scope_case(case) {
                    debug!(survey = ?case.survey, "discarding coverage survey case event");
                    return Ok(ControlFlow::Break(DispatchOutcome::OutOfScope));
                }

                if *event_type == EventType::CaseCreated {
                    Work::CaseCreated {
                        case,
                        fulfilment: payload.fulfilment_request.as_ref(),
                    }
                } else {
                    Work::CaseUpdated(case)
                }
            }
            EventType::UacUpdated => {
                let uac = payload.uac.as_ref().ok_or_else(|| missing("uac"))?;
                span.record("qid", uac.questionnaire_id.as_str());

                if scope.is_out_of_scope_qid(&uac.questionnaire_id) {
                    debug!("discarding coverage survey uac event");
                    return Ok(ControlFlow::Break(DispatchOutcome::OutOfScope));
                }
                Work::UacUpdated(uac)
            }
            EventType::FulfilmentRequested => {
                let request = payload
                    .fulfilment_request
                    .as_ref()
                    .ok_or_else(|| missing("fulfilmentRequest"))?;
                span.record("case_id", field::display(request.case_id));
                span.record("fulfilment_code", request.fulfilment_code.as_str());

                // Ignored codes never touch the store.
                match self.dispatchable(&request.fulfilment_code) {
                    ControlFlow::Continue(action_type) => Work::FulfilmentRequested {
                        request,
                        action_type,
                    },
                    ControlFlow::Break(skipped) => {
                        return Ok(ControlFlow::Break(DispatchOutcome::Fulfilment(skipped)));
                    }
                }
            }
            EventType::Other(name) => return Err(DispatchError::UnknownEventType(name.clone())),
        };

        Ok(ControlFlow::Continue(work))
    }

    async fn case_created(
        &self,
        uow: &mut dyn UnitOfWork,
        transaction_id: Option<Uuid>,
        snapshot: &CollectionCase,
        fulfilment: Option<&FulfilmentRequest>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let case = reconcile::create_case(uow, snapshot).await?;

        let fulfilment = match fulfilment {
            Some(request) => {
                Span::current().record("fulfilment_code", request.fulfilment_code.as_str());
                Some(match self.dispatchable(&request.fulfilment_code) {
                    ControlFlow::Continue(action_type) => {
                        self.fulfil(uow, transaction_id, &case, request, action_type)
                            .await?
                    }
                    ControlFlow::Break(skipped) => skipped,
                })
            }
            None => None,
        };

        Ok(DispatchOutcome::CaseCreated {
            case_id: case.case_id,
            fulfilment,
        })
    }

    async fn fulfilment_requested(
        &self,
        uow: &mut dyn UnitOfWork,
        transaction_id: Option<Uuid>,
        request: &FulfilmentRequest,
        action_type: ActionType,
    ) -> Result<FulfilmentOutcome, DispatchError> {
        let case = uow
            .find_case_for_update(request.case_id)
            .await?
            .ok_or(DispatchError::CaseNotFound(request.case_id))?;

        self.fulfil(uow, transaction_id, &case, request, action_type)
            .await
    }

    /// Gate, validate and queue a classified request against its resolved case.
    async fn fulfil(
        &self,
        uow: &mut dyn UnitOfWork,
        transaction_id: Option<Uuid>,
        case: &CaseRecord,
        request: &FulfilmentRequest,
        action_type: ActionType,
    ) -> Result<FulfilmentOutcome, DispatchError> {
        let rules = &self.config.rules;

        if check_eligibility(rules, &request.fulfilment_code, case) == Eligibility::Deferred {
            info!(
                case_id = %case.case_id,
                fulfilment_code = %request.fulfilment_code,
                individual_case_id = ?request.individual_case_id,
                "deferring individual fulfilment for household case"
            );
            return Ok(FulfilmentOutcome::Deferred);
        }

        validate_mandatory_fields(rules, &request.fulfilment_code, case)?;

        Ok(
            match outbox::write(uow, transaction_id, case, request, action_type).await? {
                OutboxWrite::Queued(item) => FulfilmentOutcome::Queued {
                    id: item.id,
                    action_type,
                },
                OutboxWrite::AlreadyQueued(id) => FulfilmentOutcome::AlreadyQueued { id },
            },
        )
    }

    fn dispatchable(&self, fulfilment_code: &str) -> ControlFlow<FulfilmentOutcome, ActionType> {
        match self.config.rules.classify(fulfilment_code) {
            Classification::Dispatch(action_type) => ControlFlow::Continue(action_type),
            Classification::Ignored => {
                debug!(fulfilment_code, "fulfilment code handled elsewhere, ignoring");
                ControlFlow::Break(FulfilmentOutcome::Ignored)
            }
            Classification::Unrecognised => {
                warn!(fulfilment_code, "unrecognised fulfilment code, ignoring");
                ControlFlow::Break(FulfilmentOutcome::Unrecognised)
            }
        }
    }
}

fn record_header(event: &ResponseManagementEvent) {
    let span = Span::current();
    let header = &event.event;
    if let Some(source) = &header.source {
        span.record("source", source.as_str());
    }
    if let Some(channel) = &header.channel {
        span.record("channel", channel.as_str());
    }
    if let Some(transaction_id) = header.transaction_id {
        span.record("transaction_id", field::display(transaction_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryActionStore;
    use crate::test_support::*;

    fn dispatcher() -> EventDispatcher<InMemoryActionStore> {
        EventDispatcher::new(
            InMemoryActionStore::new(),
            DispatcherConfig {
                rules: Arc::new(FulfilmentRules::census().unwrap()),
                survey_scope: SurveyScope::default(),
            },
        )
    }

    #[tokio::test]
    async fn unknown_event_type_is_fatal() {
        let d = dispatcher();
        let err = d.dispatch(&unknown_event()).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownEventType(ref t) if t == "RESPONSE_RECEIVED"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn missing_payload_section_is_fatal() {
        let d = dispatcher();
        let mut event = case_created(collection_case_json(CaseId::new(), "HH", INITIAL_LAST_UPDATED));
        event.payload.collection_case = None;

        let err = d.dispatch(&event).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::MissingPayload { section: "collectionCase", .. }
        ));
    }

    #[tokio::test]
    async fn ignored_code_does_not_need_the_case() {
        let d = dispatcher();
        // No such case exists; an ignored code must not look it up.
        let outcome = d
            .dispatch(&fulfilment_requested("UACIT1", CaseId::new()))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Fulfilment(FulfilmentOutcome::Ignored));
    }

    #[tokio::test]
    async fn unrecognised_code_is_acknowledged_not_failed() {
        let d = dispatcher();
        let outcome = d
            .dispatch(&fulfilment_requested("NOT_A_REAL_CODE", CaseId::new()))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Fulfilment(FulfilmentOutcome::Unrecognised)
        );
    }

    #[tokio::test]
    async fn fulfilment_for_unknown_case_is_fatal() {
        let d = dispatcher();
        let case_id = CaseId::new();
        let err = d
            .dispatch(&fulfilment_requested("P_OR_H1", case_id))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::CaseNotFound(id) if id == case_id));
    }

    #[tokio::test]
    async fn store_outage_is_transient() {
        let d = dispatcher();
        d.store().fail_next_commit();

        let err = d
            .dispatch(&case_created(collection_case_json(CaseId::new(), "HH", INITIAL_LAST_UPDATED)))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(d.store().case_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_case_creation_is_fatal() {
        let d = dispatcher();
        let event = case_created(collection_case_json(CaseId::new(), "HH", INITIAL_LAST_UPDATED));
        d.dispatch(&event).await.unwrap();

        let err = d.dispatch(&event).await.unwrap_err();
        assert!(matches!(err, DispatchError::Store(StoreError::Duplicate { .. })));
        assert!(!err.is_transient());
        assert_eq!(d.store().case_count().await, 1);
    }
}
