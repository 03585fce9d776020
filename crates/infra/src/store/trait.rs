use async_trait::async_trait;
use thiserror::Error;

use census_action_cases::{CaseRecord, UacQidLink};
use census_action_core::CaseId;
use census_action_fulfilment::FulfilmentToProcess;

/// Errors surfaced by a store or one of its units of work.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write (e.g. a case id inserted twice).
    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// The row a write targets does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Connectivity, timeout or any other failure of the storage engine.
    #[error("database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },

    /// A stored row could not be mapped back into a domain value.
    #[error("failed to decode {entity} row: {message}")]
    Decode {
        entity: &'static str,
        message: String,
    },
}

impl StoreError {
    /// Whether retrying the same message later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database { .. })
    }
}

/// One atomic unit of work over cases, UAC links and the fulfilment outbox.
///
/// ## Atomicity
///
/// Writes become visible only on [`UnitOfWork::commit`]. Dropping a unit of work
/// without committing discards every write made through it, exactly like
/// [`UnitOfWork::rollback`].
///
/// The consumer acknowledges the inbound message only after `commit` returns `Ok`.
/// A crash between commit and acknowledgement causes a redelivery. Case updates
/// (staleness check), UAC links (keyed upsert) and outbox items (id derived from the
/// event's transaction id) absorb it. A redelivered case creation hits
/// [`StoreError::Duplicate`] and is dead-lettered after the broker's attempt limit.
///
/// ## Locking
///
/// `find_case_for_update` and `find_uac_link_for_update` take a row lock held until
/// the unit of work ends, so concurrent handlers touching the same case or qid
/// serialise instead of overwriting each other.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Load a case and lock it for the rest of this unit of work.
    async fn find_case_for_update(&mut self, case_id: CaseId)
    -> Result<Option<CaseRecord>, StoreError>;

    /// Insert a new case. An existing row with the same id is [`StoreError::Duplicate`].
    async fn insert_case(&mut self, case: &CaseRecord) -> Result<(), StoreError>;

    /// Overwrite an existing case. A missing row is [`StoreError::NotFound`].
    async fn update_case(&mut self, case: &CaseRecord) -> Result<(), StoreError>;

    /// Load the link for a questionnaire id and lock it for the rest of this unit of work.
    async fn find_uac_link_for_update(
        &mut self,
        qid: &str,
    ) -> Result<Option<UacQidLink>, StoreError>;

    /// Insert or overwrite the link keyed by `link.qid`.
    async fn save_uac_link(&mut self, link: &UacQidLink) -> Result<(), StoreError>;

    /// Append one work item to the fulfilment outbox.
    ///
    /// Returns `false`, writing nothing, when an item with the same id is already there.
    async fn insert_fulfilment(&mut self, item: &FulfilmentToProcess) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Durable case/UAC/outbox store.
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Start a new unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Distinct fulfilment codes currently waiting in the outbox, sorted.
    async fn pending_fulfilment_codes(&self) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
impl<S> ActionStore for std::sync::Arc<S>
where
    S: ActionStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        (**self).begin().await
    }

    async fn pending_fulfilment_codes(&self) -> Result<Vec<String>, StoreError> {
        (**self).pending_fulfilment_codes().await
    }
}
