use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use census_action_cases::{CaseRecord, UacQidLink};
use census_action_core::CaseId;
use census_action_fulfilment::FulfilmentToProcess;

use super::r#trait::{ActionStore, StoreError, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct Tables {
    cases: HashMap<CaseId, CaseRecord>,
    uac_links: HashMap<String, UacQidLink>,
    fulfilments: Vec<FulfilmentToProcess>,
}

/// In-memory store.
///
/// Intended for tests/dev. A unit of work holds the whole store lock from `begin`
/// until it ends, so transactions are fully serialised; writes go to a private copy
/// that replaces the tables on commit.
#[derive(Debug, Default)]
pub struct InMemoryActionStore {
    tables: Arc<Mutex<Tables>>,
    fail_next_commit: AtomicBool,
}

impl InMemoryActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail with a [`StoreError::Database`], as an outage would.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub async fn case(&self, case_id: CaseId) -> Option<CaseRecord> {
        self.tables.lock().await.cases.get(&case_id).cloned()
    }

    pub async fn case_count(&self) -> usize {
        self.tables.lock().await.cases.len()
    }

    pub async fn uac_link(&self, qid: &str) -> Option<UacQidLink> {
        self.tables.lock().await.uac_links.get(qid).cloned()
    }

    pub async fn uac_link_count(&self) -> usize {
        self.tables.lock().await.uac_links.len()
    }

    /// Outbox contents in insertion order.
    pub async fn fulfilments(&self) -> Vec<FulfilmentToProcess> {
        self.tables.lock().await.fulfilments.clone()
    }
}

#[async_trait]
impl ActionStore for InMemoryActionStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        let fail_commit = self.fail_next_commit.swap(false, Ordering::SeqCst);

        Ok(Box::new(InMemoryUnitOfWork {
            guard,
            working,
            fail_commit,
        }))
    }

    async fn pending_fulfilment_codes(&self) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.lock().await;
        let codes: BTreeSet<&str> = tables
            .fulfilments
            .iter()
            .map(|f| f.fulfilment_code.as_str())
            .collect();
        Ok(codes.into_iter().map(str::to_string).collect())
    }
}

struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    fail_commit: bool,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn find_case_for_update(
        &mut self,
        case_id: CaseId,
    ) -> Result<Option<CaseRecord>, StoreError> {
        Ok(self.working.cases.get(&case_id).cloned())
    }

    async fn insert_case(&mut self, case: &CaseRecord) -> Result<(), StoreError> {
        if self.working.cases.contains_key(&case.case_id) {
            return Err(StoreError::Duplicate {
                entity: "case",
                key: case.case_id.to_string(),
            });
        }
        self.working.cases.insert(case.case_id, case.clone());
        Ok(())
    }

    async fn update_case(&mut self, case: &CaseRecord) -> Result<(), StoreError> {
        match self.working.cases.get_mut(&case.case_id) {
            Some(stored) => {
                *stored = case.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "case",
                key: case.case_id.to_string(),
            }),
        }
    }

    async fn find_uac_link_for_update(
        &mut self,
        qid: &str,
    ) -> Result<Option<UacQidLink>, StoreError> {
        Ok(self.working.uac_links.get(qid).cloned())
    }

    async fn save_uac_link(&mut self, link: &UacQidLink) -> Result<(), StoreError> {
        self.working.uac_links.insert(link.qid.clone(), link.clone());
        Ok(())
    }

    async fn insert_fulfilment(&mut self, item: &FulfilmentToProcess) -> Result<bool, StoreError> {
        if self.working.fulfilments.iter().any(|f| f.id == item.id) {
            return Ok(false);
        }
        self.working.fulfilments.push(item.clone());
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryUnitOfWork {
            mut guard,
            working,
            fail_commit,
        } = *self;

        if fail_commit {
            return Err(StoreError::Database {
                operation: "commit",
                message: "simulated storage outage".to_string(),
            });
        }

        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
