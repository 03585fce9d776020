//! Fulfilment outbox writer.

use tracing::{info, warn};
use uuid::Uuid;

use census_action_cases::CaseRecord;
use census_action_core::FulfilmentId;
use census_action_events::FulfilmentRequest;
use census_action_fulfilment::{ActionType, FulfilmentToProcess};

use crate::store::{StoreError, UnitOfWork};

/// Result of an outbox write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxWrite {
    Queued(FulfilmentToProcess),
    /// A redelivery of a message whose work item is already in the outbox.
    AlreadyQueued(FulfilmentId),
}

/// Assemble the work item for a validated request and add it to the outbox.
///
/// Address and contact fields are copied now, inside the same unit of work as the
/// event's other writes. Callers must have run the mandatory-field validation first.
///
/// The item id is derived from `transaction_id`, so writing the same message twice
/// leaves one item. Without a transaction id every write gets a fresh id.
pub async fn write(
    uow: &mut dyn UnitOfWork,
    transaction_id: Option<Uuid>,
    case: &CaseRecord,
    request: &FulfilmentRequest,
    action_type: ActionType,
) -> Result<OutboxWrite, StoreError> {
    let id = match transaction_id {
        Some(transaction_id) => {
            FulfilmentId::for_request(transaction_id, case.case_id, &request.fulfilment_code)
        }
        None => {
            warn!(
                case_id = %case.case_id,
                fulfilment_code = %request.fulfilment_code,
                "event has no transaction id, redelivery cannot be detected"
            );
            FulfilmentId::new()
        }
    };

    let item = FulfilmentToProcess::assemble(id, case, request, action_type);
    if !uow.insert_fulfilment(&item).await? {
        info!(
            fulfilment_id = %id,
            case_id = %item.case_id,
            fulfilment_code = %item.fulfilment_code,
            "fulfilment already queued"
        );
        return Ok(OutboxWrite::AlreadyQueued(id));
    }

    info!(
        fulfilment_id = %item.id,
        case_id = %item.case_id,
        fulfilment_code = %item.fulfilment_code,
        action_type = %item.action_type,
        "fulfilment queued"
    );
    Ok(OutboxWrite::Queued(item))
}
