//! Inbound response-management events and the broker they arrive on.
//!
//! - [`envelope`] / [`payload`]: the JSON wire shape produced by the case processor
//! - [`bus`]: broker mechanics (receive, ack, nack) independent of transport
//! - [`in_memory_bus`]: an in-process broker for tests/dev

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod payload;
mod timestamp;

pub use bus::{Delivery, DeliveryTag, MessageBroker};
pub use envelope::{DecodeError, ResponseManagementEvent};
pub use event::{EventHeader, EventType};
pub use in_memory_bus::{InMemoryBroker, InMemoryBrokerError};
pub use payload::{
    Address, CaseMetadata, CollectionCase, Contact, FulfilmentRequest, Payload, RefusalType, Uac,
};
