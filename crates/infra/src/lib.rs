//! Infrastructure layer: store, broker, dispatch pipeline, config.

pub mod config;
pub mod dispatcher;
pub mod event_bus;
pub mod outbox;
pub mod reconcile;
pub mod store;
pub mod workers;

mod integration_tests;
#[cfg(test)]
mod test_support;

pub use config::{AppConfig, BrokerConfig, ConfigError, DatabaseConfig};
pub use dispatcher::{
    DispatchError, DispatchOutcome, DispatcherConfig, EventDispatcher, FulfilmentOutcome,
};
pub use store::{ActionStore, InMemoryActionStore, PostgresActionStore, StoreError, UnitOfWork};
pub use workers::{EventWorker, Settlement, WorkerHandle};
