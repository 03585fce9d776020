//! Background consumers.

pub mod event_worker;

pub use event_worker::{EventWorker, Settlement, WorkerHandle};
