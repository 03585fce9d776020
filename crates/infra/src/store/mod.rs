//! Case, UAC link and outbox persistence.
//!
//! - [`ActionStore`] / [`UnitOfWork`]: transactional store abstraction
//! - [`InMemoryActionStore`]: tests/dev
//! - [`PostgresActionStore`]: production (`sqlx`)

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryActionStore;
pub use postgres::PostgresActionStore;
pub use r#trait::{ActionStore, StoreError, UnitOfWork};
