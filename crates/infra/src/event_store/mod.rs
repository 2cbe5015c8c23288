//! Append-only event store.
//!
//! [`EventStore`] is the engine; it runs over any [`KeyedStore`] backend. Two backends
//! ship: [`InMemoryKeyedStore`] for tests/dev and [`PostgresKeyedStore`] for persistence.

pub mod in_memory;
pub mod postgres;
pub mod store;
pub mod r#trait;

pub use in_memory::{DEFAULT_PAGE_SIZE, InMemoryKeyedStore};
pub use postgres::PostgresKeyedStore;
pub use r#trait::{BackendError, Item, KeyQuery, KeyedStore, NoteFilter, Page, SortOrder};
pub use store::{EventStore, EventStoreError, EventStoreResult};
