//! Infrastructure layer: storage backends, the event store engine, config.

pub mod config;
pub mod context;
pub mod event_store;
pub mod recorder;


pub use config::{BackendKind, ConfigError, EventStoreConfig};
pub use context::{CancelHandle, Interrupted, OperationContext};
pub use event_store::{EventStore, EventStoreError, EventStoreResult};
pub use recorder::Recorder;
