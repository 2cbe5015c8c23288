//! `tally-core` — event-store data model.
//!
//! This crate contains the passive records shared by the aggregators and the store
//! (no infrastructure concerns).

pub mod envelope;
pub mod error;
pub mod id;

pub use envelope::{Envelope, SNAPSHOT_NOTE, Snapshot};
pub use error::{DomainError, DomainResult};
pub use id::{
    AggregateId, SNAPSHOT_PARTITION_SUFFIX, aggregate_id_from_snapshot_partition,
    snapshot_partition,
};
