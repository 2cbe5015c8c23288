//! Aggregate identifiers and the snapshot partition derivation.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Suffix appended to an aggregate identifier to form its snapshot partition.
///
/// Raw events live under `<id>`, snapshots under `<id>#SNAPSHOT`, so the two never share
/// a `(partition, version)` pair.
pub const SNAPSHOT_PARTITION_SUFFIX: &str = "#SNAPSHOT";

/// Identifier of an aggregate (the partition key of its event stream).
///
/// Opaque to the store. New aggregates usually get a UUID, but any non-empty string that
/// does not end with [`SNAPSHOT_PARTITION_SUFFIX`] is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(String);

impl AggregateId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Check that the identifier is usable as a raw-event partition key.
    ///
    /// The `From` conversions accept any string; this is the check they skip.
    pub fn validate(&self) -> Result<(), DomainError> {
        check_id(&self.0)
    }

    /// Partition key under which snapshots of this aggregate are stored.
    pub fn snapshot_partition(&self) -> String {
        snapshot_partition(&self.0)
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AggregateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for AggregateId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for AggregateId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<Uuid> for AggregateId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

impl From<AggregateId> for String {
    fn from(value: AggregateId) -> Self {
        value.0
    }
}

impl FromStr for AggregateId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_id(s)?;
        Ok(Self(s.to_string()))
    }
}

fn check_id(s: &str) -> Result<(), DomainError> {
    if s.is_empty() {
        return Err(DomainError::invalid_id("AggregateId: empty"));
    }
    if s.ends_with(SNAPSHOT_PARTITION_SUFFIX) {
        return Err(DomainError::invalid_id(format!(
            "AggregateId: '{s}' ends with reserved suffix '{SNAPSHOT_PARTITION_SUFFIX}'"
        )));
    }
    Ok(())
}

/// Derive the snapshot partition key for an aggregate identifier.
pub fn snapshot_partition(id: &str) -> String {
    format!("{id}{SNAPSHOT_PARTITION_SUFFIX}")
}

/// Reverse of [`snapshot_partition`].
///
/// Returns `None` when `partition` is not a snapshot partition.
pub fn aggregate_id_from_snapshot_partition(partition: &str) -> Option<&str> {
    partition.strip_suffix(SNAPSHOT_PARTITION_SUFFIX)
}
