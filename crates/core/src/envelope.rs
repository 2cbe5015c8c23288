use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::AggregateId;

/// Reserved `note` value marking a record as a snapshot rather than a raw event.
pub const SNAPSHOT_NOTE: &str = "SNAPSHOT";

/// One immutable fact about one aggregate.
///
/// This is the unit appended to an event stream. The store never looks inside `event`;
/// only the aggregator registered for `event_name` knows how to decode it.
///
/// Notes:
/// - `version` is caller-assigned and unique per `id`; gaps are allowed.
/// - Once appended an envelope is never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: AggregateId,

    /// Position of this record in the aggregate stream.
    pub version: i64,

    pub event_name: String,
    pub event: Vec<u8>,
    pub note: String,
}

impl Envelope {
    pub fn new(
        id: impl Into<AggregateId>,
        version: i64,
        event_name: impl Into<String>,
        event: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            version,
            event_name: event_name.into(),
            event,
            note: String::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn is_snapshot(&self) -> bool {
        self.note == SNAPSHOT_NOTE
    }

    /// Check the invariants a record must satisfy before it is written.
    pub fn validate(&self) -> DomainResult<()> {
        self.id.validate()?;
        if self.version < 0 {
            return Err(DomainError::invariant(format!(
                "envelope version must be non-negative, got {}",
                self.version
            )));
        }
        if self.event_name.is_empty() {
            return Err(DomainError::invariant("envelope event_name is empty"));
        }
        Ok(())
    }
}

/// Compaction checkpoint for one aggregate.
///
/// A snapshot carries the aggregated payload of every raw event with a version below
/// `latest_version`. It is stored in the aggregate's snapshot partition under `version`,
/// and producing a new snapshot never removes older ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: AggregateId,

    /// Slot of the snapshot record inside the snapshot partition.
    pub version: i64,

    /// First raw-event version not folded into this snapshot.
    pub latest_version: i64,

    pub event_name: String,
    pub event: Vec<u8>,
}

impl Snapshot {
    /// Build a snapshot from the envelope returned by a projection.
    ///
    /// A projected envelope's version is the slot after the last folded event, so it
    /// serves both as the snapshot slot and as the replay starting point.
    pub fn from_projection(projected: Envelope) -> Self {
        Self {
            id: projected.id,
            version: projected.version,
            latest_version: projected.version,
            event_name: projected.event_name,
            event: projected.event,
        }
    }

    /// Re-wrap the snapshot payload as an envelope sitting just before the first
    /// unfolded raw event, so it can lead an aggregation sequence.
    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            id: self.id.clone(),
            version: self.latest_version - 1,
            event_name: self.event_name.clone(),
            event: self.event.clone(),
            note: SNAPSHOT_NOTE.to_string(),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        self.id.validate()?;
        if self.version < 0 {
            return Err(DomainError::invariant(format!(
                "snapshot version must be non-negative, got {}",
                self.version
            )));
        }
        if self.latest_version < 1 {
            return Err(DomainError::invariant(format!(
                "snapshot latest_version must cover at least one event, got {}",
                self.latest_version
            )));
        }
        if self.event_name.is_empty() {
            return Err(DomainError::invariant("snapshot event_name is empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_from_projection_starts_replay_at_projected_version() {
        let projected = Envelope::new("X", 3, "hitpoints", vec![1, 2, 3]);
        let snapshot = Snapshot::from_projection(projected);

        assert_eq!(snapshot.version, 3);
        assert_eq!(snapshot.latest_version, 3);

        let synthetic = snapshot.to_envelope();
        assert_eq!(synthetic.version, 2);
        assert_eq!(synthetic.event, vec![1, 2, 3]);
        assert!(synthetic.is_snapshot());
    }

    #[test]
    fn validate_rejects_negative_versions() {
        let env = Envelope::new("X", -1, "hitpoints", vec![]);
        assert!(matches!(env.validate(), Err(DomainError::InvariantViolation(_))));

        let env = Envelope::new("X", 0, "", vec![]);
        assert!(env.validate().is_err());

        assert!(Envelope::new("X", 0, "hitpoints", vec![]).validate().is_ok());
    }

    #[test]
    fn validate_rejects_ids_in_the_snapshot_partition() {
        let env = Envelope::new("X#SNAPSHOT", 3, "hitpoints", vec![]);
        assert!(matches!(env.validate(), Err(DomainError::InvalidId(_))));

        let env = Envelope::new("", 0, "hitpoints", vec![]);
        assert!(matches!(env.validate(), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn validate_rejects_snapshot_without_folded_events() {
        let snapshot = Snapshot {
            id: AggregateId::from("X"),
            version: 0,
            latest_version: 0,
            event_name: "hitpoints".into(),
            event: vec![],
        };
        assert!(snapshot.validate().is_err());
    }
}
