//! Aggregator capability, registry and envelope-level dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use tally_core::Envelope;

use crate::codec::{CodecError, PayloadCodec};
use crate::hitpoints::{HIT_POINTS_EVENT, HitPointsAggregator};
use crate::levels::{LEVELS_EVENT, LevelsAggregator};

/// Aggregation failure.
///
/// Failure is total: when any of these is returned no aggregated payload exists.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// No aggregator is registered for the envelopes' `event_name`.
    #[error("no aggregator registered for event name '{name}'")]
    AggregatorNotFound { name: String },

    /// Level events mix XP with milestone leveling, or carry no leveling system at all.
    #[error("either multiple leveling systems used or no leveling system provided")]
    InconsistentLevelType,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("nothing to aggregate")]
    EmptyInput,

    /// Envelopes from different aggregates or of different event names were combined.
    #[error("cannot aggregate mixed stream: {0}")]
    MixedStream(String),

    /// A running total left the `i64` range.
    #[error("{field} overflowed while aggregating")]
    Overflow { field: &'static str },
}

/// Add `value` to `total`, failing with `Overflow` instead of wrapping.
pub(crate) fn checked_total(
    total: i64,
    value: i64,
    field: &'static str,
) -> Result<i64, AggregateError> {
    total
        .checked_add(value)
        .ok_or(AggregateError::Overflow { field })
}

/// A pluggable fold over opaque event payloads.
///
/// An aggregator reduces an ordered sequence of payloads (oldest first) into one payload of
/// the same schema. Implementations must be stateless between calls: the same input always
/// yields the same output, and a failed fold produces nothing.
pub trait Aggregator: Send + Sync {
    fn aggregate(&self, events: &[&[u8]]) -> Result<Vec<u8>, AggregateError>;
}

impl<A> Aggregator for Arc<A>
where
    A: Aggregator + ?Sized,
{
    fn aggregate(&self, events: &[&[u8]]) -> Result<Vec<u8>, AggregateError> {
        (**self).aggregate(events)
    }
}

/// Immutable `event_name -> Aggregator` dispatch table.
///
/// Built once through [`AggregatorRegistryBuilder`] and never mutated afterwards. Cloning
/// shares the table.
#[derive(Clone, Default)]
pub struct AggregatorRegistry {
    aggregators: Arc<HashMap<String, Arc<dyn Aggregator>>>,
}

impl AggregatorRegistry {
    pub fn builder() -> AggregatorRegistryBuilder {
        AggregatorRegistryBuilder::default()
    }

    /// Registry with the hit points and levels aggregators, both using `codec`.
    pub fn standard<C: PayloadCodec>(codec: C) -> Self {
        Self::builder()
            .register(HIT_POINTS_EVENT, HitPointsAggregator::new(codec.clone()))
            .register(LEVELS_EVENT, LevelsAggregator::new(codec))
            .build()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Aggregator> {
        self.aggregators.get(name).map(|a| a.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.aggregators.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.aggregators.keys().map(String::as_str)
    }

    /// Fold payloads with the aggregator registered for `name`.
    pub fn aggregate(&self, name: &str, events: &[&[u8]]) -> Result<Vec<u8>, AggregateError> {
        let aggregator = self
            .get(name)
            .ok_or_else(|| AggregateError::AggregatorNotFound {
                name: name.to_string(),
            })?;
        aggregator.aggregate(events)
    }
}

impl core::fmt::Debug for AggregatorRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("AggregatorRegistry")
            .field("aggregators", &names)
            .finish()
    }
}

#[derive(Default)]
pub struct AggregatorRegistryBuilder {
    aggregators: HashMap<String, Arc<dyn Aggregator>>,
}

impl AggregatorRegistryBuilder {
    /// Register `aggregator` for `name`, replacing any earlier registration.
    pub fn register<A>(mut self, name: impl Into<String>, aggregator: A) -> Self
    where
        A: Aggregator + 'static,
    {
        self.aggregators.insert(name.into(), Arc::new(aggregator));
        self
    }

    pub fn build(self) -> AggregatorRegistry {
        AggregatorRegistry {
            aggregators: Arc::new(self.aggregators),
        }
    }
}

/// Fold a stream of envelopes into one synthesized envelope.
///
/// All envelopes must share `id` and `event_name` and be ordered by version. The result
/// copies both, carries the aggregated payload, and takes `version = last.version + 1`:
/// the slot this aggregate would occupy next.
pub fn aggregate_envelopes(
    registry: &AggregatorRegistry,
    envelopes: &[Envelope],
) -> Result<Envelope, AggregateError> {
    let (first, last) = match (envelopes.first(), envelopes.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(AggregateError::EmptyInput),
    };

    for (idx, e) in envelopes.iter().enumerate() {
        if e.id != first.id {
            return Err(AggregateError::MixedStream(format!(
                "envelope at index {idx} belongs to '{}', expected '{}'",
                e.id, first.id
            )));
        }
        if e.event_name != first.event_name {
            return Err(AggregateError::MixedStream(format!(
                "envelope at index {idx} is '{}', expected '{}'",
                e.event_name, first.event_name
            )));
        }
    }

    let payloads: Vec<&[u8]> = envelopes.iter().map(|e| e.event.as_slice()).collect();
    let aggregated = registry.aggregate(&first.event_name, &payloads)?;

    debug!(
        aggregate_id = %first.id,
        event_name = %first.event_name,
        event_count = envelopes.len(),
        "aggregated envelopes"
    );

    Ok(Envelope::new(
        last.id.clone(),
        last.version + 1,
        last.event_name.clone(),
        aggregated,
    ))
}
