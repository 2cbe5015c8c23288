//! Aggregation dispatch for event payloads.
//!
//! The store hands raw payload bytes to the [`Aggregator`] registered for an envelope's
//! `event_name`; this crate owns that registry and the reference folds.

pub mod aggregator;
pub mod codec;
pub mod hitpoints;
pub mod levels;

pub use aggregator::{
    AggregateError, Aggregator, AggregatorRegistry, AggregatorRegistryBuilder,
    aggregate_envelopes,
};
pub use codec::{CodecError, JsonCodec, PayloadCodec};
pub use hitpoints::{AGGREGATED_NOTES_PREFIX, HIT_POINTS_EVENT, HitPoints, HitPointsAggregator};
pub use levels::{LEVELS_EVENT, Level, LevelType, LevelsAggregator};
