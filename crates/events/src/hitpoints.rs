//! Additive hit point fold.

use serde::{Deserialize, Serialize};

use crate::aggregator::{AggregateError, Aggregator, checked_total};
use crate::codec::PayloadCodec;

/// Event name under which hit point changes are stored.
pub const HIT_POINTS_EVENT: &str = "hitpoints";

/// Marker that starts every aggregated note.
pub const AGGREGATED_NOTES_PREFIX: &str = "Aggregated Notes: ";

/// A change to a player character's hit points, with the reason for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitPoints {
    #[serde(default)]
    pub id: String,
    pub character_name: String,
    /// Delta applied to the character's hit points (negative for damage).
    pub character_hit_points: i64,
    #[serde(default)]
    pub note: String,
}

/// Sums hit point deltas and keeps an audit trail of every change in the note.
///
/// Identity fields come from the last event in the sequence.
#[derive(Debug, Clone, Default)]
pub struct HitPointsAggregator<C> {
    codec: C,
}

impl<C: PayloadCodec> HitPointsAggregator<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    /// Fold already-decoded events.
    pub fn fold<'a>(
        events: impl IntoIterator<Item = &'a HitPoints>,
    ) -> Result<HitPoints, AggregateError> {
        let mut total = HitPoints {
            note: AGGREGATED_NOTES_PREFIX.to_string(),
            ..HitPoints::default()
        };
        for hp in events {
            total.id.clone_from(&hp.id);
            total.character_name.clone_from(&hp.character_name);
            total.character_hit_points = checked_total(
                total.character_hit_points,
                hp.character_hit_points,
                "character_hit_points",
            )?;
            total.note.push_str(&format!(
                "hit point change of {} with note '{}'",
                hp.character_hit_points, hp.note
            ));
        }
        Ok(total)
    }
}

impl<C: PayloadCodec> Aggregator for HitPointsAggregator<C> {
    fn aggregate(&self, events: &[&[u8]]) -> Result<Vec<u8>, AggregateError> {
        let decoded = events
            .iter()
            .map(|bytes| self.codec.decode::<HitPoints>(bytes))
            .collect::<Result<Vec<_>, _>>()?;

        let total = Self::fold(&decoded)?;
        Ok(self.codec.encode(&total)?)
    }
}
