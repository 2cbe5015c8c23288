//! Mutually exclusive leveling-mode accumulator.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::aggregator::{AggregateError, Aggregator, checked_total};
use crate::codec::PayloadCodec;

/// Event name under which level progression is stored.
pub const LEVELS_EVENT: &str = "levels";

/// How a character advances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelType {
    /// No leveling system recorded; never valid in an aggregation.
    #[default]
    Empty,
    /// Experience points accumulate.
    #[serde(rename = "XP")]
    Xp,
    /// Levels are granted directly.
    Milestone,
}

/// Progress towards the next level, in either experience or whole levels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    #[serde(default)]
    pub id: String,
    pub character_name: String,
    #[serde(default)]
    pub level_type: LevelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub levels: Option<i64>,
}

/// Accumulates experience or levels, whichever leveling system the stream uses.
///
/// A stream must stick to one system: mixing `Xp` with `Milestone`, or recording `Empty`,
/// fails before anything is summed. Identity fields come from the first event.
#[derive(Debug, Clone, Default)]
pub struct LevelsAggregator<C> {
    codec: C,
}

impl<C: PayloadCodec> LevelsAggregator<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    /// Validate and fold already-decoded events.
    pub fn fold(events: &[Level]) -> Result<Level, AggregateError> {
        let modes: HashSet<LevelType> = events.iter().map(|l| l.level_type).collect();
        let mixed = modes.contains(&LevelType::Xp) && modes.contains(&LevelType::Milestone);
        if mixed || modes.contains(&LevelType::Empty) {
            return Err(AggregateError::InconsistentLevelType);
        }

        let first = events.first().ok_or(AggregateError::EmptyInput)?;
        let mut total = Level {
            id: first.id.clone(),
            character_name: first.character_name.clone(),
            level_type: first.level_type,
            experience: None,
            levels: None,
        };

        match first.level_type {
            LevelType::Xp => {
                let experience = events.iter().filter_map(|l| l.experience);
                total.experience = Some(sum(experience, "experience")?);
            }
            LevelType::Milestone => {
                total.levels = Some(sum(events.iter().filter_map(|l| l.levels), "levels")?);
            }
            LevelType::Empty => return Err(AggregateError::InconsistentLevelType),
        }

        Ok(total)
    }
}

fn sum(mut values: impl Iterator<Item = i64>, field: &'static str) -> Result<i64, AggregateError> {
    values.try_fold(0, |total, v| checked_total(total, v, field))
}

impl<C: PayloadCodec> Aggregator for LevelsAggregator<C> {
    fn aggregate(&self, events: &[&[u8]]) -> Result<Vec<u8>, AggregateError> {
        let decoded = events
            .iter()
            .map(|bytes| self.codec.decode::<Level>(bytes))
            .collect::<Result<Vec<_>, _>>()?;

        let total = Self::fold(&decoded)?;
        Ok(self.codec.encode(&total)?)
    }
}
