//! Temporal clock.
//!
//! Virtual time only moves when a validated action executes. Each action
//! kind carries a fixed weight; the day phase is a pure function of the
//! accumulated time modulo the cycle length. Nothing here reads the wall
//! clock, so a world replayed from its witness log lands on the same time.

use crate::rules::ActionKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ticks per unit of virtual time. Weights are configured in units
/// (movement: 0.02) and stored as integer ticks so arithmetic is exact.
pub const TICKS_PER_UNIT: u64 = 10_000;

/// A point in virtual time, in ticks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VirtualTime(pub u64);

impl VirtualTime {
    pub fn from_units(units: f64) -> Self {
        Self(units_to_ticks(units))
    }

    pub fn ticks(&self) -> u64 {
        self.0
    }

    pub fn units(&self) -> f64 {
        self.0 as f64 / TICKS_PER_UNIT as f64
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.units())
    }
}

fn units_to_ticks(units: f64) -> u64 {
    if units.is_finite() && units > 0.0 {
        (units * TICKS_PER_UNIT as f64).round() as u64
    } else {
        0
    }
}

/// The four narrative phases of a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayPhase {
    Dawn,
    Day,
    Dusk,
    Night,
}

impl DayPhase {
    pub fn name(&self) -> &'static str {
        match self {
            DayPhase::Dawn => "dawn",
            DayPhase::Day => "day",
            DayPhase::Dusk => "dusk",
            DayPhase::Night => "night",
        }
    }

    pub fn all() -> [DayPhase; 4] {
        [DayPhase::Dawn, DayPhase::Day, DayPhase::Dusk, DayPhase::Night]
    }
}

impl fmt::Display for DayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Clock configuration, in units of virtual time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Length of one full dawn-day-dusk-night cycle.
    pub cycle_length: f64,

    /// Time the world starts at when built fresh.
    pub start: f64,

    /// Weight per action kind. Kinds missing here fall back to the defaults.
    pub weights: BTreeMap<ActionKind, f64>,
}

impl ClockConfig {
    pub fn default_weight(kind: ActionKind) -> f64 {
        match kind {
            ActionKind::Arrive | ActionKind::Depart => 0.0,
            ActionKind::Move => 0.02,
            ActionKind::Say | ActionKind::Emote | ActionKind::Greet => 0.01,
            ActionKind::Ask => 0.02,
            ActionKind::Reflect => 0.08,
            ActionKind::Teleport => 0.10,
            ActionKind::Build => 0.05,
            ActionKind::Take | ActionKind::Place | ActionKind::Release => 0.01,
            ActionKind::Vouch | ActionKind::Mentor => 0.03,
        }
    }

    pub fn weight(&self, kind: ActionKind) -> f64 {
        self.weights
            .get(&kind)
            .copied()
            .unwrap_or_else(|| Self::default_weight(kind))
    }

    pub fn with_weight(mut self, kind: ActionKind, weight: f64) -> Self {
        self.weights.insert(kind, weight);
        self
    }

    pub fn with_start(mut self, start: f64) -> Self {
        self.start = start;
        self
    }

    pub fn with_cycle_length(mut self, cycle_length: f64) -> Self {
        self.cycle_length = cycle_length;
        self
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            cycle_length: 1.0,
            start: 0.30,
            weights: BTreeMap::new(),
        }
    }
}

/// The world's clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    now: VirtualTime,
    cycle_ticks: u64,
    weights: BTreeMap<ActionKind, u64>,
}

impl Clock {
    pub fn new(config: &ClockConfig) -> Self {
        let mut clock = Self {
            now: VirtualTime::from_units(config.start),
            cycle_ticks: 1,
            weights: BTreeMap::new(),
        };
        clock.reconfigure(config);
        clock
    }

    /// Re-derive weights and cycle length from config, keeping the current time.
    pub fn reconfigure(&mut self, config: &ClockConfig) {
        self.cycle_ticks = units_to_ticks(config.cycle_length).max(4);
        self.weights = ActionKind::all()
            .into_iter()
            .map(|kind| (kind, units_to_ticks(config.weight(kind))))
            .collect();
    }

    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Weight of one action of this kind, in ticks.
    pub fn cost(&self, kind: ActionKind) -> u64 {
        self.weights.get(&kind).copied().unwrap_or(0)
    }

    /// The time an action of this kind would land on, without moving.
    pub fn preview(&self, kind: ActionKind) -> VirtualTime {
        VirtualTime(self.now.0.saturating_add(self.cost(kind)))
    }

    /// Advance by the weight of an executed action and return the new time.
    pub fn advance(&mut self, kind: ActionKind) -> VirtualTime {
        self.now = self.preview(kind);
        self.now
    }

    /// Move forward to `to`. Earlier times are ignored; the clock never runs back.
    pub fn advance_to(&mut self, to: VirtualTime) -> VirtualTime {
        if to > self.now {
            self.now = to;
        }
        self.now
    }

    pub fn current_phase(&self) -> DayPhase {
        self.phase_at(self.now)
    }

    pub fn phase_at(&self, at: VirtualTime) -> DayPhase {
        let position = at.0 % self.cycle_ticks;
        match position * 4 / self.cycle_ticks {
            0 => DayPhase::Dawn,
            1 => DayPhase::Day,
            2 => DayPhase::Dusk,
            _ => DayPhase::Night,
        }
    }

    /// One-based count of the day the clock is in.
    pub fn day(&self) -> u64 {
        self.now.0 / self.cycle_ticks + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_are_exact() {
        let mut clock = Clock::new(&ClockConfig::default().with_start(0.0));
        assert_eq!(clock.advance(ActionKind::Move), VirtualTime(200));
        assert_eq!(clock.advance(ActionKind::Reflect), VirtualTime(1000));
        assert_eq!(clock.advance(ActionKind::Teleport), VirtualTime(2000));
    }

    #[test]
    fn test_phase_cycle() {
        let mut clock = Clock::new(&ClockConfig::default().with_start(0.0));
        assert_eq!(clock.current_phase(), DayPhase::Dawn);
        clock.advance_to(VirtualTime::from_units(0.30));
        assert_eq!(clock.current_phase(), DayPhase::Day);
        clock.advance_to(VirtualTime::from_units(0.55));
        assert_eq!(clock.current_phase(), DayPhase::Dusk);
        clock.advance_to(VirtualTime::from_units(0.80));
        assert_eq!(clock.current_phase(), DayPhase::Night);
        clock.advance_to(VirtualTime::from_units(1.05));
        assert_eq!(clock.current_phase(), DayPhase::Dawn);
        assert_eq!(clock.day(), 2);
    }

    #[test]
    fn test_never_runs_backwards() {
        let mut clock = Clock::new(&ClockConfig::default());
        let before = clock.now();
        clock.advance_to(VirtualTime(0));
        assert_eq!(clock.now(), before);
    }

    #[test]
    fn test_configured_weight_overrides_default() {
        let config = ClockConfig::default()
            .with_start(0.0)
            .with_weight(ActionKind::Move, 0.5);
        let mut clock = Clock::new(&config);
        assert_eq!(clock.advance(ActionKind::Move), VirtualTime::from_units(0.5));
        // Untouched kinds keep their defaults.
        assert_eq!(clock.cost(ActionKind::Reflect), 800);
    }

    #[test]
    fn test_preview_does_not_move() {
        let clock = Clock::new(&ClockConfig::default());
        let now = clock.now();
        let _ = clock.preview(ActionKind::Teleport);
        assert_eq!(clock.now(), now);
    }
}
