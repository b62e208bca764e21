//! World configuration.

use crate::clock::ClockConfig;
use crate::npc::NpcConfig;
use crate::rules::ActionKind;
use crate::trust::{TrustConfig, TrustLevel};
use crate::world::EntityId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Widest disposition range a world may configure.
pub const MAX_SCORE_BOUND: i32 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything tunable about a world. Missing fields take their defaults,
/// so a config file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub clock: ClockConfig,
    pub trust: TrustConfig,
    pub npc: NpcConfig,

    /// Items one entity may carry.
    pub inventory_cap: usize,

    /// Entities that arrive as Founders.
    pub founders: Vec<EntityId>,

    /// Write a snapshot after this many events. Zero disables periodic snapshots.
    pub snapshot_every: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            trust: TrustConfig::default(),
            npc: NpcConfig::default(),
            inventory_cap: 5,
            founders: Vec::new(),
            snapshot_every: 50,
        }
    }
}

impl WorldConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inventory_cap == 0 {
            return Err(ConfigError::Invalid("inventory_cap must be at least 1".into()));
        }
        if !(self.clock.cycle_length.is_finite() && self.clock.cycle_length > 0.0) {
            return Err(ConfigError::Invalid("clock.cycle_length must be positive".into()));
        }
        if let Some((kind, _)) = self
            .clock
            .weights
            .iter()
            .find(|(_, w)| !(w.is_finite() && **w >= 0.0))
        {
            return Err(ConfigError::Invalid(format!(
                "clock weight for {} must be zero or more",
                kind
            )));
        }
        if self.trust.vouches_required == 0 {
            return Err(ConfigError::Invalid("trust.vouches_required must be at least 1".into()));
        }
        let npc = &self.npc;
        if npc.memory_cap == 0 {
            return Err(ConfigError::Invalid("npc.memory_cap must be at least 1".into()));
        }
        if npc.recall > npc.memory_cap {
            return Err(ConfigError::Invalid(
                "npc.recall cannot exceed npc.memory_cap".into(),
            ));
        }
        if !(1..=MAX_SCORE_BOUND).contains(&npc.score_bound) {
            return Err(ConfigError::Invalid(format!(
                "npc.score_bound must be between 1 and {}",
                MAX_SCORE_BOUND
            )));
        }
        if !(1..=npc.score_bound).contains(&npc.max_delta) {
            return Err(ConfigError::Invalid(
                "npc.max_delta must be between 1 and npc.score_bound".into(),
            ));
        }
        if npc.approval < 0 || npc.displeasure < 0 {
            return Err(ConfigError::Invalid(
                "npc.approval and npc.displeasure must be zero or more".into(),
            ));
        }
        Ok(())
    }

    pub fn with_inventory_cap(mut self, cap: usize) -> Self {
        self.inventory_cap = cap;
        self
    }

    pub fn with_founder(mut self, id: impl Into<String>) -> Self {
        self.founders.push(EntityId::new(id));
        self
    }

    pub fn with_snapshot_every(mut self, events: u64) -> Self {
        self.snapshot_every = events;
        self
    }

    pub fn with_clock(mut self, clock: ClockConfig) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_trust(mut self, trust: TrustConfig) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_npc(mut self, npc: NpcConfig) -> Self {
        self.npc = npc;
        self
    }

    pub fn with_gate(mut self, kind: ActionKind, level: TrustLevel) -> Self {
        self.trust.gates.insert(kind, level);
        self
    }
}
