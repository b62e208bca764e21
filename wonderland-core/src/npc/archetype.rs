//! Archetypes: compact pointer-sets that tell a language model who an NPC is.
//!
//! A pointer-set is deliberately tiny. Four short fields name a character
//! the model already knows and nudge it into this world's register; the
//! model supplies the rest.

use crate::clock::DayPhase;
use crate::world::{EntityId, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Default token budget for one pointer-set.
pub const DEFAULT_POINTER_BUDGET: usize = 120;

#[derive(Debug, Error)]
pub enum ArchetypeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("pointer-set for {id} is {tokens} tokens, budget is {budget}")]
    OverBudget {
        id: EntityId,
        tokens: usize,
        budget: usize,
    },

    #[error("archetype {0} has no fallback line")]
    MissingFallback(EntityId),

    #[error("duplicate archetype: {0}")]
    Duplicate(EntityId),
}

/// The four anchors of a character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerSet {
    /// Who the character is, by reference.
    pub essence: String,
    /// How they talk.
    pub voice: String,
    /// How they regard visitors.
    pub stance: String,
    /// Hard limits on what they say.
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl PointerSet {
    /// Rough token count: about four tokens per three words.
    pub fn token_estimate(&self) -> usize {
        let words: usize = [&self.essence, &self.voice, &self.stance]
            .into_iter()
            .chain(self.constraints.iter())
            .map(|field| field.split_whitespace().count())
            .sum();
        (words * 4).div_ceil(3)
    }

    pub fn within_budget(&self, budget: usize) -> bool {
        self.token_estimate() <= budget
    }

    /// Render as the opening of a system prompt.
    pub fn render(&self) -> String {
        let mut out = format!(
            "You are {}.\nVoice: {}\nStance: {}",
            self.essence, self.voice, self.stance
        );
        for constraint in &self.constraints {
            out.push_str("\nNever: ");
            out.push_str(constraint);
        }
        out
    }
}

/// Everything needed to bring one NPC to life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archetype {
    pub id: EntityId,
    pub name: String,
    pub home: RoomId,
    /// Phases the NPC can be found in. Empty means always.
    #[serde(default)]
    pub available: Vec<DayPhase>,
    pub pointers: PointerSet,
    /// Said when generation fails or times out.
    pub fallback_line: String,
}

impl Archetype {
    pub fn available_at(&self, phase: DayPhase) -> bool {
        self.available.is_empty() || self.available.contains(&phase)
    }

    fn validate(&self, budget: usize) -> Result<(), ArchetypeError> {
        let tokens = self.pointers.token_estimate();
        if tokens > budget {
            return Err(ArchetypeError::OverBudget {
                id: self.id.clone(),
                tokens,
                budget,
            });
        }
        if self.fallback_line.trim().is_empty() {
            return Err(ArchetypeError::MissingFallback(self.id.clone()));
        }
        Ok(())
    }
}

/// All known archetypes, keyed by NPC id.
#[derive(Debug, Clone, Default)]
pub struct ArchetypeRegistry {
    archetypes: BTreeMap<EntityId, Archetype>,
}

impl ArchetypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, rejecting pointer-sets over `budget`.
    pub fn from_archetypes(
        archetypes: Vec<Archetype>,
        budget: usize,
    ) -> Result<Self, ArchetypeError> {
        let mut registry = Self::new();
        for archetype in archetypes {
            registry.insert(archetype, budget)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, archetype: Archetype, budget: usize) -> Result<(), ArchetypeError> {
        archetype.validate(budget)?;
        if self.archetypes.contains_key(&archetype.id) {
            return Err(ArchetypeError::Duplicate(archetype.id));
        }
        self.archetypes.insert(archetype.id.clone(), archetype);
        Ok(())
    }

    pub fn from_json(json: &str, budget: usize) -> Result<Self, ArchetypeError> {
        Self::from_archetypes(serde_json::from_str(json)?, budget)
    }

    pub async fn load_json(path: impl AsRef<Path>, budget: usize) -> Result<Self, ArchetypeError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json, budget)
    }

    pub fn get(&self, id: &EntityId) -> Option<&Archetype> {
        self.archetypes.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.values()
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }
}

fn archetype(
    id: &str,
    name: &str,
    home: &str,
    available: &[DayPhase],
    pointers: [&str; 3],
    constraints: &[&str],
    fallback_line: &str,
) -> Archetype {
    Archetype {
        id: EntityId::new(id),
        name: name.to_string(),
        home: RoomId::new(home),
        available: available.to_vec(),
        pointers: PointerSet {
            essence: pointers[0].to_string(),
            voice: pointers[1].to_string(),
            stance: pointers[2].to_string(),
            constraints: constraints.iter().map(|c| c.to_string()).collect(),
        },
        fallback_line: fallback_line.to_string(),
    }
}

/// The hosts of the built-in Wonderland.
pub fn wonderland_archetypes() -> ArchetypeRegistry {
    use DayPhase::*;

    let archetypes = vec![
        archetype(
            "cheshire-cat",
            "the Cheshire Cat",
            "garden",
            &[Dusk, Night, Dawn],
            [
                "the Cheshire Cat from Carroll's Alice books",
                "languid riddles, grinning asides, answers that turn into questions",
                "amused and fond of visitors, never in a hurry to help directly",
            ],
            &["give orders", "speak more than three sentences"],
            "The grin lingers a moment longer than the cat does.",
        ),
        archetype(
            "caterpillar",
            "the Caterpillar",
            "mushroom-wood",
            &[Day, Dusk],
            [
                "the hookah-smoking Caterpillar from Alice in Wonderland",
                "slow, terse, each word weighed; fond of asking who you are",
                "patient teacher who wants visitors to find their own answers",
            ],
            &["hurry", "hand out answers outright"],
            "\"Who... are... you?\" A smoke ring drifts toward you and dissolves.",
        ),
        archetype(
            "mad-hatter",
            "the Mad Hatter",
            "tea-party",
            &[],
            [
                "the Mad Hatter from Alice in Wonderland, at the eternal tea party",
                "quick, punning, jumping topics mid-sentence, riddles without answers",
                "delighted by company, offers tea and a seat to anyone",
            ],
            &["be cruel", "end the tea party"],
            "\"No room! No room!\" he cries, pulling out a chair for you anyway.",
        ),
        archetype(
            "white-rabbit",
            "the White Rabbit",
            "hall-of-doors",
            &[Dawn, Day],
            [
                "the White Rabbit from Alice in Wonderland, pocket watch in paw",
                "flustered, breathless, polite apologies tumbling over each other",
                "kind but perpetually late; points visitors the right way",
            ],
            &["stay still for long"],
            "\"Oh my ears and whiskers, how late it's getting!\" He scurries past.",
        ),
    ];

    let mut registry = ArchetypeRegistry::new();
    for archetype in archetypes {
        registry.archetypes.insert(archetype.id.clone(), archetype);
    }
    registry
}
