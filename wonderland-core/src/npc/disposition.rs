//! What each NPC remembers about each visitor.

use crate::clock::VirtualTime;
use crate::world::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// How an NPC currently feels about a visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Disposition {
    Hostile,
    Unfriendly,
    Neutral,
    Friendly,
    Helpful,
}

impl Disposition {
    /// Bucket a score relative to its bound.
    pub fn from_score(score: i32, bound: i32) -> Self {
        let bound = bound.max(1);
        match score.clamp(-bound, bound).saturating_mul(10) / bound {
            r if r <= -6 => Disposition::Hostile,
            r if r <= -2 => Disposition::Unfriendly,
            r if r < 2 => Disposition::Neutral,
            r if r < 6 => Disposition::Friendly,
            _ => Disposition::Helpful,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Disposition::Hostile => "want nothing to do with them",
            Disposition::Unfriendly => "are wary of them",
            Disposition::Neutral => "have no strong feelings about them yet",
            Disposition::Friendly => "are glad to see them",
            Disposition::Helpful => "are delighted by them and eager to help",
        }
    }
}

/// One remembered exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    pub at: VirtualTime,
    pub note: String,
    pub delta: i32,
}

/// Limits applied to every ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionLimits {
    pub memory_cap: usize,
    pub score_bound: i32,
}

impl Default for DispositionLimits {
    fn default() -> Self {
        Self {
            memory_cap: 12,
            score_bound: 10,
        }
    }
}

/// One NPC's view of one visitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionLedger {
    pub score: i32,
    /// Most recent first.
    memories: VecDeque<Memory>,
}

impl DispositionLedger {
    pub fn memories(&self) -> impl Iterator<Item = &Memory> {
        self.memories.iter()
    }

    pub fn recent(&self, n: usize) -> impl Iterator<Item = &Memory> {
        self.memories.iter().take(n)
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    fn record(&mut self, memory: Memory, limits: DispositionLimits) {
        let bound = limits.score_bound.saturating_abs();
        self.score = self.score.saturating_add(memory.delta).clamp(-bound, bound);
        self.memories.push_front(memory);
        self.memories.truncate(limits.memory_cap);
    }
}

/// Every ledger in the world, keyed by NPC then visitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispositions {
    #[serde(default)]
    limits: DispositionLimits,
    ledgers: BTreeMap<EntityId, BTreeMap<EntityId, DispositionLedger>>,
}

impl Dispositions {
    pub fn with_limits(limits: DispositionLimits) -> Self {
        Self {
            limits,
            ledgers: BTreeMap::new(),
        }
    }

    pub fn limits(&self) -> DispositionLimits {
        self.limits
    }

    /// Change limits going forward. Existing memories are trimmed to fit.
    pub fn set_limits(&mut self, limits: DispositionLimits) {
        self.limits = limits;
        for ledger in self.ledgers.values_mut().flat_map(|v| v.values_mut()) {
            ledger.memories.truncate(limits.memory_cap);
            let bound = limits.score_bound.saturating_abs();
            ledger.score = ledger.score.clamp(-bound, bound);
        }
    }

    pub fn ledger(&self, npc: &EntityId, visitor: &EntityId) -> Option<&DispositionLedger> {
        self.ledgers.get(npc).and_then(|v| v.get(visitor))
    }

    pub fn disposition(&self, npc: &EntityId, visitor: &EntityId) -> Disposition {
        let score = self.ledger(npc, visitor).map_or(0, |l| l.score);
        Disposition::from_score(score, self.limits.score_bound)
    }

    pub fn record(
        &mut self,
        npc: &EntityId,
        visitor: &EntityId,
        delta: i32,
        note: &str,
        at: VirtualTime,
    ) {
        let limits = self.limits;
        self.ledgers
            .entry(npc.clone())
            .or_default()
            .entry(visitor.clone())
            .or_default()
            .record(
                Memory {
                    at,
                    note: note.to_string(),
                    delta,
                },
                limits,
            );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (EntityId, EntityId) {
        (EntityId::new("mad-hatter"), EntityId::new("alice"))
    }

    #[test]
    fn test_memory_is_bounded_and_newest_first() {
        let (npc, visitor) = ids();
        let mut dispositions = Dispositions::with_limits(DispositionLimits {
            memory_cap: 3,
            score_bound: 10,
        });
        for i in 0..5 {
            dispositions.record(&npc, &visitor, 1, &format!("exchange {}", i), VirtualTime(i));
        }
        let ledger = dispositions.ledger(&npc, &visitor).unwrap();
        assert_eq!(ledger.len(), 3);
        let notes: Vec<&str> = ledger.memories().map(|m| m.note.as_str()).collect();
        assert_eq!(notes, vec!["exchange 4", "exchange 3", "exchange 2"]);
        assert_eq!(ledger.recent(1).next().unwrap().at, VirtualTime(4));
    }

    #[test]
    fn test_score_is_bounded() {
        let (npc, visitor) = ids();
        let mut dispositions = Dispositions::default();
        for _ in 0..20 {
            dispositions.record(&npc, &visitor, 3, "tea", VirtualTime(0));
        }
        assert_eq!(dispositions.ledger(&npc, &visitor).unwrap().score, 10);
        assert_eq!(dispositions.disposition(&npc, &visitor), Disposition::Helpful);

        for _ in 0..20 {
            dispositions.record(&npc, &visitor, -3, "rudeness", VirtualTime(0));
        }
        assert_eq!(dispositions.ledger(&npc, &visitor).unwrap().score, -10);
        assert_eq!(dispositions.disposition(&npc, &visitor), Disposition::Hostile);
    }

    #[test]
    fn test_unknown_visitor_is_neutral() {
        let (npc, visitor) = ids();
        let dispositions = Dispositions::default();
        assert!(dispositions.ledger(&npc, &visitor).is_none());
        assert_eq!(dispositions.disposition(&npc, &visitor), Disposition::Neutral);
    }

    #[test]
    fn test_buckets_are_ordered() {
        let buckets: Vec<Disposition> = (-10..=10)
            .map(|s| Disposition::from_score(s, 10))
            .collect();
        assert!(buckets.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(Disposition::from_score(0, 10), Disposition::Neutral);
        assert_eq!(Disposition::from_score(4, 10), Disposition::Friendly);
        assert_eq!(Disposition::from_score(-4, 10), Disposition::Unfriendly);
    }

    #[test]
    fn test_tightening_limits_trims() {
        let (npc, visitor) = ids();
        let mut dispositions = Dispositions::default();
        for i in 0..6 {
            dispositions.record(&npc, &visitor, 2, "chat", VirtualTime(i));
        }
        dispositions.set_limits(DispositionLimits {
            memory_cap: 2,
            score_bound: 5,
        });
        let ledger = dispositions.ledger(&npc, &visitor).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.score, 5);
    }
}
