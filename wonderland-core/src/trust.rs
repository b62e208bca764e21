//! Community and trust.
//!
//! Trust is an ordered ladder. Entities climb it by collecting vouches from
//! those already above them, or in one step from Newcomer to Resident
//! through an elder's mentorship. Nothing ever moves an entity down.

use crate::rules::{apply_effects, ActionKind, Effect};
use crate::world::{Entity, EntityId, StoreError, WorldState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Standing within the community, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Newcomer,
    Resident,
    Member,
    Elder,
    Founder,
}

impl TrustLevel {
    pub fn name(&self) -> &'static str {
        match self {
            TrustLevel::Newcomer => "newcomer",
            TrustLevel::Resident => "resident",
            TrustLevel::Member => "member",
            TrustLevel::Elder => "elder",
            TrustLevel::Founder => "founder",
        }
    }

    /// The level vouching can raise this one to. Founders are only
    /// ever configured, never vouched into being.
    pub fn next(&self) -> Option<TrustLevel> {
        match self {
            TrustLevel::Newcomer => Some(TrustLevel::Resident),
            TrustLevel::Resident => Some(TrustLevel::Member),
            TrustLevel::Member => Some(TrustLevel::Elder),
            TrustLevel::Elder | TrustLevel::Founder => None,
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Community rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Lowest level whose vouch counts at all.
    pub min_voucher: TrustLevel,

    /// Distinct vouches needed to rise one level.
    pub vouches_required: usize,

    /// Lowest level allowed to mentor.
    pub mentor_level: TrustLevel,

    /// Minimum level per action kind. Kinds not listed are open to all.
    pub gates: BTreeMap<ActionKind, TrustLevel>,
}

impl TrustConfig {
    pub fn required_for(&self, kind: ActionKind) -> TrustLevel {
        self.gates
            .get(&kind)
            .copied()
            .unwrap_or(TrustLevel::Newcomer)
    }

    pub fn with_gate(mut self, kind: ActionKind, level: TrustLevel) -> Self {
        self.gates.insert(kind, level);
        self
    }

    pub fn with_vouches_required(mut self, count: usize) -> Self {
        self.vouches_required = count.max(1);
        self
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        let mut gates = BTreeMap::new();
        gates.insert(ActionKind::Build, TrustLevel::Resident);
        gates.insert(ActionKind::Teleport, TrustLevel::Elder);
        Self {
            min_voucher: TrustLevel::Member,
            vouches_required: 2,
            mentor_level: TrustLevel::Elder,
            gates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustError {
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("requires {required}, actor is {actual}")]
    InsufficientTrust {
        required: TrustLevel,
        actual: TrustLevel,
    },

    #[error("cannot vouch for oneself")]
    SelfVouch,

    #[error("already vouched for {0}")]
    AlreadyVouched(EntityId),

    #[error("{0} cannot be raised further by vouching")]
    Ceiling(EntityId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TrustError {
    pub fn narrative(&self) -> String {
        match self {
            TrustError::UnknownEntity(id) => format!("Nobody here answers to '{}'.", id),
            TrustError::InsufficientTrust { required, actual } => format!(
                "The world does not yet hear you on this. It asks a {} to speak; you are a {}.",
                required, actual
            ),
            TrustError::SelfVouch => {
                "You cannot speak for yourself here; others must.".to_string()
            }
            TrustError::AlreadyVouched(id) => {
                format!("You have already spoken for {}.", id)
            }
            TrustError::Ceiling(id) => {
                format!("{} stands as high as vouching can raise anyone.", id)
            }
            TrustError::Store(err) => err.narrative(),
        }
    }
}

/// A recorded mentorship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mentorship {
    pub mentor: EntityId,
    pub mentee: EntityId,
}

/// Pending vouches and mentorship history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    /// Vouchers collected toward each entity's next level.
    vouches: BTreeMap<EntityId, BTreeSet<EntityId>>,
    mentorships: Vec<Mentorship>,
}

impl Community {
    pub fn vouches_for(&self, id: &EntityId) -> usize {
        self.vouches.get(id).map(|v| v.len()).unwrap_or(0)
    }

    pub fn mentorships(&self) -> &[Mentorship] {
        &self.mentorships
    }

    /// Plan the effects of `voucher` vouching for `vouchee`. Pure.
    pub fn plan_vouch(
        &self,
        voucher: &Entity,
        vouchee: &Entity,
        config: &TrustConfig,
    ) -> Result<Vec<Effect>, TrustError> {
        if voucher.id == vouchee.id {
            return Err(TrustError::SelfVouch);
        }
        let toward = vouchee
            .trust
            .next()
            .ok_or_else(|| TrustError::Ceiling(vouchee.id.clone()))?;
        let required = config.min_voucher.max(toward);
        if voucher.trust < required {
            return Err(TrustError::InsufficientTrust {
                required,
                actual: voucher.trust,
            });
        }
        let existing = self.vouches.get(&vouchee.id);
        if existing.is_some_and(|set| set.contains(&voucher.id)) {
            return Err(TrustError::AlreadyVouched(vouchee.id.clone()));
        }

        let mut effects = vec![Effect::VouchRecorded {
            voucher: voucher.id.clone(),
            vouchee: vouchee.id.clone(),
            toward,
        }];
        let count = existing.map(|set| set.len()).unwrap_or(0) + 1;
        if count >= config.vouches_required {
            effects.push(Effect::TrustRaised {
                entity: vouchee.id.clone(),
                from: vouchee.trust,
                to: toward,
            });
        }
        Ok(effects)
    }

    /// Plan a mentorship. A Newcomer mentee becomes a Resident at once;
    /// anyone else receives an ordinary vouch when one is possible.
    pub fn plan_mentor(
        &self,
        mentor: &Entity,
        mentee: &Entity,
        config: &TrustConfig,
    ) -> Result<Vec<Effect>, TrustError> {
        if mentor.id == mentee.id {
            return Err(TrustError::SelfVouch);
        }
        if mentor.trust < config.mentor_level {
            return Err(TrustError::InsufficientTrust {
                required: config.mentor_level,
                actual: mentor.trust,
            });
        }

        let mut effects = vec![Effect::MentorshipRecorded {
            mentor: mentor.id.clone(),
            mentee: mentee.id.clone(),
        }];
        if mentee.trust == TrustLevel::Newcomer {
            effects.push(Effect::TrustRaised {
                entity: mentee.id.clone(),
                from: TrustLevel::Newcomer,
                to: TrustLevel::Resident,
            });
        } else if let Ok(vouch) = self.plan_vouch(mentor, mentee, config) {
            effects.extend(vouch);
        }
        Ok(effects)
    }

    pub(crate) fn record_vouch(&mut self, voucher: &EntityId, vouchee: &EntityId) {
        self.vouches
            .entry(vouchee.clone())
            .or_default()
            .insert(voucher.clone());
    }

    pub(crate) fn clear_vouches(&mut self, id: &EntityId) {
        self.vouches.remove(id);
    }

    pub(crate) fn record_mentorship(&mut self, mentor: &EntityId, mentee: &EntityId) {
        self.mentorships.push(Mentorship {
            mentor: mentor.clone(),
            mentee: mentee.clone(),
        });
    }
}

/// Record a vouch directly against a world. Returns the new level when the
/// vouch completed a promotion.
pub fn vouch(
    world: &mut WorldState,
    voucher: &EntityId,
    vouchee: &EntityId,
    config: &TrustConfig,
) -> Result<Option<TrustLevel>, TrustError> {
    let effects = world
        .community
        .plan_vouch(world.require(voucher)?, world.require(vouchee)?, config)?;
    apply_effects(world, &effects)?;
    Ok(effects.iter().find_map(|e| match e {
        Effect::TrustRaised { to, .. } => Some(*to),
        _ => None,
    }))
}

/// An entity's current level.
pub fn current_level(world: &WorldState, id: &EntityId) -> Result<TrustLevel, TrustError> {
    world
        .current_level(id)
        .ok_or_else(|| TrustError::UnknownEntity(id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ClockConfig};
    use crate::topology::wonderland;
    use crate::world::{EntityKind, RoomId};

    fn world(members: &[(&str, TrustLevel)]) -> WorldState {
        let topology = wonderland();
        let mut world = WorldState::new(&topology, Clock::new(&ClockConfig::default()));
        for (id, level) in members {
            let entity = Entity::new(
                EntityId::new(*id),
                *id,
                EntityKind::Daemon,
                RoomId::new("garden"),
                5,
            )
            .with_trust(*level);
            world.add_entity(entity).unwrap();
        }
        world
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(TrustLevel::Newcomer < TrustLevel::Resident);
        assert!(TrustLevel::Elder < TrustLevel::Founder);
        assert_eq!(TrustLevel::Elder.next(), None);
    }

    #[test]
    fn test_newcomer_vouch_rejected() {
        let mut w = world(&[("dodo", TrustLevel::Newcomer), ("alice", TrustLevel::Newcomer)]);
        let err = vouch(
            &mut w,
            &EntityId::new("dodo"),
            &EntityId::new("alice"),
            &TrustConfig::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            TrustError::InsufficientTrust {
                required: TrustLevel::Member,
                actual: TrustLevel::Newcomer
            }
        );
        assert_eq!(
            current_level(&w, &EntityId::new("alice")).unwrap(),
            TrustLevel::Newcomer
        );
    }

    #[test]
    fn test_two_vouches_promote() {
        let mut w = world(&[
            ("hatter", TrustLevel::Member),
            ("hare", TrustLevel::Elder),
            ("alice", TrustLevel::Newcomer),
        ]);
        let config = TrustConfig::default();
        let alice = EntityId::new("alice");

        assert_eq!(vouch(&mut w, &EntityId::new("hatter"), &alice, &config).unwrap(), None);
        assert_eq!(w.community.vouches_for(&alice), 1);
        assert_eq!(
            vouch(&mut w, &EntityId::new("hare"), &alice, &config).unwrap(),
            Some(TrustLevel::Resident)
        );
        assert_eq!(current_level(&w, &alice).unwrap(), TrustLevel::Resident);
        assert_eq!(w.community.vouches_for(&alice), 0);
    }

    #[test]
    fn test_duplicate_and_self_vouch() {
        let mut w = world(&[("hatter", TrustLevel::Member), ("alice", TrustLevel::Newcomer)]);
        let config = TrustConfig::default();
        let hatter = EntityId::new("hatter");
        let alice = EntityId::new("alice");
        vouch(&mut w, &hatter, &alice, &config).unwrap();
        assert_eq!(
            vouch(&mut w, &hatter, &alice, &config).unwrap_err(),
            TrustError::AlreadyVouched(alice.clone())
        );
        assert_eq!(
            vouch(&mut w, &hatter, &hatter, &config).unwrap_err(),
            TrustError::SelfVouch
        );
    }

    #[test]
    fn test_voucher_must_outrank_target_level() {
        let mut w = world(&[("hatter", TrustLevel::Member), ("hare", TrustLevel::Member)]);
        let err = vouch(
            &mut w,
            &EntityId::new("hatter"),
            &EntityId::new("hare"),
            &TrustConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TrustError::InsufficientTrust {
                required: TrustLevel::Elder,
                ..
            }
        ));
    }

    #[test]
    fn test_mentor_raises_newcomer_immediately() {
        let w = world(&[("caterpillar", TrustLevel::Elder), ("alice", TrustLevel::Newcomer)]);
        let effects = w
            .community
            .plan_mentor(
                w.entity(&EntityId::new("caterpillar")).unwrap(),
                w.entity(&EntityId::new("alice")).unwrap(),
                &TrustConfig::default(),
            )
            .unwrap();
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::TrustRaised {
                to: TrustLevel::Resident,
                ..
            }
        )));
    }

    #[test]
    fn test_mentor_requires_elder() {
        let w = world(&[("hatter", TrustLevel::Member), ("alice", TrustLevel::Newcomer)]);
        let err = w
            .community
            .plan_mentor(
                w.entity(&EntityId::new("hatter")).unwrap(),
                w.entity(&EntityId::new("alice")).unwrap(),
                &TrustConfig::default(),
            )
            .unwrap_err();
        assert!(matches!(err, TrustError::InsufficientTrust { .. }));
    }

    #[test]
    fn test_elder_cannot_be_vouched_to_founder() {
        let mut w = world(&[("queen", TrustLevel::Founder), ("duchess", TrustLevel::Elder)]);
        let err = vouch(
            &mut w,
            &EntityId::new("queen"),
            &EntityId::new("duchess"),
            &TrustConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, TrustError::Ceiling(EntityId::new("duchess")));
    }
}
