//! Intent resolution and effects.
//!
//! An [`Action`] is what someone tries to do. Once the vow engine has judged
//! it, [`resolve`] turns it into a list of [`Effect`]s plus the narrative the
//! actor sees, checking structure (exits, capacity, presence) along the way
//! without touching the world. [`apply_effects`] is the only path by which
//! the world changes, both live and during replay.

use crate::clock::VirtualTime;
use crate::config::WorldConfig;
use crate::npc::ArchetypeRegistry;
use crate::topology::{Direction, Topology};
use crate::trust::{TrustError, TrustLevel};
use crate::vows::{Augmentation, Verdict};
use crate::world::{
    Entity, EntityId, EntityKind, InventoryDelta, Item, RoomId, StoreError, WorldState,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest name accepted for a built item.
pub const MAX_ITEM_NAME: usize = 48;

// ============================================================================
// Actions
// ============================================================================

/// The kind of an action, used for time weights, trust gates and filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Arrive,
    Depart,
    Move,
    Say,
    Emote,
    Reflect,
    Greet,
    Ask,
    Build,
    Take,
    Place,
    Release,
    Teleport,
    Vouch,
    Mentor,
}

impl ActionKind {
    pub fn all() -> [ActionKind; 15] {
        use ActionKind::*;
        [
            Arrive, Depart, Move, Say, Emote, Reflect, Greet, Ask, Build, Take, Place, Release,
            Teleport, Vouch, Mentor,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Arrive => "arrive",
            ActionKind::Depart => "depart",
            ActionKind::Move => "move",
            ActionKind::Say => "say",
            ActionKind::Emote => "emote",
            ActionKind::Reflect => "reflect",
            ActionKind::Greet => "greet",
            ActionKind::Ask => "ask",
            ActionKind::Build => "build",
            ActionKind::Take => "take",
            ActionKind::Place => "place",
            ActionKind::Release => "release",
            ActionKind::Teleport => "teleport",
            ActionKind::Vouch => "vouch",
            ActionKind::Mentor => "mentor",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What an actor is trying to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Arrive { name: String, kind: EntityKind },
    Depart,
    Move { direction: Direction },
    Say { text: String },
    Emote { text: String },
    Reflect { thought: Option<String> },
    Greet { target: String },
    Ask { target: String, text: String },
    /// An NPC answering a visitor. Validated exactly like speech.
    Reply {
        visitor: EntityId,
        prompt: String,
        text: String,
        delta: i32,
    },
    Build { item: String },
    Take { item: String },
    Place { item: String },
    Release { item: String },
    Teleport { destination: String },
    Vouch { target: String },
    Mentor { target: String },
}

impl Intent {
    pub fn kind(&self) -> ActionKind {
        match self {
            Intent::Arrive { .. } => ActionKind::Arrive,
            Intent::Depart => ActionKind::Depart,
            Intent::Move { .. } => ActionKind::Move,
            Intent::Say { .. } | Intent::Reply { .. } => ActionKind::Say,
            Intent::Emote { .. } => ActionKind::Emote,
            Intent::Reflect { .. } => ActionKind::Reflect,
            Intent::Greet { .. } => ActionKind::Greet,
            Intent::Ask { .. } => ActionKind::Ask,
            Intent::Build { .. } => ActionKind::Build,
            Intent::Take { .. } => ActionKind::Take,
            Intent::Place { .. } => ActionKind::Place,
            Intent::Release { .. } => ActionKind::Release,
            Intent::Teleport { .. } => ActionKind::Teleport,
            Intent::Vouch { .. } => ActionKind::Vouch,
            Intent::Mentor { .. } => ActionKind::Mentor,
        }
    }

    /// Free text the vow engine should read, if any.
    pub fn expression(&self) -> Option<&str> {
        match self {
            Intent::Arrive { name, .. } => Some(name),
            Intent::Say { text }
            | Intent::Emote { text }
            | Intent::Ask { text, .. }
            | Intent::Reply { text, .. } => Some(text),
            Intent::Reflect { thought } => thought.as_deref(),
            Intent::Build { item } => Some(item),
            _ => None,
        }
    }

    /// Short human-readable payload for the witness log.
    pub fn payload(&self) -> String {
        match self {
            Intent::Arrive { name, kind } => format!("{} ({})", name, kind.name()),
            Intent::Depart => String::new(),
            Intent::Move { direction } => direction.to_string(),
            Intent::Say { text } | Intent::Emote { text } => text.clone(),
            Intent::Reflect { thought } => thought.clone().unwrap_or_default(),
            Intent::Greet { target } => target.clone(),
            Intent::Ask { target, text } => format!("{}: {}", target, text),
            Intent::Reply { visitor, text, .. } => format!("to {}: {}", visitor, text),
            Intent::Build { item }
            | Intent::Take { item }
            | Intent::Place { item }
            | Intent::Release { item } => item.clone(),
            Intent::Teleport { destination } => destination.clone(),
            Intent::Vouch { target } | Intent::Mentor { target } => target.clone(),
        }
    }
}

/// An intent bound to the entity attempting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub actor: EntityId,
    pub intent: Intent,
}

impl Action {
    pub fn new(actor: EntityId, intent: Intent) -> Self {
        Self { actor, intent }
    }

    pub fn kind(&self) -> ActionKind {
        self.intent.kind()
    }
}

// ============================================================================
// Effects
// ============================================================================

/// A single change to the world. Effects are what the witness log records
/// and what replay applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    EntityArrived {
        entity: Entity,
    },
    EntityDeparted {
        entity: EntityId,
        room: RoomId,
    },
    EntityMoved {
        entity: EntityId,
        from: RoomId,
        to: RoomId,
    },
    ItemGained {
        entity: EntityId,
        item: Item,
    },
    ItemReleased {
        entity: EntityId,
        item: String,
    },
    DecorationPlaced {
        room: RoomId,
        item: Item,
    },
    DecorationTaken {
        room: RoomId,
        item: String,
    },
    InsightGranted {
        entity: EntityId,
        amount: u32,
    },
    VouchRecorded {
        voucher: EntityId,
        vouchee: EntityId,
        toward: TrustLevel,
    },
    MentorshipRecorded {
        mentor: EntityId,
        mentee: EntityId,
    },
    TrustRaised {
        entity: EntityId,
        from: TrustLevel,
        to: TrustLevel,
    },
    DispositionShifted {
        npc: EntityId,
        visitor: EntityId,
        delta: i32,
        note: String,
        at: VirtualTime,
    },
    TimeAdvanced {
        to: VirtualTime,
    },
}

/// Why an allowed action could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error(transparent)]
    Structural(#[from] StoreError),

    #[error(transparent)]
    Trust(#[from] TrustError),
}

impl Rejection {
    /// Trust and capacity denials, as opposed to plain structural failures.
    pub fn is_denial(&self) -> bool {
        match self {
            Rejection::Structural(err) => err.is_capacity(),
            Rejection::Trust(TrustError::Store(err)) => err.is_capacity(),
            Rejection::Trust(_) => true,
        }
    }

    pub fn narrative(&self) -> String {
        match self {
            Rejection::Structural(err) => err.narrative(),
            Rejection::Trust(err) => err.narrative(),
        }
    }
}

/// The outcome of resolving an allowed action.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub effects: Vec<Effect>,
    pub narrative: String,
    pub enhanced_insight: bool,
}

/// Read-only context an action is resolved against.
pub struct ResolveContext<'a> {
    pub topology: &'a Topology,
    pub archetypes: &'a ArchetypeRegistry,
    pub config: &'a WorldConfig,
}

// ============================================================================
// Resolution
// ============================================================================

/// Turn an allowed action into effects. Never mutates the world.
pub fn resolve(
    world: &WorldState,
    ctx: &ResolveContext<'_>,
    action: &Action,
    verdict: &Verdict,
) -> Result<Resolution, Rejection> {
    let kind = action.kind();
    let landing = world.clock.preview(kind);
    let phase = world.clock.phase_at(landing);
    let mut enhanced_insight = false;

    let (mut effects, narrative) = match &action.intent {
        Intent::Arrive { name, kind } => {
            let name = name.trim();
            if name.is_empty() {
                return Err(StoreError::Invalid("a name is needed to arrive".into()).into());
            }
            if world.entity(&action.actor).is_some() {
                return Err(StoreError::AlreadyPresent(action.actor.clone()).into());
            }
            let room = match ctx.archetypes.get(&action.actor) {
                Some(archetype) if *kind == EntityKind::Npc => archetype.home.clone(),
                _ => ctx.topology.spawn().clone(),
            };
            let mut entity = Entity::new(
                action.actor.clone(),
                name,
                *kind,
                room.clone(),
                ctx.config.inventory_cap,
            );
            if ctx.config.founders.contains(&action.actor) {
                entity.trust = TrustLevel::Founder;
            }
            let narrative = ctx.topology.describe(&room, phase)?;
            (vec![Effect::EntityArrived { entity }], narrative)
        }

        Intent::Depart => {
            let actor = world.require(&action.actor)?;
            (
                vec![Effect::EntityDeparted {
                    entity: actor.id.clone(),
                    room: actor.room.clone(),
                }],
                "You step out of the story. The page keeps your place.".to_string(),
            )
        }

        Intent::Move { direction } => {
            let actor = world.require(&action.actor)?;
            let to = ctx.topology.resolve_exit(&actor.room, *direction)?;
            let from = world.check_move(ctx.topology, &action.actor, &to)?;
            let narrative = ctx.topology.describe(&to, phase)?;
            (
                vec![Effect::EntityMoved {
                    entity: action.actor.clone(),
                    from,
                    to,
                }],
                narrative,
            )
        }

        Intent::Say { text } => {
            world.require(&action.actor)?;
            let text = non_empty(text, "say what?")?;
            (Vec::new(), format!("You say, \"{}\"", text))
        }

        Intent::Emote { text } => {
            let actor = world.require(&action.actor)?;
            let text = non_empty(text, "emote what?")?;
            (Vec::new(), format!("{} {}", actor.name, text))
        }

        Intent::Reflect { .. } => {
            world.require(&action.actor)?;
            enhanced_insight = matches!(verdict, Verdict::Augment(Augmentation::EnhancedInsight));
            let (amount, narrative) = if enhanced_insight {
                (
                    2,
                    "The water shows you more than you brought to it. Your insight deepens.",
                )
            } else {
                (1, "You pause and turn the moment over. Something settles.")
            };
            (
                vec![Effect::InsightGranted {
                    entity: action.actor.clone(),
                    amount,
                }],
                narrative.to_string(),
            )
        }

        Intent::Greet { target } => {
            let other = conversant(world, ctx, action, target, phase)?;
            (Vec::new(), format!("You greet {}.", other.name))
        }

        Intent::Ask { target, text } => {
            let text = non_empty(text, "ask what?")?;
            let other = conversant(world, ctx, action, target, phase)?;
            if other.kind != EntityKind::Npc {
                return Err(StoreError::NotConversational(other.name.clone()).into());
            }
            (Vec::new(), format!("You ask {}, \"{}\"", other.name, text))
        }

        Intent::Reply {
            visitor,
            prompt,
            text,
            delta,
        } => {
            let npc = world.require(&action.actor)?;
            if npc.kind != EntityKind::Npc {
                return Err(StoreError::Invalid("only hosts reply".into()).into());
            }
            let text = non_empty(text, "reply with what?")?;
            let listener = world.require(visitor)?;
            if listener.room != npc.room {
                return Err(StoreError::NotPresent {
                    query: visitor.to_string(),
                }
                .into());
            }
            let cap = ctx.config.npc.max_delta.saturating_abs();
            (
                vec![Effect::DispositionShifted {
                    npc: npc.id.clone(),
                    visitor: visitor.clone(),
                    delta: (*delta).clamp(-cap, cap),
                    note: prompt.clone(),
                    at: landing,
                }],
                format!("{} says, \"{}\"", capitalize(&npc.name), text),
            )
        }

        Intent::Build { item } => {
            let name = non_empty(item, "build what?")?;
            if name.chars().count() > MAX_ITEM_NAME {
                return Err(StoreError::Invalid("that is too elaborate to build".into()).into());
            }
            let item = Item::new(name).made_by(action.actor.clone());
            world.check_inventory(
                &action.actor,
                &InventoryDelta::Add { item: item.clone() },
            )?;
            (
                vec![Effect::ItemGained {
                    entity: action.actor.clone(),
                    item,
                }],
                format!("You shape {} out of curiosity and thin air.", article(name)),
            )
        }

        Intent::Take { item } => {
            let actor = world.require(&action.actor)?;
            let name = non_empty(item, "take what?")?;
            let found = world
                .decorations(&actor.room)
                .iter()
                .find(|d| d.matches(name))
                .cloned()
                .ok_or_else(|| StoreError::NotInRoom {
                    item: name.to_string(),
                })?;
            world.check_inventory(
                &action.actor,
                &InventoryDelta::Add {
                    item: found.clone(),
                },
            )?;
            (
                vec![
                    Effect::DecorationTaken {
                        room: actor.room.clone(),
                        item: found.name.clone(),
                    },
                    Effect::ItemGained {
                        entity: action.actor.clone(),
                        item: found.clone(),
                    },
                ],
                format!("You take the {}.", found.name),
            )
        }

        Intent::Place { item } => {
            let actor = world.require(&action.actor)?;
            let name = non_empty(item, "place what?")?;
            if !ctx.topology.vows(&actor.room).commons {
                return Err(StoreError::NotCommons {
                    room: actor.room.clone(),
                }
                .into());
            }
            let held = actor
                .inventory
                .find(name)
                .cloned()
                .ok_or_else(|| StoreError::ItemMissing {
                    item: name.to_string(),
                })?;
            (
                vec![
                    Effect::ItemReleased {
                        entity: action.actor.clone(),
                        item: held.name.clone(),
                    },
                    Effect::DecorationPlaced {
                        room: actor.room.clone(),
                        item: held.clone(),
                    },
                ],
                format!("You set the {} down for everyone to enjoy.", held.name),
            )
        }

        Intent::Release { item } => {
            let actor = world.require(&action.actor)?;
            let name = non_empty(item, "release what?")?;
            let held = actor
                .inventory
                .find(name)
                .ok_or_else(|| StoreError::ItemMissing {
                    item: name.to_string(),
                })?;
            (
                vec![Effect::ItemReleased {
                    entity: action.actor.clone(),
                    item: held.name.clone(),
                }],
                format!(
                    "You let the {} go. It dissolves into the air, and you feel lighter.",
                    held.name
                ),
            )
        }

        Intent::Teleport { destination } => {
            let actor = world.require(&action.actor)?;
            let room = ctx
                .topology
                .lookup(destination)
                .ok_or_else(|| StoreError::UnknownRoom(RoomId::new(destination.trim())))?;
            if room.id == actor.room {
                return Err(StoreError::Invalid("you are already there".into()).into());
            }
            let narrative = ctx.topology.describe(&room.id, phase)?;
            (
                vec![Effect::EntityMoved {
                    entity: action.actor.clone(),
                    from: actor.room.clone(),
                    to: room.id.clone(),
                }],
                format!("The world folds like a napkin.\n{}", narrative),
            )
        }

        Intent::Vouch { target } => {
            let actor = world.require(&action.actor)?;
            let other = present(world, &actor.room, target)?;
            let effects = world
                .community
                .plan_vouch(actor, other, &ctx.config.trust)?;
            let narrative = trust_narrative(&format!("You speak for {}.", other.name), &other.name, &effects);
            (effects, narrative)
        }

        Intent::Mentor { target } => {
            let actor = world.require(&action.actor)?;
            let other = present(world, &actor.room, target)?;
            let effects = world
                .community
                .plan_mentor(actor, other, &ctx.config.trust)?;
            let narrative = trust_narrative(
                &format!("You take {} under your wing.", other.name),
                &other.name,
                &effects,
            );
            (effects, narrative)
        }
    };

    if landing > world.clock.now() {
        effects.push(Effect::TimeAdvanced { to: landing });
    }

    Ok(Resolution {
        effects,
        narrative,
        enhanced_insight,
    })
}

fn non_empty<'a>(text: &'a str, complaint: &str) -> Result<&'a str, StoreError> {
    let text = text.trim();
    if text.is_empty() {
        Err(StoreError::Invalid(complaint.to_string()))
    } else {
        Ok(text)
    }
}

fn present<'w>(world: &'w WorldState, room: &'w RoomId, query: &str) -> Result<&'w Entity, StoreError> {
    world
        .find_in_room(room, query)
        .ok_or_else(|| StoreError::NotPresent {
            query: query.trim().to_string(),
        })
}

/// Someone in the actor's room who can be spoken to right now.
fn conversant<'w>(
    world: &'w WorldState,
    ctx: &ResolveContext<'_>,
    action: &Action,
    target: &str,
    phase: crate::clock::DayPhase,
) -> Result<&'w Entity, StoreError> {
    let actor = world.require(&action.actor)?;
    let other = present(world, &actor.room, target)?;
    if other.id == actor.id {
        return Err(StoreError::Invalid("talking to yourself is reflection".into()));
    }
    if other.kind == EntityKind::Npc {
        if let Some(archetype) = ctx.archetypes.get(&other.id) {
            if !archetype.available_at(phase) {
                return Err(StoreError::Unavailable {
                    npc: capitalize(&other.name),
                    phase: phase.to_string(),
                });
            }
        }
    }
    Ok(other)
}

fn trust_narrative(opening: &str, name: &str, effects: &[Effect]) -> String {
    match effects.iter().find_map(|e| match e {
        Effect::TrustRaised { to, .. } => Some(*to),
        _ => None,
    }) {
        Some(level) => format!("{} {} is now a {}.", opening, capitalize(name), level),
        None => opening.to_string(),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn article(noun: &str) -> String {
    let lower = noun.to_lowercase();
    if lower.starts_with("a ") || lower.starts_with("an ") || lower.starts_with("the ") {
        return noun.to_string();
    }
    match lower.chars().next() {
        Some('a' | 'e' | 'i' | 'o' | 'u') => format!("an {}", noun),
        _ => format!("a {}", noun),
    }
}

// ============================================================================
// Applying Effects
// ============================================================================

/// Apply effects in order. Stops at the first structural failure.
pub fn apply_effects(world: &mut WorldState, effects: &[Effect]) -> Result<(), StoreError> {
    for effect in effects {
        apply_effect(world, effect)?;
    }
    Ok(())
}

/// Apply a single effect.
pub fn apply_effect(world: &mut WorldState, effect: &Effect) -> Result<(), StoreError> {
    match effect {
        Effect::EntityArrived { entity } => world.add_entity(entity.clone()),
        Effect::EntityDeparted { entity, .. } => world.remove_entity(entity).map(|_| ()),
        Effect::EntityMoved { entity, to, .. } => world.relocate(entity, to),
        Effect::ItemGained { entity, item } => world
            .mutate_inventory(entity, InventoryDelta::Add { item: item.clone() })
            .map(|_| ()),
        Effect::ItemReleased { entity, item } => world
            .mutate_inventory(entity, InventoryDelta::Remove { name: item.clone() })
            .map(|_| ()),
        Effect::DecorationPlaced { room, item } => world.place_decoration(room, item.clone()),
        Effect::DecorationTaken { room, item } => world.take_decoration(room, item).map(|_| ()),
        Effect::InsightGranted { entity, amount } => world.grant_insight(entity, *amount),
        Effect::VouchRecorded {
            voucher, vouchee, ..
        } => {
            world.community.record_vouch(voucher, vouchee);
            Ok(())
        }
        Effect::MentorshipRecorded { mentor, mentee } => {
            world.community.record_mentorship(mentor, mentee);
            Ok(())
        }
        Effect::TrustRaised { entity, to, .. } => {
            let current = world.require(entity)?.trust;
            if *to > current {
                world.set_trust(entity, *to)?;
            }
            world.community.clear_vouches(entity);
            Ok(())
        }
        Effect::DispositionShifted {
            npc,
            visitor,
            delta,
            note,
            at,
        } => {
            world.dispositions.record(npc, visitor, *delta, note, *at);
            Ok(())
        }
        Effect::TimeAdvanced { to } => {
            world.clock.advance_to(*to);
            Ok(())
        }
    }
}
