//! World state store.
//!
//! Holds every mutable fact about the world: where each entity stands, what
//! it carries, what has been left in rooms, the clock, the community ledger
//! and NPC dispositions. The store performs structural checks only (does the
//! exit exist, is the inventory full). Ethics live in [`crate::vows`].

use crate::clock::Clock;
use crate::npc::Dispositions;
use crate::topology::{Direction, Topology};
use crate::trust::{Community, TrustLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Stable identifier for a room.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Stable identifier for an entity (visitor, NPC or custodian).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an id from a display name: "Mad Hatter" becomes "mad-hatter".
    pub fn from_name(name: &str) -> Self {
        let slug = name
            .split(|c: char| !c.is_alphanumeric())
            .filter(|part| !part.is_empty())
            .map(|part| part.to_lowercase())
            .collect::<Vec<_>>()
            .join("-");
        Self(slug)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Structural failures. None of these mutate state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no exit {direction} from {room}")]
    NoExit { room: RoomId, direction: Direction },

    #[error("no exit from {from} leads to {to}")]
    InvalidExit { from: RoomId, to: RoomId },

    #[error("unknown room: {0}")]
    UnknownRoom(RoomId),

    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("entity already present: {0}")]
    AlreadyPresent(EntityId),

    #[error("nobody called '{query}' is here")]
    NotPresent { query: String },

    #[error("not carrying {item}")]
    ItemMissing { item: String },

    #[error("no {item} in this room")]
    NotInRoom { item: String },

    #[error("inventory full (cap {cap})")]
    CapacityExceeded { cap: usize },

    #[error("{room} does not accept placed items")]
    NotCommons { room: RoomId },

    #[error("{npc} is not available at {phase}")]
    Unavailable { npc: String, phase: String },

    #[error("{0} cannot hold a conversation")]
    NotConversational(String),

    #[error("invalid action: {0}")]
    Invalid(String),
}

impl StoreError {
    /// Capacity denials are reported apart from plain structural failures.
    pub fn is_capacity(&self) -> bool {
        matches!(self, StoreError::CapacityExceeded { .. })
    }

    /// In-world phrasing shown to the actor.
    pub fn narrative(&self) -> String {
        match self {
            StoreError::NoExit { direction, .. } => {
                format!("There is no way {} from here.", direction)
            }
            StoreError::InvalidExit { to, .. } => {
                format!("No path leads from here to {}.", to)
            }
            StoreError::UnknownRoom(room) => {
                format!("Wonderland knows of no place called '{}'.", room)
            }
            StoreError::UnknownEntity(_) => {
                "You are not here yet. Arrive first.".to_string()
            }
            StoreError::AlreadyPresent(id) => format!("{} is already here.", id),
            StoreError::NotPresent { query } => format!("You see no '{}' here.", query),
            StoreError::ItemMissing { item } => format!("You are not carrying {}.", item),
            StoreError::NotInRoom { item } => format!("There is no {} here to take.", item),
            StoreError::CapacityExceeded { cap } => format!(
                "Your arms are full. You may hold {} things; release something first.",
                cap
            ),
            StoreError::NotCommons { .. } => {
                "This place keeps its own shape. Nothing can be left here.".to_string()
            }
            StoreError::Unavailable { npc, phase } => {
                format!("{} is nowhere to be found at {}.", npc, phase)
            }
            StoreError::NotConversational(name) => {
                format!("{} does not seem inclined to talk.", name)
            }
            StoreError::Invalid(reason) => format!("That cannot be done: {}.", reason),
        }
    }
}

// ============================================================================
// Entities and Items
// ============================================================================

/// What kind of being an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// An autonomous visitor driven by a session.
    Daemon,
    /// A host character voiced through an archetype.
    Npc,
    /// A human steward of the world.
    Custodian,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Daemon => "daemon",
            EntityKind::Npc => "npc",
            EntityKind::Custodian => "custodian",
        }
    }
}

/// A thing that can be carried or left in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maker: Option<EntityId>,
}

impl Item {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            maker: None,
        }
    }

    pub fn made_by(mut self, maker: EntityId) -> Self {
        self.maker = Some(maker);
        self
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.trim())
    }
}

/// A bounded collection of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    items: Vec<Item>,
    cap: usize,
}

impl Inventory {
    pub fn new(cap: usize) -> Self {
        Self {
            items: Vec::new(),
            cap,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.cap
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn find(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.matches(name))
    }

    pub fn add(&mut self, item: Item) -> Result<(), StoreError> {
        if self.is_full() {
            return Err(StoreError::CapacityExceeded { cap: self.cap });
        }
        self.items.push(item);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Item, StoreError> {
        let index = self
            .items
            .iter()
            .position(|item| item.matches(name))
            .ok_or_else(|| StoreError::ItemMissing {
                item: name.to_string(),
            })?;
        Ok(self.items.remove(index))
    }
}

/// A change to an entity's inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InventoryDelta {
    Add { item: Item },
    Remove { name: String },
}

/// A participant in the world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub kind: EntityKind,
    pub trust: TrustLevel,
    pub room: RoomId,
    pub inventory: Inventory,
    /// Reflections completed.
    pub insights: u32,
}

impl Entity {
    pub fn new(
        id: EntityId,
        name: impl Into<String>,
        kind: EntityKind,
        room: RoomId,
        inventory_cap: usize,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            trust: TrustLevel::Newcomer,
            room,
            inventory: Inventory::new(inventory_cap),
            insights: 0,
        }
    }

    pub fn with_trust(mut self, trust: TrustLevel) -> Self {
        self.trust = trust;
        self
    }

    /// Case-insensitive match against id or display name.
    pub fn answers_to(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return false;
        }
        let query = query.strip_prefix("the ").unwrap_or(&query).to_string();
        let name = self.name.to_lowercase();
        let name = name.strip_prefix("the ").unwrap_or(&name);
        self.id.as_str() == query
            || name == query
            || EntityId::from_name(&query) == self.id
            || self.id.as_str().split('-').any(|part| part == query)
    }
}

/// Mutable state of a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomState {
    pub decorations: Vec<Item>,
}

// ============================================================================
// The Store
// ============================================================================

/// The complete mutable world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    pub world_id: Uuid,
    pub clock: Clock,
    pub entities: BTreeMap<EntityId, Entity>,
    pub rooms: BTreeMap<RoomId, RoomState>,
    #[serde(default)]
    pub community: Community,
    #[serde(default)]
    pub dispositions: Dispositions,
}

impl WorldState {
    pub fn new(topology: &Topology, clock: Clock) -> Self {
        Self {
            world_id: Uuid::new_v4(),
            clock,
            entities: BTreeMap::new(),
            rooms: topology
                .room_ids()
                .map(|id| (id.clone(), RoomState::default()))
                .collect(),
            community: Community::default(),
            dispositions: Dispositions::default(),
        }
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn require(&self, id: &EntityId) -> Result<&Entity, StoreError> {
        self.entities
            .get(id)
            .ok_or_else(|| StoreError::UnknownEntity(id.clone()))
    }

    fn require_mut(&mut self, id: &EntityId) -> Result<&mut Entity, StoreError> {
        self.entities
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownEntity(id.clone()))
    }

    pub fn position(&self, id: &EntityId) -> Option<&RoomId> {
        self.entities.get(id).map(|e| &e.room)
    }

    pub fn current_level(&self, id: &EntityId) -> Option<TrustLevel> {
        self.entities.get(id).map(|e| e.trust)
    }

    pub fn entities_in<'a>(&'a self, room: &'a RoomId) -> impl Iterator<Item = &'a Entity> + 'a {
        self.entities.values().filter(move |e| &e.room == room)
    }

    /// Find someone in a room by id or name.
    pub fn find_in_room<'a>(&'a self, room: &'a RoomId, query: &str) -> Option<&'a Entity> {
        self.entities_in(room).find(|e| e.answers_to(query))
    }

    pub fn decorations(&self, room: &RoomId) -> &[Item] {
        self.rooms
            .get(room)
            .map(|r| r.decorations.as_slice())
            .unwrap_or(&[])
    }

    pub fn add_entity(&mut self, entity: Entity) -> Result<(), StoreError> {
        if self.entities.contains_key(&entity.id) {
            return Err(StoreError::AlreadyPresent(entity.id));
        }
        if !self.rooms.contains_key(&entity.room) {
            return Err(StoreError::UnknownRoom(entity.room));
        }
        self.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    pub fn remove_entity(&mut self, id: &EntityId) -> Result<Entity, StoreError> {
        self.entities
            .remove(id)
            .ok_or_else(|| StoreError::UnknownEntity(id.clone()))
    }

    /// Check that `to` is reachable through an exit of the entity's room.
    /// Returns the room the entity would leave.
    pub fn check_move(
        &self,
        topology: &Topology,
        id: &EntityId,
        to: &RoomId,
    ) -> Result<RoomId, StoreError> {
        let from = &self.require(id)?.room;
        let room = topology
            .room(from)
            .ok_or_else(|| StoreError::UnknownRoom(from.clone()))?;
        if room.exits.values().any(|target| target == to) {
            Ok(from.clone())
        } else {
            Err(StoreError::InvalidExit {
                from: from.clone(),
                to: to.clone(),
            })
        }
    }

    /// Move an entity along an exit, checking the exit first.
    ///
    /// This is the checked entry point for code that holds a `WorldState`
    /// directly. The realm pipeline splits the same work in two: resolution
    /// calls [`check_move`](Self::check_move) and the applied effect calls
    /// [`relocate`](Self::relocate), which teleports share.
    pub fn move_entity(
        &mut self,
        topology: &Topology,
        id: &EntityId,
        to: &RoomId,
    ) -> Result<(), StoreError> {
        self.check_move(topology, id, to)?;
        self.require_mut(id)?.room = to.clone();
        Ok(())
    }

    /// Place an entity in any known room, exits notwithstanding.
    pub fn relocate(&mut self, id: &EntityId, to: &RoomId) -> Result<(), StoreError> {
        if !self.rooms.contains_key(to) {
            return Err(StoreError::UnknownRoom(to.clone()));
        }
        self.require_mut(id)?.room = to.clone();
        Ok(())
    }

    pub fn check_inventory(&self, id: &EntityId, delta: &InventoryDelta) -> Result<(), StoreError> {
        let inventory = &self.require(id)?.inventory;
        match delta {
            InventoryDelta::Add { .. } if inventory.is_full() => {
                Err(StoreError::CapacityExceeded {
                    cap: inventory.cap(),
                })
            }
            InventoryDelta::Remove { name } if inventory.find(name).is_none() => {
                Err(StoreError::ItemMissing { item: name.clone() })
            }
            _ => Ok(()),
        }
    }

    pub fn mutate_inventory(
        &mut self,
        id: &EntityId,
        delta: InventoryDelta,
    ) -> Result<Option<Item>, StoreError> {
        let inventory = &mut self.require_mut(id)?.inventory;
        match delta {
            InventoryDelta::Add { item } => inventory.add(item).map(|_| None),
            InventoryDelta::Remove { name } => inventory.remove(&name).map(Some),
        }
    }

    pub fn place_decoration(&mut self, room: &RoomId, item: Item) -> Result<(), StoreError> {
        self.rooms
            .get_mut(room)
            .ok_or_else(|| StoreError::UnknownRoom(room.clone()))?
            .decorations
            .push(item);
        Ok(())
    }

    pub fn take_decoration(&mut self, room: &RoomId, name: &str) -> Result<Item, StoreError> {
        let decorations = &mut self
            .rooms
            .get_mut(room)
            .ok_or_else(|| StoreError::UnknownRoom(room.clone()))?
            .decorations;
        let index = decorations
            .iter()
            .position(|item| item.matches(name))
            .ok_or_else(|| StoreError::NotInRoom {
                item: name.to_string(),
            })?;
        Ok(decorations.remove(index))
    }

    pub fn grant_insight(&mut self, id: &EntityId, amount: u32) -> Result<(), StoreError> {
        let entity = self.require_mut(id)?;
        entity.insights = entity.insights.saturating_add(amount);
        Ok(())
    }

    pub fn set_trust(&mut self, id: &EntityId, level: TrustLevel) -> Result<(), StoreError> {
        self.require_mut(id)?.trust = level;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockConfig;
    use crate::topology::wonderland;

    fn world_with_alice() -> (Topology, WorldState, EntityId) {
        let topology = wonderland();
        let mut world = WorldState::new(&topology, Clock::new(&ClockConfig::default()));
        let alice = EntityId::new("alice");
        world
            .add_entity(Entity::new(
                alice.clone(),
                "Alice",
                EntityKind::Daemon,
                RoomId::new("riverbank"),
                2,
            ))
            .unwrap();
        (topology, world, alice)
    }

    #[test]
    fn test_entity_id_from_name() {
        assert_eq!(EntityId::from_name("Mad Hatter").as_str(), "mad-hatter");
        assert_eq!(EntityId::from_name("  the Cheshire  Cat ").as_str(), "the-cheshire-cat");
        assert_eq!(EntityId::from_name("!!!").as_str(), "");
    }

    #[test]
    fn test_move_along_exit() {
        let (topology, mut world, alice) = world_with_alice();
        world
            .move_entity(&topology, &alice, &RoomId::new("rabbit-hole"))
            .unwrap();
        assert_eq!(world.position(&alice), Some(&RoomId::new("rabbit-hole")));
    }

    #[test]
    fn test_move_without_exit_is_invalid() {
        let (topology, mut world, alice) = world_with_alice();
        let err = world
            .move_entity(&topology, &alice, &RoomId::new("queens-court"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidExit { .. }));
        assert_eq!(world.position(&alice), Some(&RoomId::new("riverbank")));
    }

    #[test]
    fn test_inventory_cap() {
        let (_, mut world, alice) = world_with_alice();
        for name in ["teacup", "key"] {
            world
                .mutate_inventory(&alice, InventoryDelta::Add { item: Item::new(name) })
                .unwrap();
        }
        let err = world
            .mutate_inventory(&alice, InventoryDelta::Add { item: Item::new("tart") })
            .unwrap_err();
        assert_eq!(err, StoreError::CapacityExceeded { cap: 2 });
        assert!(err.is_capacity());
        assert_eq!(world.entity(&alice).unwrap().inventory.len(), 2);
    }

    #[test]
    fn test_remove_missing_item() {
        let (_, mut world, alice) = world_with_alice();
        let delta = InventoryDelta::Remove {
            name: "pocket watch".to_string(),
        };
        assert!(world.check_inventory(&alice, &delta).is_err());
        assert!(world.mutate_inventory(&alice, delta).is_err());
    }

    #[test]
    fn test_find_in_room_by_name() {
        let (_, world, alice) = world_with_alice();
        let room = RoomId::new("riverbank");
        assert_eq!(world.find_in_room(&room, "Alice").map(|e| &e.id), Some(&alice));
        assert_eq!(world.find_in_room(&room, "alice").map(|e| &e.id), Some(&alice));
        assert!(world.find_in_room(&room, "hatter").is_none());
    }

    #[test]
    fn test_decorations_round_trip() {
        let (_, mut world, _) = world_with_alice();
        let room = RoomId::new("garden");
        world.place_decoration(&room, Item::new("paper lantern")).unwrap();
        assert_eq!(world.decorations(&room).len(), 1);
        let item = world.take_decoration(&room, "Paper Lantern").unwrap();
        assert_eq!(item.name, "paper lantern");
        assert!(world.take_decoration(&room, "paper lantern").is_err());
    }

    #[test]
    fn test_duplicate_arrival_rejected() {
        let (_, mut world, alice) = world_with_alice();
        let again = Entity::new(alice, "Alice", EntityKind::Daemon, RoomId::new("garden"), 5);
        assert!(matches!(
            world.add_entity(again),
            Err(StoreError::AlreadyPresent(_))
        ));
    }
}
