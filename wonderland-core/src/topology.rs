//! Topology registry.
//!
//! The fixed graph of rooms: ids, exits, description templates, sensory
//! profiles per day phase and the vow flags each room carries. Topology is
//! read-only once loaded; everything that changes lives in
//! [`crate::world::WorldState`].

use crate::clock::DayPhase;
use crate::world::{RoomId, StoreError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating a topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("topology has no rooms")]
    Empty,

    #[error("duplicate room id: {0}")]
    DuplicateRoom(RoomId),

    #[error("exit {direction} from {room} leads to unknown room {target}")]
    DanglingExit {
        room: RoomId,
        direction: Direction,
        target: RoomId,
    },

    #[error("spawn room {0} does not exist")]
    UnknownSpawn(RoomId),
}

// ============================================================================
// Directions
// ============================================================================

/// A labelled exit direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
    Northeast,
    Northwest,
    Southeast,
    Southwest,
    Up,
    Down,
    In,
    Out,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
            Direction::Northeast => "northeast",
            Direction::Northwest => "northwest",
            Direction::Southeast => "southeast",
            Direction::Southwest => "southwest",
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    /// Parse a direction word or its abbreviation.
    pub fn parse(word: &str) -> Option<Self> {
        match word.trim().to_lowercase().as_str() {
            "n" | "north" => Some(Direction::North),
            "s" | "south" => Some(Direction::South),
            "e" | "east" => Some(Direction::East),
            "w" | "west" => Some(Direction::West),
            "ne" | "northeast" => Some(Direction::Northeast),
            "nw" | "northwest" => Some(Direction::Northwest),
            "se" | "southeast" => Some(Direction::Southeast),
            "sw" | "southwest" => Some(Direction::Southwest),
            "u" | "up" => Some(Direction::Up),
            "d" | "down" => Some(Direction::Down),
            "in" | "enter" => Some(Direction::In),
            "out" | "exit" => Some(Direction::Out),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Rooms
// ============================================================================

/// Which vow behaviours a room switches on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VowFlags {
    /// Reflection here yields enhanced insight.
    pub growth: bool,
    /// Harm is judged more strictly.
    pub sanctuary: bool,
    /// Visitors may leave items here.
    pub commons: bool,
}

/// What a room smells, sounds and looks like in each phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensoryProfile {
    pub dawn: String,
    pub day: String,
    pub dusk: String,
    pub night: String,
}

impl SensoryProfile {
    pub fn new(
        dawn: impl Into<String>,
        day: impl Into<String>,
        dusk: impl Into<String>,
        night: impl Into<String>,
    ) -> Self {
        Self {
            dawn: dawn.into(),
            day: day.into(),
            dusk: dusk.into(),
            night: night.into(),
        }
    }

    pub fn for_phase(&self, phase: DayPhase) -> &str {
        match phase {
            DayPhase::Dawn => &self.dawn,
            DayPhase::Day => &self.day,
            DayPhase::Dusk => &self.dusk,
            DayPhase::Night => &self.night,
        }
    }
}

/// A room in the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    /// Description with `{sense}`, `{phase}` and `{a|b|c}` slots.
    pub template: String,
    #[serde(default)]
    pub exits: BTreeMap<Direction, RoomId>,
    #[serde(default)]
    pub senses: SensoryProfile,
    #[serde(default)]
    pub vows: VowFlags,
}

impl Room {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: RoomId::new(id),
            name: name.into(),
            template: String::new(),
            exits: BTreeMap::new(),
            senses: SensoryProfile::default(),
            vows: VowFlags::default(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_exit(mut self, direction: Direction, to: impl Into<String>) -> Self {
        self.exits.insert(direction, RoomId::new(to));
        self
    }

    pub fn with_senses(mut self, senses: SensoryProfile) -> Self {
        self.senses = senses;
        self
    }

    pub fn growth(mut self) -> Self {
        self.vows.growth = true;
        self
    }

    pub fn sanctuary(mut self) -> Self {
        self.vows.sanctuary = true;
        self
    }

    pub fn commons(mut self) -> Self {
        self.vows.commons = true;
        self
    }

    /// Exits rendered as a sentence fragment: "north, east and down".
    pub fn exit_list(&self) -> String {
        let names: Vec<&str> = self.exits.keys().map(|d| d.name()).collect();
        match names.len() {
            0 => "none".to_string(),
            1 => names[0].to_string(),
            n => format!("{} and {}", names[..n - 1].join(", "), names[n - 1]),
        }
    }
}

/// Serializable form of a topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyDef {
    pub spawn: RoomId,
    pub rooms: Vec<Room>,
}

// ============================================================================
// Registry
// ============================================================================

/// The room graph.
#[derive(Debug, Clone)]
pub struct Topology {
    rooms: BTreeMap<RoomId, Room>,
    spawn: RoomId,
}

impl Topology {
    /// Build and validate a topology.
    pub fn from_def(def: TopologyDef) -> Result<Self, TopologyError> {
        if def.rooms.is_empty() {
            return Err(TopologyError::Empty);
        }
        let mut rooms = BTreeMap::new();
        for room in def.rooms {
            if rooms.contains_key(&room.id) {
                return Err(TopologyError::DuplicateRoom(room.id));
            }
            rooms.insert(room.id.clone(), room);
        }
        for room in rooms.values() {
            for (direction, target) in &room.exits {
                if !rooms.contains_key(target) {
                    return Err(TopologyError::DanglingExit {
                        room: room.id.clone(),
                        direction: *direction,
                        target: target.clone(),
                    });
                }
            }
        }
        if !rooms.contains_key(&def.spawn) {
            return Err(TopologyError::UnknownSpawn(def.spawn));
        }
        Ok(Self {
            rooms,
            spawn: def.spawn,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, TopologyError> {
        Self::from_def(serde_json::from_str(json)?)
    }

    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn to_def(&self) -> TopologyDef {
        TopologyDef {
            spawn: self.spawn.clone(),
            rooms: self.rooms.values().cloned().collect(),
        }
    }

    pub fn spawn(&self) -> &RoomId {
        &self.spawn
    }

    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn require(&self, id: &RoomId) -> Result<&Room, StoreError> {
        self.rooms
            .get(id)
            .ok_or_else(|| StoreError::UnknownRoom(id.clone()))
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn room_ids(&self) -> impl Iterator<Item = &RoomId> {
        self.rooms.keys()
    }

    pub fn vows(&self, id: &RoomId) -> VowFlags {
        self.rooms.get(id).map(|r| r.vows).unwrap_or_default()
    }

    /// Find a room by id or by name, case-insensitively.
    pub fn lookup(&self, query: &str) -> Option<&Room> {
        let query = query.trim();
        self.rooms.get(&RoomId::new(query)).or_else(|| {
            let lowered = query.to_lowercase();
            self.rooms.values().find(|room| {
                let name = room.name.to_lowercase();
                name == lowered || name.strip_prefix("the ") == Some(lowered.as_str())
            })
        })
    }

    /// Where an exit leads.
    pub fn resolve_exit(&self, from: &RoomId, direction: Direction) -> Result<RoomId, StoreError> {
        self.require(from)?
            .exits
            .get(&direction)
            .cloned()
            .ok_or_else(|| StoreError::NoExit {
                room: from.clone(),
                direction,
            })
    }

    /// The raw template for a room. Sensory slots are filled by [`Self::describe`].
    pub fn template(&self, id: &RoomId) -> Result<&str, StoreError> {
        Ok(&self.require(id)?.template)
    }

    /// Render a room for a phase. The same room and phase always render the
    /// same text.
    pub fn describe(&self, id: &RoomId, phase: DayPhase) -> Result<String, StoreError> {
        self.describe_with(id, phase, 0)
    }

    /// Render with extra variation mixed into the slot seed.
    pub fn describe_with(
        &self,
        id: &RoomId,
        phase: DayPhase,
        variation: u64,
    ) -> Result<String, StoreError> {
        let room = self.require(id)?;
        let seed = fnv1a(room.id.as_str().as_bytes()) ^ fnv1a(phase.name().as_bytes()) ^ variation;
        let mut rng = StdRng::seed_from_u64(seed);
        let body = render_template(&room.template, room.senses.for_phase(phase), phase, &mut rng);
        Ok(format!(
            "{}\n{}\nExits: {}.",
            room.name,
            body,
            room.exit_list()
        ))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Fill `{sense}`, `{phase}` and `{a|b|c}` slots. Unknown slots stay as written.
fn render_template(template: &str, sense: &str, phase: DayPhase, rng: &mut StdRng) -> String {
    let mut out = String::with_capacity(template.len() + sense.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let slot = &after[..close];
        match slot {
            "sense" => out.push_str(sense),
            "phase" => out.push_str(phase.name()),
            _ if slot.contains('|') => {
                let choices: Vec<&str> = slot.split('|').collect();
                out.push_str(choices[rng.gen_range(0..choices.len())]);
            }
            _ => {
                out.push('{');
                out.push_str(slot);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

// ============================================================================
// The Canonical World
// ============================================================================

/// The built-in Wonderland.
pub fn wonderland() -> Topology {
    use Direction::*;

    let rooms = vec![
        Room::new("riverbank", "The Riverbank")
            .with_template(
                "A grassy bank slopes to a lazy river. {sense} A rabbit hole gapes \
                 beneath a {hedge|hawthorn|briar} at the top of the slope.",
            )
            .with_senses(SensoryProfile::new(
                "Mist lifts off the water in slow curls.",
                "Bees drone over the daisies and the water glitters.",
                "The river turns the colour of weak tea.",
                "Frogs keep up a solemn chorus in the reeds.",
            ))
            .with_exit(Down, "rabbit-hole")
            .with_exit(East, "garden"),
        Room::new("rabbit-hole", "The Rabbit Hole")
            .with_template(
                "You are falling, or the shelves are rising past you. {sense} \
                 Jars of {orange marmalade|pickled moonlight|forgotten names} drift by.",
            )
            .with_senses(SensoryProfile::new(
                "A pale light glows far below.",
                "Lamps flicker in little alcoves in the walls.",
                "The air smells of earth and old maps.",
                "It is very dark, and the falling feels slower.",
            ))
            .with_exit(Up, "riverbank")
            .with_exit(Down, "hall-of-doors"),
        Room::new("hall-of-doors", "The Hall of Doors")
            .with_template(
                "A long low hall lined with doors of every size, all locked but \
                 the few that matter. {sense} A little glass table stands in the middle.",
            )
            .with_senses(SensoryProfile::new(
                "Grey light leaks under the smallest door.",
                "The lamps hanging from the roof burn steadily.",
                "Shadows lengthen between the doors.",
                "The doors breathe softly in the dark.",
            ))
            .with_exit(North, "garden")
            .with_exit(East, "looking-glass")
            .with_exit(West, "caucus-shore"),
        Room::new("garden", "The Garden")
            .with_template(
                "Roses grow here, some white, some {hastily painted red|half painted|red \
                 at the edges}. {sense} Paths wander off in several directions at once.",
            )
            .with_senses(SensoryProfile::new(
                "Dew beads on every petal.",
                "Gardeners' paintbrushes lie abandoned by the fountain.",
                "The flowers murmur gossip to one another.",
                "A grin hangs in the branches, faintly luminous.",
            ))
            .with_exit(South, "hall-of-doors")
            .with_exit(West, "riverbank")
            .with_exit(East, "tea-party")
            .with_exit(North, "queens-court")
            .with_exit(Down, "reflection-pool")
            .commons(),
        Room::new("tea-party", "The Mad Tea Party")
            .with_template(
                "A long table set for far too many, though only a few seats are taken. \
                 {sense} It is always six o'clock here, or {nearly|just past|exactly} so.",
            )
            .with_senses(SensoryProfile::new(
                "Yesterday's teacups are still warm.",
                "Steam rises from a pot that never empties.",
                "Someone has moved down a place again.",
                "Candles gutter in the butter dish.",
            ))
            .with_exit(West, "garden")
            .with_exit(North, "mushroom-wood"),
        Room::new("mushroom-wood", "The Mushroom Wood")
            .with_template(
                "Mushrooms taller than you crowd together under a green ceiling. {sense} \
                 A {blue|violet|slate-coloured} haze drifts between the stalks.",
            )
            .with_senses(SensoryProfile::new(
                "Droplets fall from the caps like slow rain.",
                "Smoke rings hang in the warm air.",
                "The stalks creak as they settle.",
                "Glowing spores wander like fireflies.",
            ))
            .with_exit(South, "tea-party")
            .with_exit(East, "reflection-pool"),
        Room::new("reflection-pool", "The Reflection Pool")
            .with_template(
                "A perfectly still pool ringed with smooth stones. {sense} Your reflection \
                 seems to be thinking about something you have not thought of yet.",
            )
            .with_senses(SensoryProfile::new(
                "The first light lies on the water like a sheet of paper.",
                "Dragonflies hover without disturbing the surface.",
                "The sky in the pool is a shade ahead of the sky above.",
                "Stars sit in the water, closer than they should be.",
            ))
            .with_exit(West, "mushroom-wood")
            .with_exit(Up, "garden")
            .growth(),
        Room::new("queens-court", "The Queen's Court")
            .with_template(
                "A croquet lawn laid out with military precision. {sense} The hoops \
                 {shuffle|stand to attention|bow} as you pass.",
            )
            .with_senses(SensoryProfile::new(
                "The lawn is being rolled flat by very nervous cards.",
                "Flamingos wait in a sulky row.",
                "The throne casts a shadow far longer than it should.",
                "The court is empty, which feels more dangerous somehow.",
            ))
            .with_exit(South, "garden"),
        Room::new("caucus-shore", "The Caucus Shore")
            .with_template(
                "A wet shore where creatures run in circles to get dry. {sense} Everyone \
                 has won, and all must have prizes.",
            )
            .with_senses(SensoryProfile::new(
                "The tide of tears has gone out overnight.",
                "Feathers and fur steam gently in the sun.",
                "The race has slowed to a companionable walk.",
                "Small creatures sleep in a heap, dry at last.",
            ))
            .with_exit(East, "hall-of-doors")
            .with_exit(North, "riverbank")
            .commons(),
        Room::new("looking-glass", "The Looking-Glass Room")
            .with_template(
                "A quiet drawing room that is the mirror image of one you almost remember. \
                 {sense} Here, nothing unkind can stay in focus.",
            )
            .with_senses(SensoryProfile::new(
                "The fire is just being lit, from the wrong side.",
                "Chessmen walk about the hearth in pairs.",
                "The clock on the mantel smiles at you.",
                "The glass glows softly, like a lamp turned low.",
            ))
            .with_exit(West, "hall-of-doors")
            .sanctuary(),
    ];

    let def = TopologyDef {
        spawn: RoomId::new("riverbank"),
        rooms,
    };
    let mut map = BTreeMap::new();
    for room in def.rooms {
        map.insert(room.id.clone(), room);
    }
    Topology {
        rooms: map,
        spawn: def.spawn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_world_is_valid() {
        let topology = wonderland();
        let rebuilt = Topology::from_def(topology.to_def()).unwrap();
        assert_eq!(rebuilt.rooms().count(), 10);
        assert_eq!(rebuilt.spawn(), &RoomId::new("riverbank"));
    }

    #[test]
    fn test_resolve_exit() {
        let topology = wonderland();
        assert_eq!(
            topology
                .resolve_exit(&RoomId::new("riverbank"), Direction::Down)
                .unwrap(),
            RoomId::new("rabbit-hole")
        );
        assert!(matches!(
            topology.resolve_exit(&RoomId::new("riverbank"), Direction::North),
            Err(StoreError::NoExit { .. })
        ));
        assert!(matches!(
            topology.resolve_exit(&RoomId::new("nowhere"), Direction::North),
            Err(StoreError::UnknownRoom(_))
        ));
    }

    #[test]
    fn test_asymmetric_drop() {
        let topology = wonderland();
        let hall = topology.room(&RoomId::new("hall-of-doors")).unwrap();
        assert!(!hall.exits.values().any(|r| r.as_str() == "rabbit-hole"));
    }

    #[test]
    fn test_describe_is_deterministic_per_phase() {
        let topology = wonderland();
        let garden = RoomId::new("garden");
        let dawn = topology.describe(&garden, DayPhase::Dawn).unwrap();
        assert_eq!(dawn, topology.describe(&garden, DayPhase::Dawn).unwrap());
        assert!(dawn.contains("Dew beads"));
        assert!(!dawn.contains('{'));

        let night = topology.describe(&garden, DayPhase::Night).unwrap();
        assert!(night.contains("A grin hangs"));
        assert!(night.ends_with("Exits: north, south, east, west and down."));
    }

    #[test]
    fn test_render_leaves_unknown_slots() {
        let mut rng = StdRng::seed_from_u64(7);
        let out = render_template("a {mystery} b {x|x}", "", DayPhase::Day, &mut rng);
        assert_eq!(out, "a {mystery} b x");
        let out = render_template("unclosed {sense", "s", DayPhase::Day, &mut rng);
        assert_eq!(out, "unclosed {sense");
    }

    #[test]
    fn test_dangling_exit_rejected() {
        let def = TopologyDef {
            spawn: RoomId::new("a"),
            rooms: vec![Room::new("a", "A").with_exit(Direction::North, "b")],
        };
        assert!(matches!(
            Topology::from_def(def),
            Err(TopologyError::DanglingExit { .. })
        ));
    }

    #[test]
    fn test_duplicate_room_rejected() {
        let def = TopologyDef {
            spawn: RoomId::new("a"),
            rooms: vec![Room::new("a", "A"), Room::new("a", "Again")],
        };
        assert!(matches!(
            Topology::from_def(def),
            Err(TopologyError::DuplicateRoom(_))
        ));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "spawn": "porch",
            "rooms": [
                {"id": "porch", "name": "The Porch", "template": "{sense}",
                 "exits": {"in": "parlour"}, "senses": {"day": "Sunny."}},
                {"id": "parlour", "name": "The Parlour", "template": "Cosy.",
                 "exits": {"out": "porch"}, "vows": {"sanctuary": true}}
            ]
        }"#;
        let topology = Topology::from_json(json).unwrap();
        assert!(topology.vows(&RoomId::new("parlour")).sanctuary);
        assert_eq!(
            topology.resolve_exit(&RoomId::new("porch"), Direction::In).unwrap(),
            RoomId::new("parlour")
        );
        let text = topology.describe(&RoomId::new("porch"), DayPhase::Day).unwrap();
        assert!(text.contains("Sunny."));
    }

    #[test]
    fn test_lookup_by_name() {
        let topology = wonderland();
        assert_eq!(topology.lookup("garden").unwrap().id, RoomId::new("garden"));
        assert_eq!(
            topology.lookup("Queen's Court").unwrap().id,
            RoomId::new("queens-court")
        );
        assert!(topology.lookup("Narnia").is_none());
    }

    #[test]
    fn test_direction_abbreviations() {
        assert_eq!(Direction::parse("NE"), Some(Direction::Northeast));
        assert_eq!(Direction::parse("d"), Some(Direction::Down));
        assert_eq!(Direction::parse("sideways"), None);
    }
}
