//! Wonderland: a persistent text world with vows built into its physics.
//!
//! This crate provides:
//! - A room graph with day-phase descriptions and per-room vow flags
//! - A world store that changes only through validated, witnessed actions
//! - A deterministic clock driven by action weights, never by wall time
//! - NPC hosts steered by small pointer-sets and bounded memories
//! - A trust cascade of vouching and mentorship
//! - Crash-safe persistence: an append-only witness log plus snapshots
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use wonderland_core::{EntityKind, FileStorage, Realm, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = Arc::new(FileStorage::open("wonderland-data").await?);
//!     let realm = Arc::new(Realm::builder().with_storage(storage).open().await?);
//!
//!     let (session, arrival) = Session::open(realm, "Alice", EntityKind::Daemon).await?;
//!     println!("{}", arrival.narrative);
//!
//!     let outcome = session.send("down").await?;
//!     println!("{}", outcome.narrative);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod command;
pub mod config;
pub mod npc;
pub mod persist;
pub mod realm;
pub mod rules;
pub mod session;
pub mod testing;
pub mod topology;
pub mod trust;
pub mod vows;
pub mod witness;
pub mod world;

// Primary public API
pub use clock::{Clock, ClockConfig, DayPhase, VirtualTime};
pub use command::{parse, Command, Meta, ParseError};
pub use config::{ConfigError, WorldConfig};
pub use npc::{ArchetypeRegistry, Silent, TextGenerator};
pub use persist::{FileStorage, MemoryStorage, PersistError, Snapshot, Storage};
pub use realm::{Outcome, Realm, RealmBuilder, RealmError, Status};
pub use rules::{Action, ActionKind, Effect, Intent};
pub use session::{CancelHandle, Session};
pub use testing::{ScriptedVoice, TestHarness};
pub use topology::{wonderland, Direction, Topology};
pub use trust::TrustLevel;
pub use vows::{HarmCategory, Verdict};
pub use witness::{EventFilter, EventId, WorldEvent};
pub use world::{EntityId, EntityKind, RoomId, WorldState};
