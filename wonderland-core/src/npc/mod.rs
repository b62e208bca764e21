//! NPC archetype injection.
//!
//! NPCs are defined by small pointer-sets rather than full personalities.
//! This module holds:
//! - Archetypes and their registry
//! - Per-visitor disposition ledgers with bounded memory
//! - Context composition and timed generation with fallback

mod archetype;
mod disposition;
mod generator;
mod injector;

pub use archetype::{
    wonderland_archetypes, Archetype, ArchetypeError, ArchetypeRegistry, PointerSet,
    DEFAULT_POINTER_BUDGET,
};
pub use disposition::{Disposition, DispositionLedger, DispositionLimits, Dispositions, Memory};
pub use generator::{GenerationError, Silent, TextGenerator};
pub use injector::{compose_context, Injector, NpcConfig, PromptContext, Scene, Spoken};
