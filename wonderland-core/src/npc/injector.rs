//! Archetype injection: composing an NPC's context and getting it to speak.
//!
//! Composition is pure and happens while the world is readable. Generation
//! happens afterwards with no locks held, under a timeout, and always
//! produces something: a failed or slow model yields the archetype's
//! fallback line.

use super::archetype::{Archetype, DEFAULT_POINTER_BUDGET};
use super::disposition::{Disposition, DispositionLedger, DispositionLimits};
use super::generator::{GenerationError, TextGenerator};
use crate::clock::DayPhase;
use crate::topology::Room;
use crate::world::{Entity, EntityId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// NPC behaviour settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NpcConfig {
    /// How long to wait for a line before falling back.
    pub timeout_ms: u64,

    /// Exchanges remembered per visitor.
    pub memory_cap: usize,

    /// Memories included in a prompt.
    pub recall: usize,

    /// Disposition score range is -bound..=bound.
    pub score_bound: i32,

    /// Largest change one exchange can make.
    pub max_delta: i32,

    /// Shift for a warm exchange.
    pub approval: i32,

    /// Shift for an exchange with a harm signal below the blocking threshold.
    pub displeasure: i32,

    /// Token budget per pointer-set.
    pub pointer_budget: usize,

    pub max_tokens: usize,
    pub temperature: Option<f32>,
}

impl NpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn limits(&self) -> DispositionLimits {
        DispositionLimits {
            memory_cap: self.memory_cap,
            score_bound: self.score_bound,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_memory_cap(mut self, memory_cap: usize) -> Self {
        self.memory_cap = memory_cap;
        self.recall = self.recall.min(memory_cap);
        self
    }
}

impl Default for NpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 8_000,
            memory_cap: 12,
            recall: 4,
            score_bound: 10,
            max_delta: 3,
            approval: 2,
            displeasure: 2,
            pointer_budget: DEFAULT_POINTER_BUDGET,
            max_tokens: 160,
            temperature: Some(0.9),
        }
    }
}

/// Everything a generator needs for one line.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub npc: EntityId,
    pub visitor: EntityId,
    pub system: String,
    /// What the visitor said or did, as the user turn.
    pub utterance: String,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
}

/// Where and when the exchange happens.
pub struct Scene<'a> {
    pub room: &'a Room,
    pub phase: DayPhase,
}

/// Compose the context for an NPC answering a visitor.
pub fn compose_context(
    archetype: &Archetype,
    visitor: &Entity,
    ledger: Option<&DispositionLedger>,
    disposition: Disposition,
    scene: &Scene<'_>,
    prompt: &str,
    config: &NpcConfig,
) -> PromptContext {
    let mut system = archetype.pointers.render();
    system.push_str(&format!(
        "\n\nYou are in {}. It is {}. {}",
        scene.room.name,
        scene.phase,
        scene.room.senses.for_phase(scene.phase)
    ));
    system.push_str(&format!(
        "\nYou are speaking with {}, a {} of this world. You {}.",
        visitor.name,
        visitor.trust,
        disposition.describe()
    ));
    let memories: Vec<String> = ledger
        .map(|l| {
            l.recent(config.recall)
                .map(|m| format!("- {}", m.note))
                .collect()
        })
        .unwrap_or_default();
    if !memories.is_empty() {
        system.push_str("\nWhat you remember of them, most recent first:\n");
        system.push_str(&memories.join("\n"));
    }
    system.push_str(
        "\n\nAnswer in character with one to three sentences of speech only, no stage \
         directions. This world refuses harm, deception and coercion, and so do you.",
    );

    PromptContext {
        npc: archetype.id.clone(),
        visitor: visitor.id.clone(),
        system,
        utterance: prompt.to_string(),
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}

/// What an NPC ended up saying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spoken {
    pub text: String,
    /// Set when the fallback line stood in, with the reason.
    pub fallback: Option<String>,
}

/// Runs generation with a timeout and fallback.
#[derive(Clone)]
pub struct Injector {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl Injector {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn speak(&self, archetype: &Archetype, context: &PromptContext) -> Spoken {
        let result =
            match tokio::time::timeout(self.timeout, self.generator.generate(context)).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout(self.timeout)),
            };

        match result.and_then(|text| clean_line(&text).ok_or(GenerationError::Empty)) {
            Ok(text) => {
                debug!(npc = %archetype.id, chars = text.len(), "NPC line generated");
                Spoken {
                    text,
                    fallback: None,
                }
            }
            Err(err) => {
                warn!(
                    npc = %archetype.id,
                    error = %err,
                    transient = err.is_transient(),
                    "NPC generation failed, using fallback"
                );
                Spoken {
                    text: archetype.fallback_line.clone(),
                    fallback: Some(err.to_string()),
                }
            }
        }
    }
}

/// First non-empty paragraph, with wrapping quotes removed.
fn clean_line(text: &str) -> Option<String> {
    let paragraph = text
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())?;
    let unquoted = paragraph
        .strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .filter(|p| !p.contains('"'))
        .unwrap_or(paragraph);
    let line = unquoted.split_whitespace().collect::<Vec<_>>().join(" ");
    (!line.is_empty()).then_some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualTime;
    use crate::npc::archetype::wonderland_archetypes;
    use crate::npc::disposition::Dispositions;
    use crate::testing::{FailingVoice, ScriptedVoice, StalledVoice};
    use crate::topology::wonderland;
    use crate::trust::TrustLevel;
    use crate::world::{EntityKind, RoomId};

    fn fixture() -> (Archetype, Entity, Room) {
        let archetype = wonderland_archetypes()
            .get(&EntityId::new("mad-hatter"))
            .unwrap()
            .clone();
        let visitor = Entity::new(
            EntityId::new("alice"),
            "Alice",
            EntityKind::Daemon,
            RoomId::new("tea-party"),
            5,
        )
        .with_trust(TrustLevel::Resident);
        let room = wonderland().room(&RoomId::new("tea-party")).unwrap().clone();
        (archetype, visitor, room)
    }

    #[test]
    fn test_config_builders() {
        let config = NpcConfig::default()
            .with_timeout(Duration::from_millis(250))
            .with_memory_cap(2);
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.recall, 2);

        let forever = NpcConfig::default().with_timeout(Duration::MAX);
        assert_eq!(forever.timeout_ms, u64::MAX);
    }

    fn context(archetype: &Archetype, visitor: &Entity, room: &Room) -> PromptContext {
        compose_context(
            archetype,
            visitor,
            None,
            Disposition::Neutral,
            &Scene {
                room,
                phase: DayPhase::Dusk,
            },
            "Why is a raven like a writing desk?",
            &NpcConfig::default(),
        )
    }

    #[test]
    fn test_compose_context() {
        let (archetype, visitor, room) = fixture();
        let ctx = context(&archetype, &visitor, &room);
        assert!(ctx.system.starts_with("You are the Mad Hatter"));
        assert!(ctx.system.contains("It is dusk. Someone has moved down a place again."));
        assert!(ctx.system.contains("Alice, a resident"));
        assert!(!ctx.system.contains("remember"));
        assert_eq!(ctx.utterance, "Why is a raven like a writing desk?");
    }

    #[test]
    fn test_compose_includes_recent_memories_only() {
        let (archetype, visitor, room) = fixture();
        let mut dispositions = Dispositions::default();
        for i in 0..6 {
            dispositions.record(
                &archetype.id,
                &visitor.id,
                1,
                &format!("memory {}", i),
                VirtualTime(i),
            );
        }
        let ledger = dispositions.ledger(&archetype.id, &visitor.id);
        let ctx = compose_context(
            &archetype,
            &visitor,
            ledger,
            Disposition::Friendly,
            &Scene {
                room: &room,
                phase: DayPhase::Day,
            },
            "Hello",
            &NpcConfig::default(),
        );
        assert!(ctx.system.contains("- memory 5\n- memory 4"));
        assert!(!ctx.system.contains("memory 1"));
        assert!(ctx.system.contains("glad to see them"));
    }

    #[tokio::test]
    async fn test_speak_uses_generated_line() {
        let (archetype, visitor, room) = fixture();
        let voice = Arc::new(ScriptedVoice::new(vec!["\"Have some wine,\" he offers.\n\nmore"]));
        let injector = Injector::new(voice, Duration::from_secs(1));
        let spoken = injector.speak(&archetype, &context(&archetype, &visitor, &room)).await;
        assert_eq!(spoken.text, "\"Have some wine,\" he offers.");
        assert!(spoken.fallback.is_none());
    }

    #[tokio::test]
    async fn test_speak_falls_back_on_error() {
        let (archetype, visitor, room) = fixture();
        let injector = Injector::new(Arc::new(FailingVoice), Duration::from_secs(1));
        let spoken = injector.speak(&archetype, &context(&archetype, &visitor, &room)).await;
        assert_eq!(spoken.text, archetype.fallback_line);
        assert!(spoken.fallback.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speak_falls_back_on_timeout() {
        let (archetype, visitor, room) = fixture();
        let injector = Injector::new(Arc::new(StalledVoice), Duration::from_millis(50));
        let spoken = injector.speak(&archetype, &context(&archetype, &visitor, &room)).await;
        assert_eq!(spoken.text, archetype.fallback_line);
        assert!(spoken.fallback.unwrap().contains("timed out"));
    }

    #[test]
    fn test_clean_line() {
        assert_eq!(clean_line("  \"Off with it!\"  "), Some("Off with it!".into()));
        assert_eq!(clean_line("\n\n  \n"), None);
        assert_eq!(clean_line("one\n  two\n\nthree"), Some("one two".into()));
    }
}
