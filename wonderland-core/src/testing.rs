//! Testing utilities for Wonderland.
//!
//! This module provides tools for integration testing:
//! - Deterministic text generators (`ScriptedVoice`, `StalledVoice`, `FailingVoice`)
//! - `FlakyStorage` for exercising persistence failures
//! - `TestHarness` for scripted scenarios against an in-memory realm
//! - Assertion helpers for verifying world state

use crate::config::WorldConfig;
use crate::npc::{GenerationError, PromptContext, TextGenerator};
use crate::persist::{MemoryStorage, PersistError, Recovered, Snapshot, Storage};
use crate::realm::{Outcome, Realm, RealmBuilder, RealmError};
use crate::session::Session;
use crate::witness::WorldEvent;
use crate::world::{EntityId, EntityKind, RoomId};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

// ============================================================================
// Text Generators
// ============================================================================

/// A generator that returns scripted lines in order.
///
/// Use this for deterministic tests without API calls. Once the script runs
/// out, every call fails and the NPC falls back.
#[derive(Default)]
pub struct ScriptedVoice {
    lines: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<PromptContext>>,
}

impl ScriptedVoice {
    pub fn new<S: Into<String>>(lines: Vec<S>) -> Self {
        Self {
            lines: Mutex::new(lines.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue another line.
    pub async fn push(&self, line: impl Into<String>) {
        self.lines.lock().await.push_back(line.into());
    }

    /// Every context this generator was asked to speak from.
    pub async fn prompts(&self) -> Vec<PromptContext> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedVoice {
    async fn generate(&self, context: &PromptContext) -> Result<String, GenerationError> {
        self.prompts.lock().await.push(context.clone());
        self.lines
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| GenerationError::Unavailable("script exhausted".into()))
    }
}

/// A generator that never answers.
#[derive(Debug, Clone, Default)]
pub struct StalledVoice;

#[async_trait]
impl TextGenerator for StalledVoice {
    async fn generate(&self, _context: &PromptContext) -> Result<String, GenerationError> {
        std::future::pending().await
    }
}

/// A generator that always fails.
#[derive(Debug, Clone, Default)]
pub struct FailingVoice;

#[async_trait]
impl TextGenerator for FailingVoice {
    async fn generate(&self, _context: &PromptContext) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable("voice offline".into()))
    }
}

// ============================================================================
// Storage
// ============================================================================

/// In-memory storage whose appends can be made to fail on demand.
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    failing: AtomicBool,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following append fail (or succeed again).
    pub fn fail_appends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn append(&self, event: &WorldEvent) -> Result<(), PersistError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistError::Unavailable("the ink has run dry".into()));
        }
        self.inner.append(event).await
    }

    async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
        self.inner.write_snapshot(snapshot).await
    }

    async fn recover(&self) -> Result<Recovered, PersistError> {
        self.inner.recover().await
    }
}

// ============================================================================
// Test Harness
// ============================================================================

/// Test harness for running world scenarios.
pub struct TestHarness {
    /// The realm under test.
    pub realm: Arc<Realm>,
    /// The storage behind it.
    pub storage: Arc<FlakyStorage>,
}

impl TestHarness {
    /// Wonderland with default settings and silent NPCs.
    pub async fn new() -> Result<Self, RealmError> {
        Self::with_builder(RealmBuilder::new()).await
    }

    /// Wonderland with custom settings.
    pub async fn with_config(config: WorldConfig) -> Result<Self, RealmError> {
        Self::with_builder(RealmBuilder::new().with_config(config)).await
    }

    /// Any realm, backed by fresh flaky storage.
    pub async fn with_builder(builder: RealmBuilder) -> Result<Self, RealmError> {
        Self::reopen(builder, Arc::new(FlakyStorage::new())).await
    }

    /// Open a realm over existing storage, as a restart does.
    pub async fn reopen(
        builder: RealmBuilder,
        storage: Arc<FlakyStorage>,
    ) -> Result<Self, RealmError> {
        let realm = builder.with_storage(storage.clone()).open().await?;
        Ok(Self {
            realm: Arc::new(realm),
            storage,
        })
    }

    /// Join a visitor under a display name.
    pub async fn join(&self, name: &str) -> Result<Session, RealmError> {
        let (session, _) = Session::open(self.realm.clone(), name, EntityKind::Daemon).await?;
        Ok(session)
    }

    /// Send a line as the entity with this id.
    pub async fn send(&self, actor: &str, line: &str) -> Result<Outcome, RealmError> {
        self.realm.dispatch(&EntityId::new(actor), line).await
    }

    /// Every witnessed event, oldest first.
    pub async fn events(&self) -> Vec<WorldEvent> {
        self.realm.events(&Default::default()).await
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.realm.snapshot().await
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that an entity is in a room.
#[track_caller]
pub fn assert_in_room(snapshot: &Snapshot, entity: &str, room: &str) {
    let actual = snapshot.world.position(&EntityId::new(entity));
    assert_eq!(
        actual,
        Some(&RoomId::new(room)),
        "Expected '{entity}' in '{room}', found {actual:?}"
    );
}

/// Assert that a blocked or failed command left the world untouched.
/// Refusals still add to the log, so only the world is compared.
#[track_caller]
pub fn assert_unchanged(before: &Snapshot, after: &Snapshot) {
    assert_eq!(before.world, after.world, "Expected world state to be unchanged");
}

/// Assert an entity's inventory size.
#[track_caller]
pub fn assert_carrying(snapshot: &Snapshot, entity: &str, count: usize) {
    let actual = snapshot
        .world
        .entity(&EntityId::new(entity))
        .map(|e| e.inventory.len());
    assert_eq!(
        actual,
        Some(count),
        "Expected '{entity}' to carry {count} items, found {actual:?}"
    );
}
