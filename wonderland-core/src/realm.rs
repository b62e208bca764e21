//! The shared realm - the primary public API for a running world.
//!
//! A [`Realm`] owns the topology, the committed world state, the witness log
//! and the storage behind them, and is shared by every session. Each action
//! goes through one commit pipeline:
//!
//! 1. The rooms it touches are locked in sorted order. Per-room locks are
//!    fair, so actions in one room are applied in arrival order while
//!    actions in disjoint rooms queue independently.
//! 2. The vow engine judges it. A block is witnessed as a refusal and
//!    changes nothing else.
//! 3. The rules resolve it into effects, which are applied to a copy of
//!    the world.
//! 4. The event is appended to storage. Only once that succeeds does the
//!    copy replace the committed world, so a storage failure leaves the
//!    world exactly as it was.
//!
//! NPC speech is generated between commits with no locks held.

use crate::clock::{Clock, DayPhase, VirtualTime};
use crate::command::{self, Command, Meta, HELP};
use crate::config::{ConfigError, WorldConfig};
use crate::npc::{
    compose_context, wonderland_archetypes, Archetype, ArchetypeRegistry, Injector, PromptContext,
    Scene, Silent, TextGenerator,
};
use crate::persist::{MemoryStorage, PersistError, Snapshot, Storage};
use crate::rules::{apply_effects, resolve, Action, ActionKind, Intent, ResolveContext};
use crate::topology::{wonderland, Topology, TopologyError};
use crate::trust::TrustLevel;
use crate::vows::{classify, HarmCategory, Verdict, VowContext, VowEngine};
use crate::witness::{EventDraft, EventFilter, EventId, EventLog, EventRecord, WitnessError, WorldEvent};
use crate::world::{EntityId, EntityKind, RoomId, StoreError, WorldState};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest visitor remark kept in an NPC's memory.
const NOTE_CHARS: usize = 120;

/// Errors from realm operations. Everything a player can cause is an
/// [`Outcome`] instead; these are failures of the realm itself.
#[derive(Debug, Error)]
pub enum RealmError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistError),

    #[error("Witness error: {0}")]
    Witness(#[from] WitnessError),

    #[error("World state error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Cannot join as '{name}': {reason}")]
    NameUnavailable { name: String, reason: &'static str },

    #[error("Session cancelled")]
    Cancelled,
}

impl RealmError {
    /// Whether the same command may simply be sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RealmError::Persistence(_))
    }

    pub fn narrative(&self) -> String {
        match self {
            RealmError::Persistence(_) => {
                "The page will not take the ink. Nothing happened; try again in a moment."
                    .to_string()
            }
            RealmError::NameUnavailable { name, .. } if name.trim().is_empty() => {
                "Wonderland needs a name it can say aloud.".to_string()
            }
            RealmError::NameUnavailable { name, .. } => {
                format!("The name '{}' is already spoken for. Choose another.", name)
            }
            RealmError::Cancelled => "The story has been set down for now.".to_string(),
            _ => "Wonderland shudders and holds still. Nothing happened.".to_string(),
        }
    }
}

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Executed,
    /// Executed with an extra vow bonus.
    Augmented,
    /// Blocked by a vow. A refusal event was witnessed.
    Refused(HarmCategory),
    /// Impossible as stated: no exit, nobody by that name, a malformed command.
    Structural,
    /// Refused for trust or capacity.
    Denied,
    /// A read-only look at the world.
    Observed,
    /// The visitor asked to end the session.
    Quit,
}

/// What a visitor gets back for one command.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: Status,
    pub narrative: String,
    /// The last event this command produced, if any.
    pub event: Option<EventId>,
    pub now: VirtualTime,
    pub phase: DayPhase,
    /// Set when an NPC fell back to its canned line, with the reason.
    pub soft_failure: Option<String>,
}

impl Outcome {
    pub fn is_executed(&self) -> bool {
        matches!(self.status, Status::Executed | Status::Augmented)
    }

    pub fn is_refused(&self) -> bool {
        matches!(self.status, Status::Refused(_))
    }
}

/// State that changes only through a commit.
struct Committed {
    world: WorldState,
    log: EventLog,
    since_snapshot: u64,
}

/// One NPC exchange, composed under the read lock.
struct Exchange {
    archetype: Archetype,
    context: PromptContext,
    room: RoomId,
    visitor: EntityId,
    note: String,
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a realm and recovers it from storage.
pub struct RealmBuilder {
    config: WorldConfig,
    topology: Option<Topology>,
    archetypes: ArchetypeRegistry,
    storage: Option<Arc<dyn Storage>>,
    generator: Arc<dyn TextGenerator>,
}

impl Default for RealmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RealmBuilder {
    /// Wonderland with default settings, in-memory storage and silent NPCs.
    pub fn new() -> Self {
        Self {
            config: WorldConfig::default(),
            topology: None,
            archetypes: wonderland_archetypes(),
            storage: None,
            generator: Arc::new(Silent),
        }
    }

    pub fn with_config(mut self, config: WorldConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this room graph even if a snapshot recorded a different one.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn with_archetypes(mut self, archetypes: ArchetypeRegistry) -> Self {
        self.archetypes = archetypes;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Recover the world from storage (or create it) and bring every NPC in.
    pub async fn open(self) -> Result<Realm, RealmError> {
        self.config.validate()?;
        let config = self.config;
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));

        let recovered = storage.recover().await?;
        let tail_start = recovered.events.len() - recovered.tail().len();
        let snapshot = recovered.snapshot;
        let events = recovered.events;

        let topology = match (self.topology, snapshot.as_ref().and_then(|s| s.topology.clone())) {
            (Some(topology), _) => topology,
            (None, Some(def)) => Topology::from_def(def)?,
            (None, None) => wonderland(),
        };

        let restored = snapshot.is_some();
        let mut world = match snapshot {
            Some(snapshot) => snapshot.restore(&topology, &config),
            None => {
                let mut world = WorldState::new(&topology, Clock::new(&config.clock));
                world.dispositions.set_limits(config.npc.limits());
                world
            }
        };

        let replayed = events.len() - tail_start;
        for event in &events[tail_start..] {
            apply_effects(&mut world, event.effects())?;
        }
        let log = EventLog::from_events(events)?;

        info!(
            world = %world.world_id,
            restored,
            replayed,
            events = log.len(),
            entities = world.entities.len(),
            now = %world.clock.now(),
            "Realm recovered"
        );

        let rooms = topology
            .room_ids()
            .map(|id| (id.clone(), Mutex::new(())))
            .collect();
        let realm = Realm {
            instance: Uuid::new_v4(),
            vows: VowEngine::new(&config.trust),
            injector: Injector::new(self.generator, config.npc.timeout()),
            config,
            topology,
            archetypes: self.archetypes,
            storage,
            rooms,
            state: RwLock::new(Committed {
                world,
                log,
                since_snapshot: replayed as u64,
            }),
        };

        realm.summon_hosts().await?;
        realm.checkpoint().await?;
        Ok(realm)
    }
}

// ============================================================================
// Realm
// ============================================================================

/// A running world shared by every session.
pub struct Realm {
    instance: Uuid,
    config: WorldConfig,
    topology: Topology,
    archetypes: ArchetypeRegistry,
    vows: VowEngine,
    injector: Injector,
    storage: Arc<dyn Storage>,
    rooms: BTreeMap<RoomId, Mutex<()>>,
    state: RwLock<Committed>,
}

impl Realm {
    pub fn builder() -> RealmBuilder {
        RealmBuilder::new()
    }

    /// Id of this running instance, distinct from the persistent world id.
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn archetypes(&self) -> &ArchetypeRegistry {
        &self.archetypes
    }

    /// Parse and carry out one line from a visitor.
    pub async fn dispatch(&self, actor: &EntityId, line: &str) -> Result<Outcome, RealmError> {
        match command::parse(line) {
            Ok(Command::Act(intent)) => self.act(Action::new(actor.clone(), intent)).await,
            Ok(Command::Meta(meta)) => Ok(self.observe(actor, meta).await),
            Err(err) => {
                debug!(actor = %actor, error = %err, "Unparsed command");
                Ok(self.narrate(Status::Structural, err.narrative()).await)
            }
        }
    }

    /// Bring a visitor into the world, or reattach to one already here.
    ///
    /// Hosts are summoned by the realm and cannot be joined. A visitor only
    /// reattaches to an entity of the same kind.
    pub async fn join(
        &self,
        id: &EntityId,
        name: &str,
        kind: EntityKind,
    ) -> Result<Outcome, RealmError> {
        let unavailable = |reason| RealmError::NameUnavailable {
            name: name.to_string(),
            reason,
        };
        if id.as_str().is_empty() {
            return Err(unavailable("the name has no letters or digits"));
        }
        if kind == EntityKind::Npc || self.archetypes.get(id).is_some() {
            return Err(unavailable("hosts are summoned, not joined"));
        }
        let existing = {
            let state = self.state.read().await;
            state.world.entity(id).map(|entity| entity.kind)
        };
        match existing {
            Some(found) if found == kind => {
                debug!(entity = %id, "Visitor reattached");
                return Ok(self.observe(id, Meta::Look).await);
            }
            Some(found) => {
                debug!(entity = %id, held_by = found.name(), "Join refused, id in use");
                return Err(unavailable("another kind of visitor holds it"));
            }
            None => {}
        }
        self.act(Action::new(
            id.clone(),
            Intent::Arrive {
                name: name.to_string(),
                kind,
            },
        ))
        .await
    }

    /// Carry out an action. Greetings and questions to hosts get an answer.
    pub async fn act(&self, action: Action) -> Result<Outcome, RealmError> {
        match &action.intent {
            Intent::Greet { .. } | Intent::Ask { .. } => self.converse(action).await,
            _ => self.perform(action).await,
        }
    }

    /// Run one action through the commit pipeline.
    pub async fn perform(&self, action: Action) -> Result<Outcome, RealmError> {
        loop {
            let touched = {
                let state = self.state.read().await;
                self.rooms_touched(&state.world, &action)
            };
            let _guards = self.lock_rooms(&touched).await;
            let mut state = self.state.write().await;
            if self.rooms_touched(&state.world, &action) != touched {
                // The actor moved while this action waited.
                continue;
            }
            return self.commit(&mut state, &action).await;
        }
    }

    async fn commit(&self, state: &mut Committed, action: &Action) -> Result<Outcome, RealmError> {
        let kind = action.kind();
        let (trust, room) = match state.world.entity(&action.actor) {
            Some(entity) => (entity.trust, entity.room.clone()),
            None => match &action.intent {
                Intent::Arrive { kind, .. } => (
                    self.arrival_trust(&action.actor),
                    self.arrival_room(&action.actor, *kind),
                ),
                _ => {
                    let err = StoreError::UnknownEntity(action.actor.clone());
                    return Ok(outcome(&state.world, Status::Structural, err.narrative()));
                }
            },
        };

        let context = VowContext {
            trust,
            vows: self.topology.vows(&room),
        };
        let verdict = match self.vows.judge(action, context) {
            Ok(verdict) => verdict,
            Err(err) => {
                debug!(actor = %action.actor, action = %kind, error = %err, "Action denied");
                return Ok(outcome(&state.world, Status::Denied, err.narrative()));
            }
        };

        if let Verdict::Block(refusal) = verdict {
            info!(
                actor = %action.actor,
                room = %room,
                category = %refusal.category,
                score = refusal.score,
                threshold = refusal.threshold,
                "Action refused"
            );
            let draft = EventDraft {
                at: state.world.clock.now(),
                actor: action.actor.clone(),
                room,
                action: kind,
                payload: action.intent.payload(),
                record: EventRecord::Refused {
                    category: refusal.category,
                    narrative: refusal.narrative.clone(),
                },
            };
            let id = self.witness(state, draft, None).await?;
            let mut refused = outcome(
                &state.world,
                Status::Refused(refusal.category),
                refusal.narrative,
            );
            refused.event = Some(id);
            return Ok(refused);
        }

        let resolve_ctx = ResolveContext {
            topology: &self.topology,
            archetypes: &self.archetypes,
            config: &self.config,
        };
        let resolution = match resolve(&state.world, &resolve_ctx, action, &verdict) {
            Ok(resolution) => resolution,
            Err(rejection) => {
                let status = if rejection.is_denial() {
                    Status::Denied
                } else {
                    Status::Structural
                };
                debug!(actor = %action.actor, action = %kind, error = %rejection, "Action rejected");
                return Ok(outcome(&state.world, status, rejection.narrative()));
            }
        };

        let mut next = state.world.clone();
        apply_effects(&mut next, &resolution.effects)?;
        let status = if resolution.enhanced_insight {
            Status::Augmented
        } else {
            Status::Executed
        };
        let draft = EventDraft {
            at: next.clock.now(),
            actor: action.actor.clone(),
            room,
            action: kind,
            payload: action.intent.payload(),
            record: EventRecord::Executed {
                effects: resolution.effects,
                enhanced_insight: resolution.enhanced_insight,
            },
        };
        let id = self.witness(state, draft, Some(next)).await?;
        debug!(actor = %action.actor, action = %kind, event = %id, "Action committed");

        let mut done = outcome(&state.world, status, resolution.narrative);
        done.event = Some(id);
        Ok(done)
    }

    /// Persist an event, then record it and install the new world.
    async fn witness(
        &self,
        state: &mut Committed,
        draft: EventDraft,
        next: Option<WorldState>,
    ) -> Result<EventId, RealmError> {
        let event = state.log.stamp(draft);
        if let Err(err) = self.storage.append(&event).await {
            warn!(event = %event.id, error = %err, "Event not persisted, action abandoned");
            return Err(err.into());
        }
        let id = state.log.append(event)?;
        if let Some(world) = next {
            state.world = world;
        }

        state.since_snapshot += 1;
        if self.config.snapshot_every > 0 && state.since_snapshot >= self.config.snapshot_every {
            if let Err(err) = self.write_snapshot(state).await {
                warn!(error = %err, "Periodic snapshot failed, the log still holds every event");
            }
        }
        Ok(id)
    }

    async fn write_snapshot(&self, state: &mut Committed) -> Result<Option<EventId>, PersistError> {
        let snapshot =
            Snapshot::new(state.world.clone(), state.log.last_id()).with_topology(&self.topology);
        self.storage.write_snapshot(&snapshot).await?;
        state.since_snapshot = 0;
        Ok(snapshot.last_event)
    }

    /// Write a snapshot now. Returns the last event it includes.
    pub async fn checkpoint(&self) -> Result<Option<EventId>, RealmError> {
        let mut state = self.state.write().await;
        Ok(self.write_snapshot(&mut state).await?)
    }

    // ========================================================================
    // Hosts
    // ========================================================================

    /// Arrive every archetype that is not already in the world.
    async fn summon_hosts(&self) -> Result<(), RealmError> {
        let archetypes: Vec<Archetype> = self.archetypes.iter().cloned().collect();
        for archetype in archetypes {
            if self.position(&archetype.id).await.is_some() {
                continue;
            }
            let arrival = self
                .perform(Action::new(
                    archetype.id.clone(),
                    Intent::Arrive {
                        name: archetype.name.clone(),
                        kind: EntityKind::Npc,
                    },
                ))
                .await?;
            if arrival.is_executed() {
                debug!(npc = %archetype.id, home = %archetype.home, "Host arrived");
            } else {
                warn!(npc = %archetype.id, reason = %arrival.narrative, "Host could not arrive");
            }
        }
        Ok(())
    }

    /// Greet or ask a host, then let the host answer.
    async fn converse(&self, action: Action) -> Result<Outcome, RealmError> {
        let (target, utterance) = match &action.intent {
            Intent::Greet { target } => (target.clone(), None),
            Intent::Ask { target, text } => (target.clone(), Some(text.clone())),
            _ => return self.perform(action).await,
        };

        let opening = self.perform(action.clone()).await?;
        if !opening.is_executed() {
            return Ok(opening);
        }
        let Some(exchange) = self
            .compose(&action.actor, &target, utterance.as_deref())
            .await
        else {
            return Ok(opening);
        };

        let spoken = self.injector.speak(&exchange.archetype, &exchange.context).await;

        let mut soft_failure = None;
        if let Some(reason) = &spoken.fallback {
            self.record_soft_failure(&exchange, reason, &spoken.text)
                .await?;
            soft_failure = Some(reason.clone());
        }

        let delta = match &utterance {
            Some(text) if !classify(text).is_clean() => -self.config.npc.displeasure,
            _ => self.config.npc.approval,
        };
        let reply_with = |text: String| {
            Action::new(
                exchange.archetype.id.clone(),
                Intent::Reply {
                    visitor: exchange.visitor.clone(),
                    prompt: exchange.note.clone(),
                    text,
                    delta,
                },
            )
        };

        let mut reply = self.perform(reply_with(spoken.text.clone())).await?;
        if reply.is_refused() && spoken.fallback.is_none() {
            info!(npc = %exchange.archetype.id, "Host line refused, using fallback");
            reply = self
                .perform(reply_with(exchange.archetype.fallback_line.clone()))
                .await?;
        }

        let mut combined = opening;
        if reply.is_executed() {
            combined.narrative.push('\n');
            combined.narrative.push_str(&reply.narrative);
            combined.event = reply.event;
        } else {
            debug!(npc = %exchange.archetype.id, reason = %reply.narrative, "Host reply not delivered");
        }
        combined.now = reply.now;
        combined.phase = reply.phase;
        combined.soft_failure = soft_failure;
        Ok(combined)
    }

    async fn compose(
        &self,
        visitor: &EntityId,
        target: &str,
        utterance: Option<&str>,
    ) -> Option<Exchange> {
        let state = self.state.read().await;
        let world = &state.world;
        let guest = world.entity(visitor)?;
        let host = world.find_in_room(&guest.room, target)?;
        if host.kind != EntityKind::Npc {
            return None;
        }
        let archetype = self.archetypes.get(&host.id)?.clone();
        let room = self.topology.room(&guest.room)?;

        let (prompt, note) = match utterance {
            Some(text) => (
                text.to_string(),
                format!("{} asked: {}", guest.name, text),
            ),
            None => (
                format!("{} greets you.", guest.name),
                format!("{} greeted you", guest.name),
            ),
        };
        let context = compose_context(
            &archetype,
            guest,
            world.dispositions.ledger(&host.id, &guest.id),
            world.dispositions.disposition(&host.id, &guest.id),
            &Scene {
                room,
                phase: world.clock.current_phase(),
            },
            &prompt,
            &self.config.npc,
        );
        Some(Exchange {
            archetype,
            context,
            room: guest.room.clone(),
            visitor: guest.id.clone(),
            note: note.chars().take(NOTE_CHARS).collect(),
        })
    }

    async fn record_soft_failure(
        &self,
        exchange: &Exchange,
        reason: &str,
        fallback: &str,
    ) -> Result<EventId, RealmError> {
        let rooms = BTreeSet::from([exchange.room.clone()]);
        let _guards = self.lock_rooms(&rooms).await;
        let mut state = self.state.write().await;
        let draft = EventDraft {
            at: state.world.clock.now(),
            actor: exchange.archetype.id.clone(),
            room: exchange.room.clone(),
            action: ActionKind::Say,
            payload: format!("to {}", exchange.visitor),
            record: EventRecord::SoftFailure {
                reason: reason.to_string(),
                fallback: fallback.to_string(),
            },
        };
        self.witness(&mut state, draft, None).await
    }

    // ========================================================================
    // Locking
    // ========================================================================

    fn arrival_room(&self, id: &EntityId, kind: EntityKind) -> RoomId {
        match self.archetypes.get(id) {
            Some(archetype) if kind == EntityKind::Npc => archetype.home.clone(),
            _ => self.topology.spawn().clone(),
        }
    }

    fn arrival_trust(&self, id: &EntityId) -> TrustLevel {
        if self.config.founders.contains(id) {
            TrustLevel::Founder
        } else {
            TrustLevel::Newcomer
        }
    }

    /// Rooms an action could change.
    fn rooms_touched(&self, world: &WorldState, action: &Action) -> BTreeSet<RoomId> {
        let mut rooms = BTreeSet::new();
        match world.position(&action.actor) {
            Some(here) => {
                rooms.insert(here.clone());
                match &action.intent {
                    Intent::Move { direction } => {
                        if let Ok(to) = self.topology.resolve_exit(here, *direction) {
                            rooms.insert(to);
                        }
                    }
                    Intent::Teleport { destination } => {
                        if let Some(room) = self.topology.lookup(destination) {
                            rooms.insert(room.id.clone());
                        }
                    }
                    _ => {}
                }
            }
            None => {
                if let Intent::Arrive { kind, .. } = &action.intent {
                    rooms.insert(self.arrival_room(&action.actor, *kind));
                }
            }
        }
        rooms
    }

    /// Lock rooms in id order so two actions can never wait on each other.
    async fn lock_rooms(&self, rooms: &BTreeSet<RoomId>) -> Vec<MutexGuard<'_, ()>> {
        let mut guards = Vec::with_capacity(rooms.len());
        for room in rooms {
            if let Some(lock) = self.rooms.get(room) {
                guards.push(lock.lock().await);
            }
        }
        guards
    }

    // ========================================================================
    // Read-only views
    // ========================================================================

    async fn narrate(&self, status: Status, narrative: String) -> Outcome {
        let state = self.state.read().await;
        outcome(&state.world, status, narrative)
    }

    /// Answer a meta command. Never witnessed, never moves the clock.
    pub async fn observe(&self, actor: &EntityId, meta: Meta) -> Outcome {
        let state = self.state.read().await;
        let world = &state.world;
        let (status, narrative) = match meta {
            Meta::Help => (Status::Observed, HELP.to_string()),
            Meta::Quit => (
                Status::Quit,
                "You close the book for now. Wonderland keeps your place.".to_string(),
            ),
            Meta::Time => (
                Status::Observed,
                format!(
                    "It is {} on day {} (t={}).",
                    world.clock.current_phase(),
                    world.clock.day(),
                    world.clock.now()
                ),
            ),
            _ => match world.entity(actor) {
                None => (
                    Status::Structural,
                    StoreError::UnknownEntity(actor.clone()).narrative(),
                ),
                Some(me) => (Status::Observed, self.view(&state, me.id.clone(), &me.room, meta)),
            },
        };
        outcome(world, status, narrative)
    }

    fn view(&self, state: &Committed, me: EntityId, room: &RoomId, meta: Meta) -> String {
        let world = &state.world;
        match meta {
            Meta::Look => {
                let mut text = match self.topology.describe_with(
                    room,
                    world.clock.current_phase(),
                    world.clock.now().ticks(),
                ) {
                    Ok(text) => text,
                    Err(err) => return err.narrative(),
                };
                let others: Vec<&str> = world
                    .entities_in(room)
                    .filter(|e| e.id != me)
                    .map(|e| e.name.as_str())
                    .collect();
                if !others.is_empty() {
                    text.push_str(&format!("\nAlso here: {}.", others.join(", ")));
                }
                let decorations: Vec<&str> = world
                    .decorations(room)
                    .iter()
                    .map(|item| item.name.as_str())
                    .collect();
                if !decorations.is_empty() {
                    text.push_str(&format!(
                        "\nLeft here for everyone: {}.",
                        decorations.join(", ")
                    ));
                }
                text
            }
            Meta::Exits => match self.topology.room(room) {
                Some(r) => format!("Exits: {}.", r.exit_list()),
                None => StoreError::UnknownRoom(room.clone()).narrative(),
            },
            Meta::Inventory => match world.entity(&me) {
                Some(entity) if entity.inventory.is_empty() => format!(
                    "You carry nothing. (0/{}) Insight: {}.",
                    entity.inventory.cap(),
                    entity.insights
                ),
                Some(entity) => {
                    let names: Vec<&str> = entity
                        .inventory
                        .items()
                        .iter()
                        .map(|item| item.name.as_str())
                        .collect();
                    format!(
                        "You carry: {}. ({}/{}) Insight: {}.",
                        names.join(", "),
                        entity.inventory.len(),
                        entity.inventory.cap(),
                        entity.insights
                    )
                }
                None => StoreError::UnknownEntity(me).narrative(),
            },
            Meta::Who => {
                let lines: Vec<String> = world
                    .entities_in(room)
                    .map(|e| match e.kind {
                        EntityKind::Npc => format!("{} (host)", e.name),
                        _ => format!("{} ({})", e.name, e.trust),
                    })
                    .collect();
                lines.join("\n")
            }
            Meta::Witness(n) => {
                let filter = EventFilter::new().room(room.clone());
                let matching: Vec<&WorldEvent> = state.log.query(&filter).collect();
                let shown = &matching[matching.len().saturating_sub(n)..];
                if shown.is_empty() {
                    "Nothing here has been witnessed yet.".to_string()
                } else {
                    shown
                        .iter()
                        .map(|e| e.summary())
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            Meta::Help | Meta::Quit | Meta::Time => String::new(),
        }
    }

    /// Events matching a filter, oldest first. For reporting tools.
    pub async fn events(&self, filter: &EventFilter) -> Vec<WorldEvent> {
        let state = self.state.read().await;
        state.log.query(filter).cloned().collect()
    }

    pub async fn event_count(&self) -> usize {
        self.state.read().await.log.len()
    }

    /// The committed world in durable form. Nothing is written.
    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.read().await;
        Snapshot::new(state.world.clone(), state.log.last_id()).with_topology(&self.topology)
    }

    pub async fn current_level(&self, id: &EntityId) -> Option<TrustLevel> {
        self.state.read().await.world.current_level(id)
    }

    pub async fn position(&self, id: &EntityId) -> Option<RoomId> {
        self.state.read().await.world.position(id).cloned()
    }

    pub async fn now(&self) -> VirtualTime {
        self.state.read().await.world.clock.now()
    }

    pub async fn phase(&self) -> DayPhase {
        self.state.read().await.world.clock.current_phase()
    }
}

fn outcome(world: &WorldState, status: Status, narrative: String) -> Outcome {
    Outcome {
        status,
        narrative,
        event: None,
        now: world.clock.now(),
        phase: world.clock.current_phase(),
        soft_failure: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyStorage, ScriptedVoice};

    async fn realm() -> Realm {
        Realm::builder().open().await.unwrap()
    }

    fn alice() -> EntityId {
        EntityId::new("alice")
    }

    #[tokio::test]
    async fn test_open_summons_hosts() {
        let realm = realm().await;
        assert_eq!(
            realm.position(&EntityId::new("mad-hatter")).await,
            Some(RoomId::new("tea-party"))
        );
        assert_eq!(realm.event_count().await, 4);
    }

    #[tokio::test]
    async fn test_join_then_reattach() {
        let realm = realm().await;
        let first = realm.join(&alice(), "Alice", EntityKind::Daemon).await.unwrap();
        assert_eq!(first.status, Status::Executed);
        assert!(first.narrative.starts_with("The Riverbank"));
        let again = realm.join(&alice(), "Alice", EntityKind::Daemon).await.unwrap();
        assert_eq!(again.status, Status::Observed);
        assert_eq!(realm.event_count().await, 5);
    }

    #[tokio::test]
    async fn test_join_refuses_taken_or_empty_names() {
        let realm = realm().await;
        realm.join(&alice(), "Alice", EntityKind::Daemon).await.unwrap();

        let hatter = EntityId::new("mad-hatter");
        for kind in [EntityKind::Daemon, EntityKind::Custodian, EntityKind::Npc] {
            let err = realm.join(&hatter, "Mad Hatter", kind).await.unwrap_err();
            assert!(matches!(err, RealmError::NameUnavailable { .. }));
        }
        let err = realm
            .join(&alice(), "Alice", EntityKind::Custodian)
            .await
            .unwrap_err();
        assert!(err.narrative().contains("spoken for"));
        let err = realm
            .join(&EntityId::from_name("!!!"), "!!!", EntityKind::Daemon)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());

        assert_eq!(realm.position(&hatter).await, Some(RoomId::new("tea-party")));
        assert_eq!(realm.event_count().await, 5);
    }

    #[tokio::test]
    async fn test_meta_commands_leave_no_trace() {
        let realm = realm().await;
        realm.join(&alice(), "Alice", EntityKind::Daemon).await.unwrap();
        let before = realm.snapshot().await;
        for line in ["look", "exits", "i", "who", "time", "help", "witness 3"] {
            let outcome = realm.dispatch(&alice(), line).await.unwrap();
            assert_eq!(outcome.status, Status::Observed, "{}", line);
            assert!(outcome.event.is_none());
        }
        let after = realm.snapshot().await;
        assert_eq!(before.world, after.world);
        assert_eq!(before.last_event, after.last_event);
    }

    #[tokio::test]
    async fn test_unparsed_line_is_structural() {
        let realm = realm().await;
        let outcome = realm.dispatch(&alice(), "juggle flamingos").await.unwrap();
        assert_eq!(outcome.status, Status::Structural);
        assert!(outcome.narrative.contains("help"));
    }

    #[tokio::test]
    async fn test_unknown_actor_is_structural() {
        let realm = realm().await;
        let outcome = realm.dispatch(&alice(), "north").await.unwrap();
        assert_eq!(outcome.status, Status::Structural);
        assert_eq!(realm.event_count().await, 4);
    }

    #[tokio::test]
    async fn test_trust_gate_is_a_denial() {
        let realm = realm().await;
        realm.join(&alice(), "Alice", EntityKind::Daemon).await.unwrap();
        let outcome = realm.dispatch(&alice(), "build a kite").await.unwrap();
        assert_eq!(outcome.status, Status::Denied);
        assert!(outcome.event.is_none());
    }

    #[tokio::test]
    async fn test_periodic_snapshot() {
        let storage = Arc::new(FlakyStorage::new());
        let realm = Realm::builder()
            .with_config(WorldConfig::default().with_snapshot_every(2))
            .with_storage(storage.clone())
            .open()
            .await
            .unwrap();
        realm.join(&alice(), "Alice", EntityKind::Daemon).await.unwrap();
        realm.dispatch(&alice(), "say hello").await.unwrap();
        let snapshot = storage.inner().snapshot().await.unwrap();
        assert_eq!(snapshot.last_event, Some(EventId(6)));
    }

    #[tokio::test]
    async fn test_greeting_a_host_gets_an_answer() {
        let voice = Arc::new(ScriptedVoice::new(vec!["You're late! Or early. Sit down."]));
        let realm = Realm::builder()
            .with_generator(voice.clone())
            .open()
            .await
            .unwrap();
        realm.join(&alice(), "Alice", EntityKind::Daemon).await.unwrap();
        realm.dispatch(&alice(), "east").await.unwrap();
        realm.dispatch(&alice(), "east").await.unwrap();

        let outcome = realm.dispatch(&alice(), "greet hatter").await.unwrap();
        assert_eq!(outcome.status, Status::Executed);
        assert!(outcome.narrative.contains("You greet the Mad Hatter."));
        assert!(outcome.narrative.contains("Sit down."));
        assert!(outcome.soft_failure.is_none());

        let snapshot = realm.snapshot().await;
        let ledger = snapshot
            .world
            .dispositions
            .ledger(&EntityId::new("mad-hatter"), &alice())
            .unwrap();
        assert_eq!(ledger.score, 2);
        assert_eq!(ledger.recent(1).next().unwrap().note, "Alice greeted you");
        assert_eq!(voice.prompts().await.len(), 1);
    }
}
