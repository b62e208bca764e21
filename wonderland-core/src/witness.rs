//! The witness: an append-only log of everything that happens.
//!
//! Executed actions, refusals and soft failures are all recorded. Events
//! are immutable once appended; ids and virtual times never go backwards.

use crate::clock::VirtualTime;
use crate::rules::{ActionKind, Effect};
use crate::vows::HarmCategory;
use crate::world::{EntityId, RoomId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Sequence number of an event. The first event is 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What became of the action an event describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventRecord {
    Executed {
        effects: Vec<Effect>,
        #[serde(default)]
        enhanced_insight: bool,
    },
    Refused {
        category: HarmCategory,
        narrative: String,
    },
    /// An NPC could not produce a line and fell back to its canned one.
    SoftFailure { reason: String, fallback: String },
}

/// An event before the log has numbered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub at: VirtualTime,
    pub actor: EntityId,
    pub room: RoomId,
    pub action: ActionKind,
    pub payload: String,
    pub record: EventRecord,
}

/// A witnessed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldEvent {
    pub id: EventId,
    pub at: VirtualTime,
    pub actor: EntityId,
    pub room: RoomId,
    pub action: ActionKind,
    pub payload: String,
    pub record: EventRecord,
}

impl WorldEvent {
    pub fn is_refusal(&self) -> bool {
        matches!(self.record, EventRecord::Refused { .. })
    }

    pub fn is_soft_failure(&self) -> bool {
        matches!(self.record, EventRecord::SoftFailure { .. })
    }

    pub fn effects(&self) -> &[Effect] {
        match &self.record {
            EventRecord::Executed { effects, .. } => effects,
            _ => &[],
        }
    }

    pub fn enhanced_insight(&self) -> bool {
        matches!(
            self.record,
            EventRecord::Executed {
                enhanced_insight: true,
                ..
            }
        )
    }

    /// One-line summary for the `witness` command.
    pub fn summary(&self) -> String {
        let outcome = match &self.record {
            EventRecord::Executed {
                enhanced_insight: true,
                ..
            } => "executed, enhanced".to_string(),
            EventRecord::Executed { .. } => "executed".to_string(),
            EventRecord::Refused { category, .. } => format!("refused ({})", category),
            EventRecord::SoftFailure { reason, .. } => format!("soft failure: {}", reason),
        };
        if self.payload.is_empty() {
            format!(
                "{} t={} {} {} in {}: {}",
                self.id, self.at, self.actor, self.action, self.room, outcome
            )
        } else {
            format!(
                "{} t={} {} {} \"{}\" in {}: {}",
                self.id, self.at, self.actor, self.action, self.payload, self.room, outcome
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WitnessError {
    #[error("event {got} out of sequence, expected {expected}")]
    OutOfSequence { expected: EventId, got: EventId },

    #[error("event {id} at {at} predates the last recorded time {last}")]
    TimeRegression {
        id: EventId,
        at: VirtualTime,
        last: VirtualTime,
    },
}

/// Filter for [`EventLog::query`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub room: Option<RoomId>,
    pub actor: Option<EntityId>,
    pub from: Option<VirtualTime>,
    pub until: Option<VirtualTime>,
    pub refusals_only: bool,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room(mut self, room: RoomId) -> Self {
        self.room = Some(room);
        self
    }

    pub fn actor(mut self, actor: EntityId) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Inclusive lower time bound.
    pub fn from(mut self, at: VirtualTime) -> Self {
        self.from = Some(at);
        self
    }

    /// Inclusive upper time bound.
    pub fn until(mut self, at: VirtualTime) -> Self {
        self.until = Some(at);
        self
    }

    pub fn refusals_only(mut self) -> Self {
        self.refusals_only = true;
        self
    }

    pub fn matches(&self, event: &WorldEvent) -> bool {
        self.room.as_ref().map_or(true, |r| &event.room == r)
            && self.actor.as_ref().map_or(true, |a| &event.actor == a)
            && self.from.map_or(true, |t| event.at >= t)
            && self.until.map_or(true, |t| event.at <= t)
            && (!self.refusals_only || event.is_refusal())
    }
}

/// The in-memory log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLog {
    events: Vec<WorldEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from recovered events, checking order.
    pub fn from_events(events: Vec<WorldEvent>) -> Result<Self, WitnessError> {
        let mut log = Self::new();
        for event in events {
            log.append(event)?;
        }
        Ok(log)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last_id(&self) -> Option<EventId> {
        self.events.last().map(|e| e.id)
    }

    pub fn next_id(&self) -> EventId {
        EventId(self.last_id().map_or(1, |id| id.0 + 1))
    }

    pub fn get(&self, id: EventId) -> Option<&WorldEvent> {
        let index = id.0.checked_sub(1)? as usize;
        self.events.get(index).filter(|e| e.id == id)
    }

    /// Number the draft as the next event without recording it.
    pub fn stamp(&self, draft: EventDraft) -> WorldEvent {
        WorldEvent {
            id: self.next_id(),
            at: draft.at,
            actor: draft.actor,
            room: draft.room,
            action: draft.action,
            payload: draft.payload,
            record: draft.record,
        }
    }

    /// Append a stamped event.
    pub fn append(&mut self, event: WorldEvent) -> Result<EventId, WitnessError> {
        let expected = self.next_id();
        if event.id != expected {
            return Err(WitnessError::OutOfSequence {
                expected,
                got: event.id,
            });
        }
        if let Some(last) = self.events.last() {
            if event.at < last.at {
                return Err(WitnessError::TimeRegression {
                    id: event.id,
                    at: event.at,
                    last: last.at,
                });
            }
        }
        let id = event.id;
        self.events.push(event);
        Ok(id)
    }

    /// Stamp and append in one step.
    pub fn record(&mut self, draft: EventDraft) -> Result<EventId, WitnessError> {
        let event = self.stamp(draft);
        self.append(event)
    }

    /// Matching events in order. Time bounds narrow the scan by binary
    /// search since events are ordered by time.
    pub fn query<'a>(&'a self, filter: &'a EventFilter) -> impl Iterator<Item = &'a WorldEvent> + 'a {
        let start = filter
            .from
            .map_or(0, |from| self.events.partition_point(|e| e.at < from));
        let end = filter.until.map_or(self.events.len(), |until| {
            self.events.partition_point(|e| e.at <= until)
        });
        let end = end.max(start);
        self.events[start..end]
            .iter()
            .filter(move |e| filter.matches(e))
    }

    /// Events recorded after `id`.
    pub fn since(&self, id: Option<EventId>) -> &[WorldEvent] {
        let skip = id.map_or(0, |id| id.0 as usize).min(self.events.len());
        &self.events[skip..]
    }

    /// The most recent `n` events, oldest first.
    pub fn tail(&self, n: usize) -> &[WorldEvent] {
        &self.events[self.events.len().saturating_sub(n)..]
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorldEvent> {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(at: u64, actor: &str, room: &str, record: EventRecord) -> EventDraft {
        EventDraft {
            at: VirtualTime(at),
            actor: EntityId::new(actor),
            room: RoomId::new(room),
            action: ActionKind::Say,
            payload: "hello".into(),
            record,
        }
    }

    fn executed() -> EventRecord {
        EventRecord::Executed {
            effects: vec![],
            enhanced_insight: false,
        }
    }

    fn sample_log() -> EventLog {
        let mut log = EventLog::new();
        log.record(draft(10, "alice", "garden", executed())).unwrap();
        log.record(draft(20, "dodo", "garden", executed())).unwrap();
        log.record(draft(
            20,
            "alice",
            "tea-party",
            EventRecord::Refused {
                category: HarmCategory::Verbal,
                narrative: "hush".into(),
            },
        ))
        .unwrap();
        log.record(draft(35, "alice", "tea-party", executed())).unwrap();
        log
    }

    #[test]
    fn test_ids_are_sequential() {
        let log = sample_log();
        let ids: Vec<u64> = log.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(log.next_id(), EventId(5));
        assert_eq!(log.get(EventId(3)).unwrap().actor.as_str(), "alice");
        assert!(log.get(EventId(0)).is_none());
    }

    #[test]
    fn test_out_of_sequence_rejected() {
        let mut log = sample_log();
        let mut event = log.stamp(draft(40, "alice", "garden", executed()));
        event.id = EventId(9);
        assert!(matches!(
            log.append(event),
            Err(WitnessError::OutOfSequence { .. })
        ));
    }

    #[test]
    fn test_time_regression_rejected() {
        let mut log = sample_log();
        let err = log.record(draft(5, "alice", "garden", executed())).unwrap_err();
        assert!(matches!(err, WitnessError::TimeRegression { .. }));
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_query_by_room_and_actor() {
        let log = sample_log();
        let filter = EventFilter::new().room(RoomId::new("garden"));
        assert_eq!(log.query(&filter).count(), 2);

        let filter = EventFilter::new()
            .actor(EntityId::new("alice"))
            .room(RoomId::new("tea-party"));
        assert_eq!(log.query(&filter).count(), 2);
    }

    #[test]
    fn test_query_time_range_inclusive() {
        let log = sample_log();
        let filter = EventFilter::new().from(VirtualTime(20)).until(VirtualTime(20));
        let ids: Vec<u64> = log.query(&filter).map(|e| e.id.0).collect();
        assert_eq!(ids, vec![2, 3]);

        let filter = EventFilter::new().from(VirtualTime(36));
        assert_eq!(log.query(&filter).count(), 0);

        let filter = EventFilter::new().from(VirtualTime(30)).until(VirtualTime(10));
        assert_eq!(log.query(&filter).count(), 0);
    }

    #[test]
    fn test_refusals_are_witnessed() {
        let log = sample_log();
        let filter = EventFilter::new().refusals_only();
        let refused: Vec<&WorldEvent> = log.query(&filter).collect();
        assert_eq!(refused.len(), 1);
        assert!(refused[0].summary().contains("refused (verbal)"));
    }

    #[test]
    fn test_since_and_tail() {
        let log = sample_log();
        assert_eq!(log.since(None).len(), 4);
        assert_eq!(log.since(Some(EventId(3))).len(), 1);
        assert_eq!(log.since(Some(EventId(99))).len(), 0);
        assert_eq!(log.tail(2)[0].id, EventId(3));
        assert_eq!(log.tail(10).len(), 4);
    }

    #[test]
    fn test_event_json_shape() {
        let log = sample_log();
        let json = serde_json::to_string(log.get(EventId(3)).unwrap()).unwrap();
        assert!(json.contains("\"outcome\":\"refused\""));
        let back: WorldEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, log.get(EventId(3)).unwrap());
    }
}
