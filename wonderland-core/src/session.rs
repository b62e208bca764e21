//! Sessions: one visitor's connection to a shared realm.
//!
//! Human clients and autonomous explorers use the same handle. A session
//! can be cancelled from anywhere through its [`CancelHandle`]; the flag is
//! checked before each command is dispatched, so a command already in
//! flight always finishes.

use crate::realm::{Outcome, Realm, RealmError, Status};
use crate::rules::{Action, Intent};
use crate::world::{EntityId, EntityKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Stops a session before its next command.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A visitor attached to a realm.
pub struct Session {
    id: Uuid,
    actor: EntityId,
    realm: Arc<Realm>,
    cancel: CancelHandle,
}

impl Session {
    /// Join the realm under a display name. The entity id is derived from
    /// the name, so the same name reattaches to the same entity. Hosts'
    /// names are taken.
    pub async fn open(
        realm: Arc<Realm>,
        name: &str,
        kind: EntityKind,
    ) -> Result<(Self, Outcome), RealmError> {
        let actor = EntityId::from_name(name);
        let arrival = realm.join(&actor, name, kind).await?;
        let session = Self {
            id: Uuid::new_v4(),
            actor,
            realm,
            cancel: CancelHandle::default(),
        };
        info!(
            session = %session.id,
            actor = %session.actor,
            status = ?arrival.status,
            "Session opened"
        );
        Ok((session, arrival))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn actor(&self) -> &EntityId {
        &self.actor
    }

    pub fn realm(&self) -> &Arc<Realm> {
        &self.realm
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send one line.
    pub async fn send(&self, line: &str) -> Result<Outcome, RealmError> {
        if self.cancel.is_cancelled() {
            debug!(session = %self.id, "Command dropped after cancellation");
            return Err(RealmError::Cancelled);
        }
        self.realm.dispatch(&self.actor, line).await
    }

    /// Drive the session from a script, as an exploration loop does.
    /// Stops at `quit`, at the first command after cancellation, or at the
    /// first realm error.
    pub async fn run_script<I, S>(&self, lines: I) -> Result<Vec<Outcome>, RealmError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut outcomes = Vec::new();
        for line in lines {
            match self.send(line.as_ref()).await {
                Ok(outcome) => {
                    let quit = outcome.status == Status::Quit;
                    outcomes.push(outcome);
                    if quit {
                        break;
                    }
                }
                Err(RealmError::Cancelled) => {
                    info!(session = %self.id, ran = outcomes.len(), "Script cancelled");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(outcomes)
    }

    /// Depart the world and end the session.
    pub async fn leave(self) -> Result<Outcome, RealmError> {
        let outcome = self
            .realm
            .act(Action::new(self.actor.clone(), Intent::Depart))
            .await?;
        info!(session = %self.id, actor = %self.actor, "Session left");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::RealmBuilder;
    use crate::world::RoomId;

    async fn realm() -> Arc<Realm> {
        Arc::new(RealmBuilder::new().open().await.unwrap())
    }

    #[tokio::test]
    async fn test_open_derives_id_from_name() {
        let realm = realm().await;
        let (session, arrival) = Session::open(realm.clone(), "Alice Liddell", EntityKind::Daemon)
            .await
            .unwrap();
        assert_eq!(session.actor().as_str(), "alice-liddell");
        assert_eq!(arrival.status, Status::Executed);
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_command() {
        let realm = realm().await;
        let (session, _) = Session::open(realm.clone(), "Dodo", EntityKind::Daemon)
            .await
            .unwrap();
        session.send("down").await.unwrap();
        session.cancel_handle().cancel();
        assert!(matches!(session.send("up").await, Err(RealmError::Cancelled)));
        assert_eq!(
            realm.position(session.actor()).await,
            Some(RoomId::new("rabbit-hole"))
        );
    }

    #[tokio::test]
    async fn test_run_script_stops_at_quit() {
        let realm = realm().await;
        let (session, _) = Session::open(realm.clone(), "Dodo", EntityKind::Daemon)
            .await
            .unwrap();
        let outcomes = session
            .run_script(["east", "look", "quit", "west"])
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[2].status, Status::Quit);
        assert_eq!(realm.position(session.actor()).await, Some(RoomId::new("garden")));
    }

    #[tokio::test]
    async fn test_leave_departs() {
        let realm = realm().await;
        let (session, _) = Session::open(realm.clone(), "Dodo", EntityKind::Daemon)
            .await
            .unwrap();
        let actor = session.actor().clone();
        let outcome = session.leave().await.unwrap();
        assert!(outcome.is_executed());
        assert!(realm.position(&actor).await.is_none());
    }
}
