//! Durable storage for the witness log and world snapshots.
//!
//! Events are appended to a JSON Lines file and synced before the world
//! changes. Snapshots are written to a temporary file, synced and renamed
//! into place, so a crash leaves either the old snapshot or the new one.
//! Recovery loads the latest snapshot and hands back the full log; the
//! caller replays whatever the snapshot has not seen.

use crate::clock::VirtualTime;
use crate::config::WorldConfig;
use crate::topology::{Topology, TopologyDef};
use crate::witness::{EventId, WorldEvent};
use crate::world::WorldState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("witness log corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Current snapshot format version.
pub const SAVE_VERSION: u32 = 1;

const SNAPSHOT_FILE: &str = "snapshot.json";
const LOG_FILE: &str = "witness.jsonl";

/// A point-in-time copy of the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version for compatibility checking.
    pub version: u32,

    /// When the snapshot was taken, in seconds since the epoch.
    pub saved_at: String,

    /// The last event whose effects are included.
    pub last_event: Option<EventId>,

    pub world: WorldState,

    /// The room graph the world was running on.
    #[serde(default)]
    pub topology: Option<TopologyDef>,

    pub metadata: SnapshotMetadata,
}

/// Summary fields, readable without walking the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub world_id: Uuid,
    pub entities: usize,
    pub virtual_time: VirtualTime,
    pub day: u64,
}

impl Snapshot {
    pub fn new(world: WorldState, last_event: Option<EventId>) -> Self {
        let metadata = SnapshotMetadata {
            world_id: world.world_id,
            entities: world.entities.len(),
            virtual_time: world.clock.now(),
            day: world.clock.day(),
        };
        Self {
            version: SAVE_VERSION,
            saved_at: timestamp(),
            last_event,
            world,
            topology: None,
            metadata,
        }
    }

    pub fn with_topology(mut self, topology: &Topology) -> Self {
        self.topology = Some(topology.to_def());
        self
    }

    /// The world this snapshot holds, brought in line with the running
    /// configuration. Clock weights and memory limits follow `config`; rooms
    /// the topology has gained since are added empty.
    pub fn restore(self, topology: &Topology, config: &WorldConfig) -> WorldState {
        let mut world = self.world;
        world.clock.reconfigure(&config.clock);
        world.dispositions.set_limits(config.npc.limits());
        for id in topology.room_ids() {
            world.rooms.entry(id.clone()).or_default();
        }
        world
    }

    /// Write atomically: temp file, sync, rename.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let path = path.as_ref();
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(self)?;

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&content).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let snapshot: Self = serde_json::from_str(&content)?;
        if snapshot.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: snapshot.version,
            });
        }
        Ok(snapshot)
    }
}

/// What storage hands back on startup.
#[derive(Debug, Default)]
pub struct Recovered {
    pub snapshot: Option<Snapshot>,
    /// The complete log, oldest first.
    pub events: Vec<WorldEvent>,
}

impl Recovered {
    /// Events the snapshot does not include.
    pub fn tail(&self) -> &[WorldEvent] {
        let after = self
            .snapshot
            .as_ref()
            .and_then(|s| s.last_event)
            .map_or(0, |id| id.0);
        let start = self.events.partition_point(|e| e.id.0 <= after);
        &self.events[start..]
    }
}

/// Where the witness log and snapshots live.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Durably append one event. When this returns `Ok` the event survives a crash.
    async fn append(&self, event: &WorldEvent) -> Result<(), PersistError>;

    async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistError>;

    async fn recover(&self) -> Result<Recovered, PersistError>;
}

// ============================================================================
// File Storage
// ============================================================================

/// A directory holding `snapshot.json` and `witness.jsonl`.
pub struct FileStorage {
    dir: PathBuf,
    log: Mutex<LogWriter>,
}

/// The open witness log and the length of its last complete line.
#[derive(Default)]
struct LogWriter {
    file: Option<fs::File>,
    committed: Option<u64>,
}

impl FileStorage {
    /// Open a storage directory, creating it if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, PersistError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            log: Mutex::new(LogWriter::default()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    async fn open_log(&self) -> Result<fs::File, PersistError> {
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .await?)
    }

    /// Parse the log, dropping a torn final line left by a crash mid-append.
    async fn read_log(&self) -> Result<Vec<WorldEvent>, PersistError> {
        let path = self.log_path();
        if !fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).await?;
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let mut events = Vec::with_capacity(lines.len());
        let mut offset = 0u64;

        for (index, line) in lines.iter().enumerate() {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                match serde_json::from_str::<WorldEvent>(trimmed) {
                    Ok(event) => events.push(event),
                    Err(err) if index + 1 == lines.len() => {
                        warn!(
                            line = index + 1,
                            error = %err,
                            "Ignoring torn final line in witness log"
                        );
                        let file = OpenOptions::new().write(true).open(&path).await?;
                        file.set_len(offset).await?;
                        file.sync_all().await?;
                        break;
                    }
                    Err(err) => {
                        return Err(PersistError::Corrupt {
                            line: index + 1,
                            reason: err.to_string(),
                        })
                    }
                }
            }
            offset += line.len() as u64;
        }
        Ok(events)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn append(&self, event: &WorldEvent) -> Result<(), PersistError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut writer = self.log.lock().await;
        if writer.file.is_none() {
            writer.file = Some(self.open_log().await?);
        }
        let LogWriter { file, committed } = &mut *writer;
        let Some(handle) = file.as_mut() else {
            return Err(PersistError::Unavailable("witness log not open".into()));
        };

        let len_before = handle.metadata().await?.len();
        let len_before = match *committed {
            Some(good) if len_before > good => {
                // A failed append left bytes that could not be cut at the time.
                handle.set_len(good).await.map_err(|err| {
                    PersistError::Unavailable(format!(
                        "witness log has a partial line that cannot be removed: {}",
                        err
                    ))
                })?;
                handle.sync_data().await?;
                info!(removed = len_before - good, "Partial witness line removed");
                good
            }
            Some(good) if len_before < good => {
                return Err(PersistError::Unavailable(format!(
                    "witness log shrank from {} to {} bytes",
                    good, len_before
                )));
            }
            _ => len_before,
        };
        *committed = Some(len_before);

        let written = async {
            handle.write_all(&line).await?;
            handle.flush().await?;
            handle.sync_data().await
        }
        .await;
        if let Err(err) = written {
            // Leave no partial line behind for the next append to follow.
            if let Err(cut) = handle.set_len(len_before).await {
                warn!(
                    error = %cut,
                    "Could not remove a partial witness line, appends will retry the cut"
                );
            }
            *file = None;
            return Err(err.into());
        }
        *committed = Some(len_before + line.len() as u64);
        debug!(event = %event.id, "Event appended");
        Ok(())
    }

    async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
        snapshot.save_json(self.snapshot_path()).await?;
        info!(
            last_event = ?snapshot.last_event.map(|id| id.0),
            path = %self.snapshot_path().display(),
            "Snapshot written"
        );
        Ok(())
    }

    async fn recover(&self) -> Result<Recovered, PersistError> {
        let snapshot_path = self.snapshot_path();
        let snapshot = if fs::try_exists(&snapshot_path).await? {
            Some(Snapshot::load_json(&snapshot_path).await?)
        } else {
            None
        };
        let events = self.read_log().await?;
        Ok(Recovered { snapshot, events })
    }
}

// ============================================================================
// Memory Storage
// ============================================================================

/// Storage that lives and dies with the process.
#[derive(Default)]
pub struct MemoryStorage {
    events: Mutex<Vec<WorldEvent>>,
    snapshot: Mutex<Option<Snapshot>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn event_count(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn snapshot(&self) -> Option<Snapshot> {
        self.snapshot.lock().await.clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn append(&self, event: &WorldEvent) -> Result<(), PersistError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }

    async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
        *self.snapshot.lock().await = Some(snapshot.clone());
        Ok(())
    }

    async fn recover(&self) -> Result<Recovered, PersistError> {
        Ok(Recovered {
            snapshot: self.snapshot.lock().await.clone(),
            events: self.events.lock().await.clone(),
        })
    }
}

/// Seconds since the epoch.
fn timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", now.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ClockConfig};
    use crate::rules::ActionKind;
    use crate::topology::wonderland;
    use crate::witness::{EventDraft, EventLog, EventRecord};
    use crate::world::{EntityId, RoomId};

    fn world() -> WorldState {
        WorldState::new(&wonderland(), Clock::new(&ClockConfig::default()))
    }

    fn events(n: u64) -> Vec<WorldEvent> {
        let mut log = EventLog::new();
        for i in 0..n {
            log.record(EventDraft {
                at: VirtualTime(i * 100),
                actor: EntityId::new("alice"),
                room: RoomId::new("garden"),
                action: ActionKind::Say,
                payload: format!("line {}", i),
                record: EventRecord::Executed {
                    effects: vec![],
                    enhanced_insight: false,
                },
            })
            .unwrap();
        }
        log.iter().cloned().collect()
    }

    #[test]
    fn test_restore_follows_running_config() {
        let mut old = world();
        old.rooms.remove(&RoomId::new("caucus-shore"));
        let config = WorldConfig::default()
            .with_clock(ClockConfig::default().with_weight(ActionKind::Move, 0.05));

        let world = Snapshot::new(old, Some(EventId(3))).restore(&wonderland(), &config);

        assert_eq!(world.clock.cost(ActionKind::Move), 500);
        assert!(world.rooms.contains_key(&RoomId::new("caucus-shore")));
        assert_eq!(world.dispositions.limits(), config.npc.limits());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let world = world();
        storage
            .write_snapshot(&Snapshot::new(world.clone(), Some(EventId(7))).with_topology(&wonderland()))
            .await
            .unwrap();
        assert!(!dir.path().join("snapshot.json.tmp").exists());

        let recovered = storage.recover().await.unwrap();
        let snapshot = recovered.snapshot.unwrap();
        assert_eq!(snapshot.world, world);
        assert_eq!(snapshot.last_event, Some(EventId(7)));
        assert_eq!(snapshot.metadata.world_id, world.world_id);
        let topology = Topology::from_def(snapshot.topology.unwrap()).unwrap();
        assert_eq!(topology.room_ids().count(), wonderland().room_ids().count());
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let mut snapshot = Snapshot::new(world(), None);
        snapshot.version = 99;
        snapshot.save_json(&path).await.unwrap();
        assert!(matches!(
            Snapshot::load_json(&path).await,
            Err(PersistError::VersionMismatch { found: 99, .. })
        ));
    }

    #[tokio::test]
    async fn test_log_append_and_recover() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        for event in events(3) {
            storage.append(&event).await.unwrap();
        }
        let recovered = storage.recover().await.unwrap();
        assert!(recovered.snapshot.is_none());
        assert_eq!(recovered.events, events(3));
    }

    #[tokio::test]
    async fn test_torn_final_line_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        for event in events(2) {
            storage.append(&event).await.unwrap();
        }
        let mut content = std::fs::read_to_string(storage.log_path()).unwrap();
        content.push_str("{\"id\":3,\"at\":");
        std::fs::write(storage.log_path(), content).unwrap();

        let reopened = FileStorage::open(dir.path()).await.unwrap();
        let recovered = reopened.recover().await.unwrap();
        assert_eq!(recovered.events.len(), 2);

        // The torn bytes are gone, so the next append starts on a clean line.
        reopened.append(&events(3)[2]).await.unwrap();
        assert_eq!(reopened.recover().await.unwrap().events, events(3));
    }

    #[tokio::test]
    async fn test_partial_line_from_failed_append_is_cut_before_next_write() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let all = events(3);
        storage.append(&all[0]).await.unwrap();
        storage.append(&all[1]).await.unwrap();

        // What a write that died halfway, with a failed truncate, leaves behind.
        {
            use std::io::Write;
            let mut raw = std::fs::OpenOptions::new()
                .append(true)
                .open(storage.log_path())
                .unwrap();
            raw.write_all(b"{\"id\":3,\"at\":").unwrap();
        }

        storage.append(&all[2]).await.unwrap();
        let content = std::fs::read_to_string(storage.log_path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert_eq!(storage.recover().await.unwrap().events, all);

        let reopened = FileStorage::open(dir.path()).await.unwrap();
        assert_eq!(reopened.recover().await.unwrap().events, all);
    }

    #[tokio::test]
    async fn test_shrunken_log_refuses_appends() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let all = events(2);
        storage.append(&all[0]).await.unwrap();
        std::fs::write(storage.log_path(), "").unwrap();

        assert!(matches!(
            storage.append(&all[1]).await,
            Err(PersistError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_middle_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let good = serde_json::to_string(&events(1)[0]).unwrap();
        std::fs::write(storage.log_path(), format!("{}\nnot json\n{}\n", good, good)).unwrap();
        assert!(matches!(
            storage.recover().await,
            Err(PersistError::Corrupt { line: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_recovered_tail() {
        let storage = MemoryStorage::new();
        for event in events(5) {
            storage.append(&event).await.unwrap();
        }
        storage
            .write_snapshot(&Snapshot::new(world(), Some(EventId(3))))
            .await
            .unwrap();
        let recovered = storage.recover().await.unwrap();
        let tail: Vec<u64> = recovered.tail().iter().map(|e| e.id.0).collect();
        assert_eq!(tail, vec![4, 5]);
    }
}
