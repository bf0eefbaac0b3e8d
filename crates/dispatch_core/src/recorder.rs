//! Durable record of coordinator activity.
//!
//! Two artifacts are produced: a JSON checkpoint of the whole fleet, rewritten
//! on every snapshot, and an append-only interaction log with one
//! human-readable line per event. Write failures are returned as
//! [DispatchError::PersistenceWriteFailure] and never panic; callers log them
//! and carry on.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, LineWriter, Write};
use std::path::{Path, PathBuf};

use crate::agents::{RequestId, RequesterId, SpeedClass, TaxiId};
use crate::clock::SimTime;
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::grid::GridPos;
use crate::lifecycle::RequestLifecycleTracker;
use crate::matching::Assignment;
use crate::messages::RejectReason;
use crate::registry::SpatialTaxiRegistry;
use crate::telemetry::{DispatchCounts, DispatchSnapshot, SnapshotHistory, TaxiSnapshot};

/// One line of the interaction log.
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionEvent {
    Registered {
        taxi_id: TaxiId,
        position: GridPos,
        speed: SpeedClass,
        at: SimTime,
    },
    Assigned(Assignment),
    Rejected {
        /// `None` when the request was refused before it was tracked.
        request_id: Option<RequestId>,
        requester_id: RequesterId,
        pickup: GridPos,
        reason: RejectReason,
        at: SimTime,
    },
    TimedOut {
        request_id: RequestId,
        requester_id: RequesterId,
        pickup: GridPos,
        waited: SimTime,
        at: SimTime,
    },
    Completed {
        request_id: RequestId,
        requester_id: RequesterId,
        taxi_id: TaxiId,
        distance: u32,
        at: SimTime,
    },
    ShiftOver {
        taxi_id: TaxiId,
        services: u32,
        at: SimTime,
    },
    Shutdown {
        counts: DispatchCounts,
        at: SimTime,
    },
}

impl fmt::Display for InteractionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteractionEvent::Registered {
                taxi_id,
                position,
                speed,
                at,
            } => write!(
                f,
                "t={at} registered taxi={taxi_id} position={position} speed={}",
                speed.cells_per_unit()
            ),
            InteractionEvent::Assigned(a) => write!(
                f,
                "t={} assigned request={} requester={} taxi={} from={} pickup={} distance={} eta={:.2}",
                a.assigned_at,
                a.request_id,
                a.requester_id,
                a.taxi_id,
                a.taxi_position,
                a.pickup,
                a.distance,
                a.estimated_response_time
            ),
            InteractionEvent::Rejected {
                request_id,
                requester_id,
                pickup,
                reason,
                at,
            } => {
                write!(f, "t={at} rejected request=")?;
                match request_id {
                    Some(id) => write!(f, "{id}")?,
                    None => f.write_str("-")?,
                }
                write!(f, " requester={requester_id} pickup={pickup} reason={reason}")
            }
            InteractionEvent::TimedOut {
                request_id,
                requester_id,
                pickup,
                waited,
                at,
            } => write!(
                f,
                "t={at} timed_out request={request_id} requester={requester_id} pickup={pickup} waited={waited}"
            ),
            InteractionEvent::Completed {
                request_id,
                requester_id,
                taxi_id,
                distance,
                at,
            } => write!(
                f,
                "t={at} completed request={request_id} requester={requester_id} taxi={taxi_id} distance={distance}"
            ),
            InteractionEvent::ShiftOver {
                taxi_id,
                services,
                at,
            } => write!(f, "t={at} shift_over taxi={taxi_id} services={services}"),
            InteractionEvent::Shutdown { counts, at } => write!(
                f,
                "t={at} shutdown assigned={} completed={} rejected={} timed_out={}",
                counts.assigned, counts.completed, counts.rejected, counts.timed_out
            ),
        }
    }
}

/// Writes checkpoints to a fixed path. Cheap to clone so a copy can be moved
/// onto a blocking thread.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes into a sibling temp file and renames it over the target,
    /// so readers never see a half-written checkpoint.
    pub fn write(&self, snapshot: &DispatchSnapshot) -> Result<(), DispatchError> {
        let payload = serde_json::to_vec_pretty(snapshot)
            .map_err(|err| DispatchError::persistence(&self.path, err))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload).map_err(|err| DispatchError::persistence(&tmp, err))?;
        fs::rename(&tmp, &self.path).map_err(|err| DispatchError::persistence(&self.path, err))
    }

    /// `Ok(None)` when no checkpoint has been written yet.
    pub fn load(&self) -> Result<Option<DispatchSnapshot>, DispatchError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.unreadable(err)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| self.unreadable(err))
    }

    fn unreadable(&self, reason: impl ToString) -> DispatchError {
        DispatchError::SnapshotUnreadable {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct StateRecorder {
    writer: SnapshotWriter,
    interaction_log: PathBuf,
    /// Opened on first append and kept for the recorder's lifetime.
    log_file: Option<LineWriter<File>>,
    history: SnapshotHistory,
}

impl StateRecorder {
    pub fn new(
        snapshot_path: impl Into<PathBuf>,
        interaction_log: impl Into<PathBuf>,
        history_limit: usize,
    ) -> Self {
        Self {
            writer: SnapshotWriter::new(snapshot_path),
            interaction_log: interaction_log.into(),
            log_file: None,
            history: SnapshotHistory::new(history_limit),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(
            config.snapshot_path.clone(),
            config.interaction_log_path.clone(),
            config.snapshot_history_limit,
        )
    }

    /// Consistent copy of registry and tracker state at `now`.
    pub fn capture(
        registry: &SpatialTaxiRegistry,
        tracker: &RequestLifecycleTracker,
        now: SimTime,
    ) -> DispatchSnapshot {
        let window = registry.staleness_window();
        DispatchSnapshot {
            taken_at: now,
            grid: registry.bounds(),
            fleet: registry.fleet_counts(now),
            counts: tracker.counts(),
            pending_requests: tracker.pending_len(),
            active_assignments: tracker.assigned_len(),
            next_request_id: tracker.next_request_id(),
            taxis: registry
                .taxis()
                .map(|taxi| TaxiSnapshot {
                    status: taxi.status(now, window),
                    taxi: taxi.clone(),
                })
                .collect(),
        }
    }

    /// Captures, records and writes a checkpoint in one step.
    ///
    /// The snapshot enters the history even when the write fails.
    pub fn snapshot(
        &mut self,
        registry: &SpatialTaxiRegistry,
        tracker: &RequestLifecycleTracker,
        now: SimTime,
    ) -> Result<DispatchSnapshot, DispatchError> {
        let snapshot = Self::capture(registry, tracker, now);
        self.record(&snapshot);
        self.writer.write(&snapshot)?;
        Ok(snapshot)
    }

    /// Adds a checkpoint to the in-memory history without touching disk.
    pub fn record(&mut self, snapshot: &DispatchSnapshot) {
        self.history.push(snapshot.summary());
    }

    pub fn writer(&self) -> SnapshotWriter {
        self.writer.clone()
    }

    pub fn load_snapshot(&self) -> Result<Option<DispatchSnapshot>, DispatchError> {
        self.writer.load()
    }

    /// Appends one line. The log stays open between calls and is flushed at
    /// each newline; a failed write drops the handle so the next call reopens.
    pub fn append_interaction(&mut self, event: &InteractionEvent) -> Result<(), DispatchError> {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let written = self
            .log_file()
            .and_then(|file| writeln!(file, "[{stamp}] {event}"));
        if written.is_err() {
            self.log_file = None;
        }
        written.map_err(|err| DispatchError::persistence(&self.interaction_log, err))
    }

    fn log_file(&mut self) -> io::Result<&mut LineWriter<File>> {
        let file = match self.log_file.take() {
            Some(file) => file,
            None => LineWriter::new(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.interaction_log)?,
            ),
        };
        Ok(self.log_file.insert(file))
    }

    pub fn interaction_log_path(&self) -> &Path {
        &self.interaction_log
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    pub fn into_history(self) -> SnapshotHistory {
        self.history
    }
}
