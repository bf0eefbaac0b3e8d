//! Aggregate counts and checkpoint payloads.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::agents::{RequestId, Taxi, TaxiStatus};
use crate::clock::SimTime;
use crate::grid::GridBounds;

/// Outcome totals across the lifetime of the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchCounts {
    pub assigned: u64,
    pub completed: u64,
    pub rejected: u64,
    pub timed_out: u64,
}

impl DispatchCounts {
    /// Requests that never got a taxi.
    pub fn denied(&self) -> u64 {
        self.rejected + self.timed_out
    }
}

/// Taxis per status at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetCounts {
    pub free: usize,
    pub en_route: usize,
    pub off_duty: usize,
    pub unknown: usize,
}

impl FleetCounts {
    pub fn add(&mut self, status: TaxiStatus) {
        match status {
            TaxiStatus::Free => self.free += 1,
            TaxiStatus::EnRoute => self.en_route += 1,
            TaxiStatus::OffDuty => self.off_duty += 1,
            TaxiStatus::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.free + self.en_route + self.off_duty + self.unknown
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxiSnapshot {
    #[serde(flatten)]
    pub taxi: Taxi,
    pub status: TaxiStatus,
}

/// Full checkpoint written to durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSnapshot {
    pub taken_at: SimTime,
    pub grid: GridBounds,
    pub fleet: FleetCounts,
    pub counts: DispatchCounts,
    pub pending_requests: usize,
    pub active_assignments: usize,
    /// Id the next ride request will receive. Ids keep increasing across restarts.
    #[serde(default)]
    pub next_request_id: RequestId,
    pub taxis: Vec<TaxiSnapshot>,
}

impl DispatchSnapshot {
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            taken_at: self.taken_at,
            fleet: self.fleet,
            counts: self.counts,
            pending_requests: self.pending_requests,
        }
    }
}

/// Aggregate part of a checkpoint, kept in memory for export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointSummary {
    pub taken_at: SimTime,
    pub fleet: FleetCounts,
    pub counts: DispatchCounts,
    pub pending_requests: usize,
}

/// Rolling buffer of checkpoint summaries; oldest entries are dropped first.
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    entries: VecDeque<CheckpointSummary>,
    limit: usize,
}

impl SnapshotHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, summary: CheckpointSummary) {
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(summary);
    }

    pub fn iter(&self) -> impl Iterator<Item = &CheckpointSummary> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&CheckpointSummary> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::new(10_000)
    }
}
