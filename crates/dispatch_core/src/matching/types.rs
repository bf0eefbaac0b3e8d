use serde::{Deserialize, Serialize};

use crate::agents::{RequestId, RequesterId, SpeedClass, TaxiId};
use crate::clock::SimTime;
use crate::grid::GridPos;

/// A Free taxi considered for a pickup, with its distance to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCandidate {
    pub taxi_id: TaxiId,
    pub position: GridPos,
    pub speed: SpeedClass,
    pub distance: u32,
}

/// The committed pairing of one request with one reserved taxi. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub request_id: RequestId,
    pub requester_id: RequesterId,
    pub taxi_id: TaxiId,
    pub taxi_position: GridPos,
    pub pickup: GridPos,
    pub distance: u32,
    pub assigned_at: SimTime,
    /// Grid distance divided by the taxi's speed class, in time units.
    pub estimated_response_time: f64,
}

pub fn estimate_response_time(distance: u32, speed: SpeedClass) -> f64 {
    f64::from(distance) / f64::from(speed.cells_per_unit())
}
