//! Error types for the dispatch core.

use std::path::PathBuf;

use crate::agents::{Availability, RequestId, RequesterId, TaxiId};
use crate::clock::SimTime;
use crate::lifecycle::RequestState;

/// Failures raised by the registry, the assignment engine and the request tracker.
///
/// None of these are fatal to the coordinator: they are either surfaced to the
/// requester as a rejection, retried internally, or logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// No Free taxi could be reserved. Surfaced to the requester.
    #[error("no taxi available for requester {requester_id}")]
    NoTaxiAvailable { requester_id: RequesterId },
    /// Lost a reservation race; the engine retries once before giving up.
    #[error("taxi {taxi_id} is already reserved")]
    AlreadyReserved { taxi_id: TaxiId },
    #[error("requester {requester_id} already has pending request {request_id}")]
    DuplicateRequest {
        requester_id: RequesterId,
        request_id: RequestId,
    },
    /// Taxi silent past the staleness window; excluded from matching.
    #[error("taxi {taxi_id} has not reported since t={last_update}")]
    StaleTaxiData { taxi_id: TaxiId, last_update: SimTime },
    #[error("failed to persist {}: {reason}", .path.display())]
    PersistenceWriteFailure { path: PathBuf, reason: String },
    #[error("checkpoint {} is unreadable: {reason}", .path.display())]
    SnapshotUnreadable { path: PathBuf, reason: String },
    #[error("position ({x}, {y}) is outside the {n}x{m} grid")]
    OutOfBounds { x: i64, y: i64, n: u32, m: u32 },
    #[error("unknown taxi {0}")]
    UnknownTaxi(TaxiId),
    #[error("unknown request {0}")]
    UnknownRequest(RequestId),
    #[error("request {request_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        request_id: RequestId,
        from: RequestState,
        to: RequestState,
    },
    #[error("taxi {taxi_id} is {availability:?} and cannot be released")]
    NotReleasable {
        taxi_id: TaxiId,
        availability: Availability,
    },
}

impl DispatchError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        DispatchError::PersistenceWriteFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("speed class must be 1, 2 or 4 (got {0})")]
pub struct InvalidSpeedClass(pub u8);

/// Inbound payload rejected at the channel boundary.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("position ({x}, {y}) is outside the {n}x{m} grid")]
    OutOfBounds { x: i64, y: i64, n: u32, m: u32 },
    #[error(transparent)]
    InvalidSpeed(#[from] InvalidSpeedClass),
}

/// Failure talking to a running coordinator through its handle.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("coordinator has stopped")]
    Closed,
    #[error(transparent)]
    Invalid(#[from] MessageError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("grid dimensions must be positive (got {n}x{m})")]
    InvalidGrid { n: u32, m: u32 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}
