//! Wire shapes of the two inbound channels and the outbound notices.
//!
//! Raw payloads are loosely typed JSON. They are parsed and validated here,
//! at the channel boundary, and only [DispatchEvent] values reach the core.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agents::{RequesterId, SpeedClass, TaxiId};
use crate::clock::SimTime;
use crate::error::MessageError;
use crate::grid::{GridBounds, GridPos};

/// Fire-and-forget reports published by taxis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    PositionUpdate {
        taxi_id: TaxiId,
        x: i64,
        y: i64,
        timestamp: SimTime,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed: Option<u8>,
    },
    CompletionNotice {
        taxi_id: TaxiId,
        timestamp: SimTime,
    },
    ShiftEnded {
        taxi_id: TaxiId,
        timestamp: SimTime,
    },
}

impl InboundMessage {
    pub fn from_json(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn validate(self, bounds: GridBounds) -> Result<DispatchEvent, MessageError> {
        match self {
            InboundMessage::PositionUpdate {
                taxi_id,
                x,
                y,
                timestamp,
                speed,
            } => Ok(DispatchEvent::PositionUpdate {
                taxi_id,
                position: checked_pos(bounds, x, y)?,
                timestamp,
                speed: speed.map(SpeedClass::try_from).transpose()?,
            }),
            InboundMessage::CompletionNotice { taxi_id, timestamp } => {
                Ok(DispatchEvent::CompletionNotice { taxi_id, timestamp })
            }
            InboundMessage::ShiftEnded { taxi_id, timestamp } => {
                Ok(DispatchEvent::ShiftEnded { taxi_id, timestamp })
            }
        }
    }
}

/// Request half of the request/reply channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideRequestMessage {
    pub requester_id: RequesterId,
    pub x: i64,
    pub y: i64,
}

impl RideRequestMessage {
    pub fn from_json(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn checked_pickup(&self, bounds: GridBounds) -> Result<GridPos, MessageError> {
        checked_pos(bounds, self.x, self.y)
    }

    pub fn validate(self, bounds: GridBounds) -> Result<DispatchEvent, MessageError> {
        Ok(DispatchEvent::RideRequest {
            requester_id: self.requester_id,
            pickup: self.checked_pickup(bounds)?,
        })
    }
}

fn checked_pos(bounds: GridBounds, x: i64, y: i64) -> Result<GridPos, MessageError> {
    bounds
        .checked_pos(x, y)
        .map_err(|_| MessageError::OutOfBounds {
            x,
            y,
            n: bounds.n,
            m: bounds.m,
        })
}

/// Validated inbound event, the only input the coordinator core accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEvent {
    PositionUpdate {
        taxi_id: TaxiId,
        position: GridPos,
        timestamp: SimTime,
        speed: Option<SpeedClass>,
    },
    RideRequest {
        requester_id: RequesterId,
        pickup: GridPos,
    },
    CompletionNotice {
        taxi_id: TaxiId,
        timestamp: SimTime,
    },
    ShiftEnded {
        taxi_id: TaxiId,
        timestamp: SimTime,
    },
}

/// Reply half of the request/reply channel. Exactly one is sent per request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RideReply {
    Assigned {
        taxi_id: TaxiId,
        estimated_response_time: f64,
    },
    Rejected {
        reason: RejectReason,
    },
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NoTaxiAvailable,
    DuplicateRequest,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NoTaxiAvailable => f.write_str("NoTaxiAvailable"),
            RejectReason::DuplicateRequest => f.write_str("DuplicateRequest"),
        }
    }
}

/// Outbound notices published to taxis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaxiNotice {
    Dispatched {
        taxi_id: TaxiId,
        requester_id: RequesterId,
        pickup: GridPos,
    },
    ShiftOver {
        taxi_id: TaxiId,
    },
}

impl TaxiNotice {
    pub fn taxi_id(&self) -> TaxiId {
        match *self {
            TaxiNotice::Dispatched { taxi_id, .. } | TaxiNotice::ShiftOver { taxi_id } => taxi_id,
        }
    }
}
