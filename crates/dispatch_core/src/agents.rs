use serde::{Deserialize, Serialize};

use crate::clock::SimTime;
use crate::error::InvalidSpeedClass;
use crate::grid::GridPos;

pub type TaxiId = u32;
pub type RequesterId = u32;
pub type RequestId = u64;

/// Grid cells a taxi covers per simulated time unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SpeedClass {
    #[default]
    One,
    Two,
    Four,
}

impl SpeedClass {
    pub const ALL: [SpeedClass; 3] = [SpeedClass::One, SpeedClass::Two, SpeedClass::Four];

    pub fn cells_per_unit(self) -> u32 {
        match self {
            SpeedClass::One => 1,
            SpeedClass::Two => 2,
            SpeedClass::Four => 4,
        }
    }
}

impl TryFrom<u8> for SpeedClass {
    type Error = InvalidSpeedClass;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SpeedClass::One),
            2 => Ok(SpeedClass::Two),
            4 => Ok(SpeedClass::Four),
            other => Err(InvalidSpeedClass(other)),
        }
    }
}

impl From<SpeedClass> for u8 {
    fn from(speed: SpeedClass) -> Self {
        speed.cells_per_unit() as u8
    }
}

/// Stored availability. Staleness is derived at query time, see [TaxiStatus].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Free,
    EnRoute,
    /// Shift finished; never matched again.
    OffDuty,
}

/// Availability as seen by matching at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxiStatus {
    Free,
    EnRoute,
    OffDuty,
    /// Free, but silent for longer than the staleness window.
    Unknown,
}

/// One accepted service: where the taxi was and where it was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLeg {
    pub from: GridPos,
    pub pickup: GridPos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxi {
    pub id: TaxiId,
    pub position: GridPos,
    pub initial_position: GridPos,
    pub speed: SpeedClass,
    pub availability: Availability,
    /// Timestamp of the latest accepted report.
    pub last_update: SimTime,
    pub services_completed: u32,
    pub service_log: Vec<ServiceLeg>,
    /// Timestamp of the latest accepted completion notice.
    #[serde(default)]
    pub last_completion_at: Option<SimTime>,
}

impl Taxi {
    pub fn new(id: TaxiId, position: GridPos, speed: SpeedClass, reported_at: SimTime) -> Self {
        Self {
            id,
            position,
            initial_position: position,
            speed,
            availability: Availability::Free,
            last_update: reported_at,
            services_completed: 0,
            service_log: Vec::new(),
            last_completion_at: None,
        }
    }

    pub fn is_stale(&self, now: SimTime, staleness_window: SimTime) -> bool {
        now.saturating_sub(self.last_update) > staleness_window
    }

    /// EnRoute taxis keep their reservation even when stale.
    pub fn status(&self, now: SimTime, staleness_window: SimTime) -> TaxiStatus {
        match self.availability {
            Availability::OffDuty => TaxiStatus::OffDuty,
            Availability::EnRoute => TaxiStatus::EnRoute,
            Availability::Free if self.is_stale(now, staleness_window) => TaxiStatus::Unknown,
            Availability::Free => TaxiStatus::Free,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_class_accepts_only_enumerated_values() {
        assert_eq!(SpeedClass::try_from(1), Ok(SpeedClass::One));
        assert_eq!(SpeedClass::try_from(2), Ok(SpeedClass::Two));
        assert_eq!(SpeedClass::try_from(4), Ok(SpeedClass::Four));
        assert_eq!(SpeedClass::try_from(3), Err(InvalidSpeedClass(3)));
        assert_eq!(u8::from(SpeedClass::Four), 4);
    }

    #[test]
    fn stale_free_taxi_reports_unknown_but_en_route_keeps_reservation() {
        let mut taxi = Taxi::new(1, GridPos::new(0, 0), SpeedClass::Two, 10);
        assert_eq!(taxi.status(20, 10), TaxiStatus::Free);
        assert_eq!(taxi.status(21, 10), TaxiStatus::Unknown);

        taxi.availability = Availability::EnRoute;
        assert_eq!(taxi.status(500, 10), TaxiStatus::EnRoute);
    }
}
