//! Live taxi state: positions, availability and last-seen times.
//!
//! The registry is the only owner of [Taxi] records. Taxis are created on
//! their first position report and never removed; a taxi that stops
//! reporting is simply excluded from matching once it falls outside the
//! staleness window.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::agents::{Availability, ServiceLeg, SpeedClass, Taxi, TaxiId, TaxiStatus};
use crate::clock::SimTime;
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::grid::{GridBounds, GridPos};
use crate::matching::{MatchCandidate, TaxiPool};
use crate::telemetry::FleetCounts;

/// Result of applying one position report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// First report from this taxi; it joins the fleet as Free.
    Registered,
    Updated,
    /// Report was a duplicate or older than the stored one.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct SpatialTaxiRegistry {
    bounds: GridBounds,
    staleness_window: SimTime,
    default_speed: SpeedClass,
    // Ordered by id so scans visit lower ids first.
    taxis: BTreeMap<TaxiId, Taxi>,
}

impl SpatialTaxiRegistry {
    pub fn new(bounds: GridBounds, staleness_window: SimTime, default_speed: SpeedClass) -> Self {
        Self {
            bounds,
            staleness_window,
            default_speed,
            taxis: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.grid, config.staleness_window, config.default_speed)
    }

    pub fn bounds(&self) -> GridBounds {
        self.bounds
    }

    pub fn staleness_window(&self) -> SimTime {
        self.staleness_window
    }

    /// Inserts or updates a taxi. Later timestamps win; a report whose
    /// timestamp is not newer than the stored one leaves the taxi unchanged.
    pub fn report_position(
        &mut self,
        taxi_id: TaxiId,
        position: GridPos,
        timestamp: SimTime,
        speed: Option<SpeedClass>,
    ) -> Result<ReportOutcome, DispatchError> {
        if !self.bounds.contains(position) {
            return Err(DispatchError::OutOfBounds {
                x: i64::from(position.x),
                y: i64::from(position.y),
                n: self.bounds.n,
                m: self.bounds.m,
            });
        }

        match self.taxis.entry(taxi_id) {
            Entry::Vacant(slot) => {
                let speed = speed.unwrap_or(self.default_speed);
                slot.insert(Taxi::new(taxi_id, position, speed, timestamp));
                info!(taxi_id, %position, ?speed, "taxi registered");
                Ok(ReportOutcome::Registered)
            }
            Entry::Occupied(mut slot) => {
                let taxi = slot.get_mut();
                if timestamp <= taxi.last_update {
                    debug!(
                        taxi_id,
                        timestamp,
                        last_update = taxi.last_update,
                        "ignoring out-of-order position report"
                    );
                    return Ok(ReportOutcome::Ignored);
                }
                taxi.position = position;
                taxi.last_update = timestamp;
                if let Some(speed) = speed {
                    taxi.speed = speed;
                }
                debug!(taxi_id, %position, timestamp, "taxi position updated");
                Ok(ReportOutcome::Updated)
            }
        }
    }

    /// Refreshes the last-seen time without moving the taxi.
    pub fn touch(&mut self, taxi_id: TaxiId, timestamp: SimTime) -> Result<(), DispatchError> {
        let taxi = self.get_mut(taxi_id)?;
        taxi.last_update = taxi.last_update.max(timestamp);
        Ok(())
    }

    /// Free, non-stale taxi closest to `target` by Manhattan distance.
    /// Ties go to the lowest taxi id.
    pub fn find_nearest_available(&self, target: GridPos, now: SimTime) -> Option<MatchCandidate> {
        self.find_nearest_available_excluding(target, now, &[])
    }

    pub fn find_nearest_available_excluding(
        &self,
        target: GridPos,
        now: SimTime,
        exclude: &[TaxiId],
    ) -> Option<MatchCandidate> {
        self.taxis
            .values()
            .filter(|taxi| !exclude.contains(&taxi.id))
            .filter(|taxi| taxi.status(now, self.staleness_window) == TaxiStatus::Free)
            .map(|taxi| MatchCandidate {
                taxi_id: taxi.id,
                position: taxi.position,
                speed: taxi.speed,
                distance: taxi.position.manhattan(target),
            })
            .min_by_key(|candidate| (candidate.distance, candidate.taxi_id))
    }

    /// Test-and-set: Free → EnRoute. Any other state fails with `AlreadyReserved`.
    pub fn reserve(&mut self, taxi_id: TaxiId) -> Result<(), DispatchError> {
        let taxi = self.get_mut(taxi_id)?;
        match taxi.availability {
            Availability::Free => {
                taxi.availability = Availability::EnRoute;
                Ok(())
            }
            Availability::EnRoute | Availability::OffDuty => {
                Err(DispatchError::AlreadyReserved { taxi_id })
            }
        }
    }

    /// EnRoute → Free. Releasing an OffDuty taxi is a no-op: its shift ended
    /// while it was serving and it stays out of the pool.
    pub fn release(&mut self, taxi_id: TaxiId) -> Result<Availability, DispatchError> {
        let taxi = self.get_mut(taxi_id)?;
        match taxi.availability {
            Availability::EnRoute => {
                taxi.availability = Availability::Free;
                Ok(Availability::Free)
            }
            Availability::OffDuty => Ok(Availability::OffDuty),
            Availability::Free => Err(DispatchError::NotReleasable {
                taxi_id,
                availability: Availability::Free,
            }),
        }
    }

    pub fn end_shift(&mut self, taxi_id: TaxiId) -> Result<(), DispatchError> {
        let taxi = self.get_mut(taxi_id)?;
        taxi.availability = Availability::OffDuty;
        info!(taxi_id, services = taxi.services_completed, "taxi shift ended");
        Ok(())
    }

    /// Counts a finished service reported at `completed_at`. Returns `true`
    /// when this service exhausts the shift limit, in which case the taxi is
    /// taken off duty.
    pub fn note_service_completed(
        &mut self,
        taxi_id: TaxiId,
        completed_at: SimTime,
        shift_limit: Option<u32>,
    ) -> Result<bool, DispatchError> {
        let taxi = self.get_mut(taxi_id)?;
        taxi.services_completed = taxi.services_completed.saturating_add(1);
        taxi.last_completion_at = taxi.last_completion_at.max(Some(completed_at));
        let shift_over = shift_limit.is_some_and(|limit| taxi.services_completed >= limit)
            && taxi.availability != Availability::OffDuty;
        if shift_over {
            self.end_shift(taxi_id)?;
        }
        Ok(shift_over)
    }

    pub fn get(&self, taxi_id: TaxiId) -> Option<&Taxi> {
        self.taxis.get(&taxi_id)
    }

    fn get_mut(&mut self, taxi_id: TaxiId) -> Result<&mut Taxi, DispatchError> {
        self.taxis
            .get_mut(&taxi_id)
            .ok_or(DispatchError::UnknownTaxi(taxi_id))
    }

    pub fn status(&self, taxi_id: TaxiId, now: SimTime) -> Option<TaxiStatus> {
        self.get(taxi_id)
            .map(|taxi| taxi.status(now, self.staleness_window))
    }

    pub fn taxis(&self) -> impl Iterator<Item = &Taxi> {
        self.taxis.values()
    }

    pub fn len(&self) -> usize {
        self.taxis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taxis.is_empty()
    }

    pub fn fleet_counts(&self, now: SimTime) -> FleetCounts {
        let mut counts = FleetCounts::default();
        for taxi in self.taxis.values() {
            counts.add(taxi.status(now, self.staleness_window));
        }
        counts
    }

    /// Reloads taxis from a checkpoint taken at `taken_at`. This is a
    /// process-level reset: any EnRoute reservation is dropped and the taxi
    /// comes back Free. Timestamps are capped at `taken_at` so reports made
    /// after the restart are never mistaken for old ones.
    pub fn restore(&mut self, taxis: impl IntoIterator<Item = Taxi>, taken_at: SimTime) {
        self.taxis.clear();
        for mut taxi in taxis {
            taxi.last_update = taxi.last_update.min(taken_at);
            taxi.last_completion_at = taxi.last_completion_at.map(|at| at.min(taken_at));
            if !self.bounds.contains(taxi.position) {
                taxi.position = self
                    .bounds
                    .clamp(i64::from(taxi.position.x), i64::from(taxi.position.y));
            }
            if taxi.availability == Availability::EnRoute {
                taxi.availability = Availability::Free;
            }
            self.taxis.insert(taxi.id, taxi);
        }
        info!(taxis = self.taxis.len(), "registry restored from checkpoint");
    }
}

impl TaxiPool for SpatialTaxiRegistry {
    fn nearest_available(
        &self,
        target: GridPos,
        now: SimTime,
        exclude: &[TaxiId],
    ) -> Option<MatchCandidate> {
        self.find_nearest_available_excluding(target, now, exclude)
    }

    fn try_reserve(
        &mut self,
        taxi_id: TaxiId,
        pickup: GridPos,
        now: SimTime,
    ) -> Result<(), DispatchError> {
        let window = self.staleness_window;
        let taxi = self.get_mut(taxi_id)?;
        if taxi.availability == Availability::Free && taxi.is_stale(now, window) {
            return Err(DispatchError::StaleTaxiData {
                taxi_id,
                last_update: taxi.last_update,
            });
        }
        self.reserve(taxi_id)?;
        let taxi = self.get_mut(taxi_id)?;
        taxi.service_log.push(ServiceLeg {
            from: taxi.position,
            pickup,
        });
        Ok(())
    }
}
