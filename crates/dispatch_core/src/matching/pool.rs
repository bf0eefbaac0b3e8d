use crate::agents::TaxiId;
use crate::clock::SimTime;
use crate::error::DispatchError;
use crate::grid::GridPos;

use super::types::MatchCandidate;

/// Source of reservable taxis for the [AssignmentEngine](super::AssignmentEngine).
///
/// [SpatialTaxiRegistry](crate::registry::SpatialTaxiRegistry) is the production
/// implementation. Keeping the engine behind this trait lets it be exercised
/// against pools whose reservations can fail between query and reserve.
pub trait TaxiPool {
    /// Nearest Free, non-stale taxi to `target`, skipping any id in `exclude`.
    /// Must break distance ties by lowest taxi id.
    fn nearest_available(
        &self,
        target: GridPos,
        now: SimTime,
        exclude: &[TaxiId],
    ) -> Option<MatchCandidate>;

    /// Atomically reserve `taxi_id` for a pickup at `pickup`.
    ///
    /// Fails with `AlreadyReserved` when the taxi is no longer Free, or
    /// `StaleTaxiData` when it has gone silent since it was selected.
    fn try_reserve(
        &mut self,
        taxi_id: TaxiId,
        pickup: GridPos,
        now: SimTime,
    ) -> Result<(), DispatchError>;
}
