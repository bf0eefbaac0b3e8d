use tracing::debug;

use crate::clock::SimTime;
use crate::error::DispatchError;
use crate::lifecycle::Request;

use super::pool::TaxiPool;
use super::types::{estimate_response_time, Assignment};

/// One initial query plus one re-query.
const MAX_ATTEMPTS: usize = 2;

/// Nearest-available matching with a single retry.
///
/// For each request the engine asks the pool for the nearest Free taxi and
/// tries to reserve it. If the pool has nothing, or the reservation is lost
/// to a concurrent assignment, the query is repeated once with the failed
/// candidate excluded. A second failure is reported as `NoTaxiAvailable`;
/// whether to resubmit is left to the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssignmentEngine;

impl AssignmentEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn try_assign<P>(
        &self,
        pool: &mut P,
        request: &Request,
        now: SimTime,
    ) -> Result<Assignment, DispatchError>
    where
        P: TaxiPool + ?Sized,
    {
        let mut excluded = Vec::with_capacity(MAX_ATTEMPTS);

        for attempt in 1..=MAX_ATTEMPTS {
            let Some(candidate) = pool.nearest_available(request.pickup, now, &excluded) else {
                debug!(request_id = request.id, attempt, "no free taxi found");
                continue;
            };

            match pool.try_reserve(candidate.taxi_id, request.pickup, now) {
                Ok(()) => {
                    return Ok(Assignment {
                        request_id: request.id,
                        requester_id: request.requester_id,
                        taxi_id: candidate.taxi_id,
                        taxi_position: candidate.position,
                        pickup: request.pickup,
                        distance: candidate.distance,
                        assigned_at: now,
                        estimated_response_time: estimate_response_time(
                            candidate.distance,
                            candidate.speed,
                        ),
                    });
                }
                Err(
                    err @ (DispatchError::AlreadyReserved { .. }
                    | DispatchError::StaleTaxiData { .. }),
                ) => {
                    debug!(
                        request_id = request.id,
                        taxi_id = candidate.taxi_id,
                        attempt,
                        %err,
                        "reservation lost, re-querying"
                    );
                    excluded.push(candidate.taxi_id);
                }
                Err(err) => return Err(err),
            }
        }

        Err(DispatchError::NoTaxiAvailable {
            requester_id: request.requester_id,
        })
    }
}
