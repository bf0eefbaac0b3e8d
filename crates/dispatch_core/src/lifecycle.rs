//! In-flight ride requests and their state machine.
//!
//! ```text
//! Pending ──► Assigned ──► Completed
//!    │
//!    ├──► Rejected
//!    └──► TimedOut
//! ```
//!
//! Rejected, TimedOut and Completed are terminal: the request is removed from
//! the tracker and only survives in the interaction log and aggregate counts.
//! Every transition checks the current state, so a request can be resolved at
//! most once.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::agents::{RequestId, RequesterId, TaxiId};
use crate::clock::SimTime;
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::grid::GridPos;
use crate::matching::Assignment;
use crate::messages::RejectReason;
use crate::registry::SpatialTaxiRegistry;
use crate::telemetry::DispatchCounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Assigned,
    Rejected,
    TimedOut,
    Completed,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Rejected | RequestState::TimedOut | RequestState::Completed
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub requester_id: RequesterId,
    pub pickup: GridPos,
    pub arrived_at: SimTime,
    pub state: RequestState,
    pub assignment: Option<Assignment>,
    /// When the request left Pending.
    pub resolved_at: Option<SimTime>,
}

impl Request {
    pub fn age(&self, now: SimTime) -> SimTime {
        now.saturating_sub(self.arrived_at)
    }
}

/// Result of one assignment attempt, fed back into the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AssignmentOutcome {
    Assigned(Assignment),
    Rejected(RejectReason),
}

#[derive(Debug)]
pub struct RequestLifecycleTracker {
    timeout: SimTime,
    next_id: RequestId,
    /// Pending and Assigned requests.
    active: HashMap<RequestId, Request>,
    pending_by_requester: HashMap<RequesterId, RequestId>,
    assigned_by_taxi: HashMap<TaxiId, RequestId>,
    counts: DispatchCounts,
}

impl RequestLifecycleTracker {
    pub fn new(timeout: SimTime) -> Self {
        Self {
            timeout,
            next_id: 1,
            active: HashMap::new(),
            pending_by_requester: HashMap::new(),
            assigned_by_taxi: HashMap::new(),
            counts: DispatchCounts::default(),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.request_timeout)
    }

    pub fn timeout(&self) -> SimTime {
        self.timeout
    }

    /// Registers a new Pending request. A requester may only have one Pending
    /// request at a time.
    pub fn submit(
        &mut self,
        requester_id: RequesterId,
        pickup: GridPos,
        now: SimTime,
    ) -> Result<RequestId, DispatchError> {
        if let Some(&request_id) = self.pending_by_requester.get(&requester_id) {
            return Err(DispatchError::DuplicateRequest {
                requester_id,
                request_id,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.active.insert(
            id,
            Request {
                id,
                requester_id,
                pickup,
                arrived_at: now,
                state: RequestState::Pending,
                assignment: None,
                resolved_at: None,
            },
        );
        self.pending_by_requester.insert(requester_id, id);
        info!(request_id = id, requester_id, %pickup, "ride request received");
        Ok(id)
    }

    pub fn request(&self, request_id: RequestId) -> Option<&Request> {
        self.active.get(&request_id)
    }

    /// Pending → Assigned or Pending → Rejected.
    ///
    /// Returns the updated request; a rejected request is archived (removed)
    /// and returned by value.
    pub fn on_assignment_result(
        &mut self,
        request_id: RequestId,
        outcome: AssignmentOutcome,
        now: SimTime,
    ) -> Result<Request, DispatchError> {
        let target = match outcome {
            AssignmentOutcome::Assigned(_) => RequestState::Assigned,
            AssignmentOutcome::Rejected(_) => RequestState::Rejected,
        };
        self.expect_state(request_id, RequestState::Pending, target)?;

        if let AssignmentOutcome::Assigned(assignment) = outcome {
            if let Some(&holder) = self.assigned_by_taxi.get(&assignment.taxi_id) {
                // The registry should have refused the reservation already.
                error!(
                    taxi_id = assignment.taxi_id,
                    holder, request_id, "taxi already serves another request"
                );
                return Err(DispatchError::AlreadyReserved {
                    taxi_id: assignment.taxi_id,
                });
            }
        }

        let mut request = self
            .active
            .remove(&request_id)
            .ok_or(DispatchError::UnknownRequest(request_id))?;
        self.pending_by_requester.remove(&request.requester_id);
        request.state = target;
        request.resolved_at = Some(now);

        match outcome {
            AssignmentOutcome::Assigned(assignment) => {
                request.assignment = Some(assignment);
                self.assigned_by_taxi.insert(assignment.taxi_id, request_id);
                self.counts.assigned += 1;
                self.active.insert(request_id, request.clone());
            }
            AssignmentOutcome::Rejected(_) => {
                self.counts.rejected += 1;
            }
        }
        Ok(request)
    }

    /// Times out every Pending request whose age has reached the timeout.
    /// Returned requests are archived, ordered by id.
    pub fn check_timeouts(&mut self, now: SimTime) -> Vec<Request> {
        let mut expired: Vec<RequestId> = self
            .active
            .values()
            .filter(|r| r.state == RequestState::Pending && r.age(now) >= self.timeout)
            .map(|r| r.id)
            .collect();
        expired.sort_unstable();

        let mut timed_out = Vec::with_capacity(expired.len());
        for request_id in expired {
            if let Some(mut request) = self.active.remove(&request_id) {
                self.pending_by_requester.remove(&request.requester_id);
                request.state = RequestState::TimedOut;
                request.resolved_at = Some(now);
                self.counts.timed_out += 1;
                timed_out.push(request);
            }
        }
        timed_out
    }

    /// Assigned → Completed; returns the taxi to the registry.
    pub fn complete(
        &mut self,
        request_id: RequestId,
        registry: &mut SpatialTaxiRegistry,
        now: SimTime,
    ) -> Result<Request, DispatchError> {
        self.expect_state(request_id, RequestState::Assigned, RequestState::Completed)?;
        let taxi_id = self
            .active
            .get(&request_id)
            .and_then(|r| r.assignment)
            .map(|a| a.taxi_id)
            .ok_or(DispatchError::UnknownRequest(request_id))?;

        registry.release(taxi_id)?;

        let mut request = self
            .active
            .remove(&request_id)
            .ok_or(DispatchError::UnknownRequest(request_id))?;
        self.assigned_by_taxi.remove(&taxi_id);
        request.state = RequestState::Completed;
        self.counts.completed += 1;
        info!(request_id, taxi_id, at = now, "service completed");
        Ok(request)
    }

    /// The Assigned request a taxi is currently serving.
    pub fn assigned_request_for(&self, taxi_id: TaxiId) -> Option<RequestId> {
        self.assigned_by_taxi.get(&taxi_id).copied()
    }

    /// Ids of all Pending requests, oldest first.
    pub fn pending_ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self.pending_by_requester.values().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn pending_len(&self) -> usize {
        self.pending_by_requester.len()
    }

    pub fn assigned_len(&self) -> usize {
        self.assigned_by_taxi.len()
    }

    pub fn counts(&self) -> DispatchCounts {
        self.counts
    }

    /// Seeds aggregate counts from a checkpoint.
    pub fn restore_counts(&mut self, counts: DispatchCounts) {
        self.counts = counts;
    }

    pub fn next_request_id(&self) -> RequestId {
        self.next_id
    }

    /// Never hands out an id below `next`. The counter only moves forward.
    pub fn resume_ids_from(&mut self, next: RequestId) {
        self.next_id = self.next_id.max(next);
    }

    fn expect_state(
        &self,
        request_id: RequestId,
        expected: RequestState,
        to: RequestState,
    ) -> Result<(), DispatchError> {
        let request = self
            .active
            .get(&request_id)
            .ok_or(DispatchError::UnknownRequest(request_id))?;
        if request.state != expected {
            return Err(DispatchError::InvalidTransition {
                request_id,
                from: request.state,
                to,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Availability, SpeedClass};
    use crate::grid::GridBounds;

    fn assignment(request_id: RequestId, requester_id: RequesterId, taxi_id: TaxiId) -> Assignment {
        Assignment {
            request_id,
            requester_id,
            taxi_id,
            taxi_position: GridPos::new(0, 0),
            pickup: GridPos::new(1, 0),
            distance: 1,
            assigned_at: 0,
            estimated_response_time: 1.0,
        }
    }

    #[test]
    fn submit_rejects_second_pending_request_from_same_requester() {
        let mut tracker = RequestLifecycleTracker::new(60);
        let first = tracker.submit(7, GridPos::new(1, 1), 0).expect("first");

        let err = tracker
            .submit(7, GridPos::new(2, 2), 1)
            .expect_err("duplicate");
        assert_eq!(
            err,
            DispatchError::DuplicateRequest {
                requester_id: 7,
                request_id: first
            }
        );

        // A different requester is unaffected.
        assert!(tracker.submit(8, GridPos::new(2, 2), 1).is_ok());
    }

    #[test]
    fn requester_may_submit_again_once_assigned() {
        let mut tracker = RequestLifecycleTracker::new(60);
        let id = tracker.submit(7, GridPos::new(1, 1), 0).expect("submit");
        tracker
            .on_assignment_result(id, AssignmentOutcome::Assigned(assignment(id, 7, 1)), 0)
            .expect("assign");

        assert!(tracker.submit(7, GridPos::new(3, 3), 2).is_ok());
    }

    #[test]
    fn request_resolves_at_most_once() {
        let mut tracker = RequestLifecycleTracker::new(60);
        let id = tracker.submit(1, GridPos::new(0, 0), 0).expect("submit");

        let rejected = tracker
            .on_assignment_result(
                id,
                AssignmentOutcome::Rejected(RejectReason::NoTaxiAvailable),
                1,
            )
            .expect("reject");
        assert_eq!(rejected.state, RequestState::Rejected);
        assert!(rejected.state.is_terminal());

        let again = tracker.on_assignment_result(
            id,
            AssignmentOutcome::Assigned(assignment(id, 1, 1)),
            2,
        );
        assert_eq!(again, Err(DispatchError::UnknownRequest(id)));
        assert_eq!(tracker.counts().rejected, 1);
        assert_eq!(tracker.counts().assigned, 0);
    }

    #[test]
    fn assigned_request_cannot_be_reassigned() {
        let mut tracker = RequestLifecycleTracker::new(60);
        let id = tracker.submit(1, GridPos::new(0, 0), 0).expect("submit");
        tracker
            .on_assignment_result(id, AssignmentOutcome::Assigned(assignment(id, 1, 3)), 0)
            .expect("assign");

        let err = tracker
            .on_assignment_result(id, AssignmentOutcome::Assigned(assignment(id, 1, 4)), 1)
            .expect_err("already assigned");
        assert_eq!(
            err,
            DispatchError::InvalidTransition {
                request_id: id,
                from: RequestState::Assigned,
                to: RequestState::Assigned,
            }
        );
    }

    #[test]
    fn check_timeouts_expires_only_old_pending_requests() {
        let mut tracker = RequestLifecycleTracker::new(60);
        let old = tracker.submit(1, GridPos::new(0, 0), 0).expect("old");
        let young = tracker.submit(2, GridPos::new(0, 0), 30).expect("young");
        let assigned = tracker.submit(3, GridPos::new(0, 0), 0).expect("assigned");
        tracker
            .on_assignment_result(
                assigned,
                AssignmentOutcome::Assigned(assignment(assigned, 3, 9)),
                0,
            )
            .expect("assign");

        assert!(tracker.check_timeouts(59).is_empty());

        let expired = tracker.check_timeouts(60);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, old);
        assert_eq!(expired[0].state, RequestState::TimedOut);

        // Already archived; a later sweep does not report it again.
        let later = tracker.check_timeouts(90);
        assert_eq!(later.iter().map(|r| r.id).collect::<Vec<_>>(), vec![young]);
        assert_eq!(tracker.counts().timed_out, 2);
        assert_eq!(tracker.assigned_len(), 1);
    }

    #[test]
    fn complete_releases_taxi_and_counts_service() {
        let mut registry = SpatialTaxiRegistry::new(GridBounds::new(10, 10), 100, SpeedClass::One);
        registry
            .report_position(4, GridPos::new(0, 0), 0, None)
            .expect("report");
        registry.reserve(4).expect("reserve");

        let mut tracker = RequestLifecycleTracker::new(60);
        let id = tracker.submit(1, GridPos::new(1, 0), 0).expect("submit");
        tracker
            .on_assignment_result(id, AssignmentOutcome::Assigned(assignment(id, 1, 4)), 0)
            .expect("assign");
        assert_eq!(tracker.assigned_request_for(4), Some(id));

        let done = tracker.complete(id, &mut registry, 5).expect("complete");
        assert_eq!(done.state, RequestState::Completed);
        assert_eq!(registry.get(4).expect("taxi").availability, Availability::Free);
        assert_eq!(tracker.assigned_request_for(4), None);
        assert_eq!(tracker.counts().completed, 1);

        assert_eq!(
            tracker.complete(id, &mut registry, 6),
            Err(DispatchError::UnknownRequest(id))
        );
    }

    #[test]
    fn pending_request_cannot_complete() {
        let mut registry = SpatialTaxiRegistry::new(GridBounds::new(10, 10), 100, SpeedClass::One);
        let mut tracker = RequestLifecycleTracker::new(60);
        let id = tracker.submit(1, GridPos::new(1, 0), 0).expect("submit");

        assert_eq!(
            tracker.complete(id, &mut registry, 1),
            Err(DispatchError::InvalidTransition {
                request_id: id,
                from: RequestState::Pending,
                to: RequestState::Completed,
            })
        );
    }

    #[test]
    fn resumed_ids_only_move_forward() {
        let mut tracker = RequestLifecycleTracker::new(60);
        tracker.resume_ids_from(40);
        assert_eq!(tracker.submit(1, GridPos::new(0, 0), 0), Ok(40));

        tracker.resume_ids_from(7);
        assert_eq!(tracker.next_request_id(), 41);
    }
}
