//! The single owned state of the coordinator.
//!
//! [Dispatcher] bundles the registry, the request tracker, the assignment
//! engine and the recorder. Every mutation goes through `&mut self`, so the
//! runner only has to feed events in one at a time to keep reservation and
//! request resolution atomic with respect to each other.

use std::mem;

use tracing::{debug, info, warn};

use crate::agents::{RequestId, RequesterId, SpeedClass, TaxiId};
use crate::clock::{CheckpointTimer, SimTime};
use crate::config::{DispatchConfig, RejectionPolicy};
use crate::error::DispatchError;
use crate::grid::GridPos;
use crate::lifecycle::{AssignmentOutcome, RequestLifecycleTracker};
use crate::matching::AssignmentEngine;
use crate::messages::{DispatchEvent, RejectReason, RideReply, TaxiNotice};
use crate::recorder::{InteractionEvent, StateRecorder};
use crate::registry::{ReportOutcome, SpatialTaxiRegistry};
use crate::telemetry::{DispatchSnapshot, SnapshotHistory};

/// What happened to a ride request as soon as it was handled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RideOutcome {
    /// Final answer for the requester.
    Replied(RideReply),
    /// Still waiting for a taxi; the reply arrives later from [Dispatcher::tick].
    Pending(RequestId),
}

/// Work produced by one timer tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Late replies for requests that were left Pending.
    pub replies: Vec<(RequestId, RideReply)>,
    /// Checkpoint due at this tick, already added to the history but not
    /// yet written to disk.
    pub snapshot: Option<DispatchSnapshot>,
}

enum Attempt {
    Assigned(RideReply),
    NoTaxi,
}

#[derive(Debug)]
pub struct Dispatcher {
    config: DispatchConfig,
    registry: SpatialTaxiRegistry,
    tracker: RequestLifecycleTracker,
    engine: AssignmentEngine,
    recorder: StateRecorder,
    timer: CheckpointTimer,
    notices: Vec<TaxiNotice>,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            registry: SpatialTaxiRegistry::from_config(&config),
            tracker: RequestLifecycleTracker::from_config(&config),
            engine: AssignmentEngine::new(),
            recorder: StateRecorder::from_config(&config),
            timer: CheckpointTimer::new(config.snapshot_interval),
            notices: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &SpatialTaxiRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &RequestLifecycleTracker {
        &self.tracker
    }

    pub fn recorder(&self) -> &StateRecorder {
        &self.recorder
    }

    pub fn history(&self) -> &SnapshotHistory {
        self.recorder.history()
    }

    pub fn into_history(self) -> SnapshotHistory {
        self.recorder.into_history()
    }

    /// Applies one validated event. Returns an outcome only for ride requests.
    pub fn handle(&mut self, event: DispatchEvent, now: SimTime) -> Option<RideOutcome> {
        match event {
            DispatchEvent::PositionUpdate {
                taxi_id,
                position,
                timestamp,
                speed,
            } => {
                self.on_position(taxi_id, position, timestamp, speed, now);
                None
            }
            DispatchEvent::RideRequest {
                requester_id,
                pickup,
            } => Some(self.request_ride(requester_id, pickup, now)),
            DispatchEvent::CompletionNotice { taxi_id, timestamp } => {
                self.on_completion(taxi_id, timestamp, now);
                None
            }
            DispatchEvent::ShiftEnded { taxi_id, timestamp } => {
                self.on_shift_ended(taxi_id, timestamp, now);
                None
            }
        }
    }

    fn on_position(
        &mut self,
        taxi_id: TaxiId,
        position: GridPos,
        timestamp: SimTime,
        speed: Option<SpeedClass>,
        now: SimTime,
    ) {
        match self
            .registry
            .report_position(taxi_id, position, timestamp, speed)
        {
            Ok(ReportOutcome::Registered) => {
                if let Some(taxi) = self.registry.get(taxi_id) {
                    let event = InteractionEvent::Registered {
                        taxi_id,
                        position,
                        speed: taxi.speed,
                        at: now,
                    };
                    self.log(&event);
                }
            }
            Ok(ReportOutcome::Updated | ReportOutcome::Ignored) => {}
            Err(err) => warn!(taxi_id, %err, "position report dropped"),
        }
    }

    /// Submits a request and tries to serve it right away.
    pub fn request_ride(
        &mut self,
        requester_id: RequesterId,
        pickup: GridPos,
        now: SimTime,
    ) -> RideOutcome {
        let request_id = match self.tracker.submit(requester_id, pickup, now) {
            Ok(id) => id,
            Err(err) => {
                info!(requester_id, %err, "ride request refused");
                self.log(&InteractionEvent::Rejected {
                    request_id: None,
                    requester_id,
                    pickup,
                    reason: RejectReason::DuplicateRequest,
                    at: now,
                });
                return RideOutcome::Replied(RideReply::Rejected {
                    reason: RejectReason::DuplicateRequest,
                });
            }
        };

        match self.attempt_assignment(request_id, now) {
            Attempt::Assigned(reply) => RideOutcome::Replied(reply),
            Attempt::NoTaxi => match self.config.rejection_policy {
                RejectionPolicy::Immediate => RideOutcome::Replied(self.reject(request_id, now)),
                RejectionPolicy::RetryUntilTimeout => {
                    debug!(request_id, requester_id, "no taxi yet, request stays pending");
                    RideOutcome::Pending(request_id)
                }
            },
        }
    }

    fn attempt_assignment(&mut self, request_id: RequestId, now: SimTime) -> Attempt {
        let Some(request) = self.tracker.request(request_id).cloned() else {
            return Attempt::NoTaxi;
        };

        let assignment = match self.engine.try_assign(&mut self.registry, &request, now) {
            Ok(assignment) => assignment,
            Err(DispatchError::NoTaxiAvailable { .. }) => return Attempt::NoTaxi,
            Err(err) => {
                warn!(request_id, %err, "assignment attempt failed");
                return Attempt::NoTaxi;
            }
        };

        if let Err(err) = self.tracker.on_assignment_result(
            request_id,
            AssignmentOutcome::Assigned(assignment),
            now,
        ) {
            warn!(request_id, taxi_id = assignment.taxi_id, %err, "assignment not committed");
            if let Err(err) = self.registry.release(assignment.taxi_id) {
                warn!(taxi_id = assignment.taxi_id, %err, "failed to undo reservation");
            }
            return Attempt::NoTaxi;
        }

        info!(
            request_id,
            requester_id = assignment.requester_id,
            taxi_id = assignment.taxi_id,
            distance = assignment.distance,
            eta = assignment.estimated_response_time,
            "taxi assigned"
        );
        self.log(&InteractionEvent::Assigned(assignment));
        self.notices.push(TaxiNotice::Dispatched {
            taxi_id: assignment.taxi_id,
            requester_id: assignment.requester_id,
            pickup: assignment.pickup,
        });
        Attempt::Assigned(RideReply::Assigned {
            taxi_id: assignment.taxi_id,
            estimated_response_time: assignment.estimated_response_time,
        })
    }

    fn reject(&mut self, request_id: RequestId, now: SimTime) -> RideReply {
        let reason = RejectReason::NoTaxiAvailable;
        match self.tracker.on_assignment_result(
            request_id,
            AssignmentOutcome::Rejected(reason),
            now,
        ) {
            Ok(request) => {
                info!(request_id, requester_id = request.requester_id, "no taxi available");
                self.log(&InteractionEvent::Rejected {
                    request_id: Some(request_id),
                    requester_id: request.requester_id,
                    pickup: request.pickup,
                    reason,
                    at: now,
                });
            }
            Err(err) => warn!(request_id, %err, "rejection not recorded"),
        }
        RideReply::Rejected { reason }
    }

    fn on_completion(&mut self, taxi_id: TaxiId, timestamp: SimTime, now: SimTime) {
        let Some(request_id) = self.tracker.assigned_request_for(taxi_id) else {
            warn!(taxi_id, "completion from a taxi with no active assignment");
            return;
        };
        let assigned_at = self
            .tracker
            .request(request_id)
            .and_then(|request| request.assignment)
            .map_or(0, |assignment| assignment.assigned_at);
        let last_completion = self
            .registry
            .get(taxi_id)
            .and_then(|taxi| taxi.last_completion_at);
        // A redelivered notice for an earlier service must not close the current one.
        if timestamp < assigned_at || last_completion.is_some_and(|last| timestamp <= last) {
            warn!(
                taxi_id,
                request_id,
                timestamp,
                assigned_at,
                ?last_completion,
                "ignoring completion that predates the current assignment"
            );
            return;
        }

        let request = match self.tracker.complete(request_id, &mut self.registry, now) {
            Ok(request) => request,
            Err(err) => {
                warn!(taxi_id, request_id, %err, "completion rejected");
                return;
            }
        };
        if let Err(err) = self.registry.touch(taxi_id, timestamp) {
            debug!(taxi_id, %err, "completion timestamp not applied");
        }
        self.log(&InteractionEvent::Completed {
            request_id,
            requester_id: request.requester_id,
            taxi_id,
            distance: request.assignment.map_or(0, |a| a.distance),
            at: now,
        });

        match self
            .registry
            .note_service_completed(taxi_id, timestamp, self.config.max_services_per_shift)
        {
            Ok(true) => self.announce_shift_over(taxi_id, now),
            Ok(false) => {}
            Err(err) => warn!(taxi_id, %err, "service count not updated"),
        }
    }

    fn on_shift_ended(&mut self, taxi_id: TaxiId, timestamp: SimTime, now: SimTime) {
        if let Err(err) = self.registry.end_shift(taxi_id) {
            warn!(taxi_id, %err, "shift end from unknown taxi");
            return;
        }
        if let Err(err) = self.registry.touch(taxi_id, timestamp) {
            debug!(taxi_id, %err, "shift end timestamp not applied");
        }
        self.announce_shift_over(taxi_id, now);
    }

    fn announce_shift_over(&mut self, taxi_id: TaxiId, now: SimTime) {
        let services = self
            .registry
            .get(taxi_id)
            .map_or(0, |taxi| taxi.services_completed);
        self.log(&InteractionEvent::ShiftOver {
            taxi_id,
            services,
            at: now,
        });
        self.notices.push(TaxiNotice::ShiftOver { taxi_id });
    }

    /// Periodic housekeeping: expire old requests, retry pending ones under
    /// [RejectionPolicy::RetryUntilTimeout], and capture a checkpoint when due.
    pub fn tick(&mut self, now: SimTime) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        for request in self.tracker.check_timeouts(now) {
            let waited = request.age(now);
            info!(request_id = request.id, waited, "request timed out");
            self.log(&InteractionEvent::TimedOut {
                request_id: request.id,
                requester_id: request.requester_id,
                pickup: request.pickup,
                waited,
                at: now,
            });
            outcome.replies.push((request.id, RideReply::TimedOut));
        }

        if self.config.rejection_policy == RejectionPolicy::RetryUntilTimeout {
            for request_id in self.tracker.pending_ids() {
                if let Attempt::Assigned(reply) = self.attempt_assignment(request_id, now) {
                    outcome.replies.push((request_id, reply));
                }
            }
        }

        if self.timer.fire_if_due(now) {
            let snapshot = StateRecorder::capture(&self.registry, &self.tracker, now);
            self.recorder.record(&snapshot);
            info!(
                taken_at = now,
                free = snapshot.fleet.free,
                en_route = snapshot.fleet.en_route,
                completed = snapshot.counts.completed,
                rejected = snapshot.counts.rejected,
                "checkpoint captured"
            );
            outcome.snapshot = Some(snapshot);
        }

        outcome
    }

    /// Writes a checkpoint synchronously. Failures are logged, never returned.
    pub fn persist(&self, snapshot: &DispatchSnapshot) {
        if let Err(err) = self.recorder.writer().write(snapshot) {
            warn!(%err, "checkpoint write failed");
        }
    }

    /// Outbound notices produced since the last drain, in emission order.
    pub fn drain_notices(&mut self) -> Vec<TaxiNotice> {
        mem::take(&mut self.notices)
    }

    /// Loads the checkpoint file, if any, into the registry and counters.
    /// Returns the checkpoint's `taken_at` when state was restored.
    pub fn restore(&mut self) -> Option<SimTime> {
        match self.recorder.load_snapshot() {
            Ok(Some(snapshot)) => {
                let taken_at = snapshot.taken_at;
                self.restore_from(snapshot);
                Some(taken_at)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(%err, "ignoring unreadable checkpoint");
                None
            }
        }
    }

    pub fn restore_from(&mut self, snapshot: DispatchSnapshot) {
        info!(
            taken_at = snapshot.taken_at,
            taxis = snapshot.taxis.len(),
            "restoring from checkpoint"
        );
        self.tracker.restore_counts(snapshot.counts);
        self.tracker.resume_ids_from(snapshot.next_request_id);
        self.timer.rearm(snapshot.taken_at);
        self.registry
            .restore(snapshot.taxis.into_iter().map(|entry| entry.taxi), snapshot.taken_at);
    }

    /// Final checkpoint plus a shutdown line in the interaction log.
    pub fn shutdown(&mut self, now: SimTime) -> DispatchSnapshot {
        let snapshot = self.finish(now);
        self.persist(&snapshot);
        snapshot
    }

    /// Captures the final checkpoint and logs the shutdown, leaving the
    /// disk write to the caller.
    pub fn finish(&mut self, now: SimTime) -> DispatchSnapshot {
        let snapshot = StateRecorder::capture(&self.registry, &self.tracker, now);
        self.recorder.record(&snapshot);
        self.log(&InteractionEvent::Shutdown {
            counts: snapshot.counts,
            at: now,
        });
        info!(
            at = now,
            assigned = snapshot.counts.assigned,
            completed = snapshot.counts.completed,
            rejected = snapshot.counts.rejected,
            timed_out = snapshot.counts.timed_out,
            "coordinator shut down"
        );
        snapshot
    }

    fn log(&mut self, event: &InteractionEvent) {
        if let Err(err) = self.recorder.append_interaction(event) {
            warn!(%err, "interaction log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::agents::Availability;
    use crate::lifecycle::RequestState;

    fn dispatcher(dir: &tempfile::TempDir) -> Dispatcher {
        Dispatcher::new(
            DispatchConfig::default()
                .with_grid(20, 20)
                .with_state_dir(dir.path()),
        )
    }

    fn position(taxi_id: TaxiId, x: u32, y: u32, timestamp: SimTime) -> DispatchEvent {
        DispatchEvent::PositionUpdate {
            taxi_id,
            position: GridPos::new(x, y),
            timestamp,
            speed: Some(SpeedClass::Two),
        }
    }

    fn log_lines(dir: &tempfile::TempDir) -> Vec<String> {
        fs::read_to_string(dir.path().join("interactions.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn ride_request_is_assigned_and_taxi_notified() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut dispatcher = dispatcher(&dir);
        dispatcher.handle(position(1, 0, 0, 0), 0);

        let outcome = dispatcher.request_ride(7, GridPos::new(3, 2), 1);
        assert_eq!(
            outcome,
            RideOutcome::Replied(RideReply::Assigned {
                taxi_id: 1,
                estimated_response_time: 2.5,
            })
        );
        assert_eq!(
            dispatcher.drain_notices(),
            vec![TaxiNotice::Dispatched {
                taxi_id: 1,
                requester_id: 7,
                pickup: GridPos::new(3, 2),
            }]
        );
        assert!(dispatcher.drain_notices().is_empty());

        let lines = log_lines(&dir);
        assert!(lines[0].contains("registered taxi=1"));
        assert!(lines[1].contains("assigned request=1 requester=7 taxi=1"));
    }

    #[test]
    fn immediate_policy_rejects_when_fleet_is_busy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut dispatcher = dispatcher(&dir);
        dispatcher.handle(position(1, 0, 0, 0), 0);
        dispatcher.request_ride(1, GridPos::new(1, 1), 1);

        let outcome = dispatcher.request_ride(2, GridPos::new(1, 1), 1);
        assert_eq!(
            outcome,
            RideOutcome::Replied(RideReply::Rejected {
                reason: RejectReason::NoTaxiAvailable
            })
        );
        assert_eq!(dispatcher.tracker().counts().rejected, 1);
        assert_eq!(dispatcher.tracker().pending_len(), 0);
    }

    #[test]
    fn retry_policy_serves_pending_request_once_a_taxi_frees_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut dispatcher = Dispatcher::new(
            DispatchConfig::default()
                .with_grid(20, 20)
                .with_state_dir(dir.path())
                .with_rejection_policy(RejectionPolicy::RetryUntilTimeout),
        );
        dispatcher.handle(position(1, 0, 0, 0), 0);
        dispatcher.request_ride(1, GridPos::new(1, 1), 1);

        let RideOutcome::Pending(waiting) = dispatcher.request_ride(2, GridPos::new(4, 4), 2) else {
            panic!("second request should wait");
        };
        assert!(dispatcher.tick(3).replies.is_empty());

        dispatcher.handle(
            DispatchEvent::CompletionNotice {
                taxi_id: 1,
                timestamp: 4,
            },
            4,
        );
        let tick = dispatcher.tick(5);
        assert_eq!(tick.replies.len(), 1);
        assert_eq!(tick.replies[0].0, waiting);
        assert!(matches!(
            tick.replies[0].1,
            RideReply::Assigned { taxi_id: 1, .. }
        ));
    }

    #[test]
    fn duplicate_request_is_refused_without_touching_the_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut dispatcher = Dispatcher::new(
            DispatchConfig::default()
                .with_state_dir(dir.path())
                .with_rejection_policy(RejectionPolicy::RetryUntilTimeout),
        );

        let first = dispatcher.request_ride(3, GridPos::new(0, 0), 0);
        assert!(matches!(first, RideOutcome::Pending(_)));
        let second = dispatcher.request_ride(3, GridPos::new(1, 1), 1);
        assert_eq!(
            second,
            RideOutcome::Replied(RideReply::Rejected {
                reason: RejectReason::DuplicateRequest
            })
        );
        assert_eq!(dispatcher.tracker().pending_len(), 1);
    }

    #[test]
    fn shift_limit_takes_taxi_off_duty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut dispatcher = Dispatcher::new(
            DispatchConfig::default()
                .with_state_dir(dir.path())
                .with_shift_limit(Some(2)),
        );
        dispatcher.handle(position(1, 5, 5, 0), 0);

        for (requester, t) in [(1, 1), (2, 3)] {
            dispatcher.request_ride(requester, GridPos::new(6, 6), t);
            dispatcher.handle(
                DispatchEvent::CompletionNotice {
                    taxi_id: 1,
                    timestamp: t + 1,
                },
                t + 1,
            );
        }

        let taxi = dispatcher.registry().get(1).expect("taxi");
        assert_eq!(taxi.availability, Availability::OffDuty);
        assert_eq!(taxi.services_completed, 2);
        assert!(dispatcher
            .drain_notices()
            .contains(&TaxiNotice::ShiftOver { taxi_id: 1 }));

        let outcome = dispatcher.request_ride(3, GridPos::new(5, 5), 6);
        assert!(matches!(
            outcome,
            RideOutcome::Replied(RideReply::Rejected { .. })
        ));
    }

    #[test]
    fn stray_completion_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut dispatcher = dispatcher(&dir);
        dispatcher.handle(position(1, 0, 0, 0), 0);

        dispatcher.handle(
            DispatchEvent::CompletionNotice {
                taxi_id: 1,
                timestamp: 1,
            },
            1,
        );
        dispatcher.handle(
            DispatchEvent::CompletionNotice {
                taxi_id: 99,
                timestamp: 1,
            },
            1,
        );

        assert_eq!(dispatcher.tracker().counts().completed, 0);
        assert_eq!(
            dispatcher.registry().get(1).expect("taxi").services_completed,
            0
        );
    }

    #[test]
    fn tick_captures_checkpoint_on_interval() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut dispatcher = dispatcher(&dir);
        dispatcher.handle(position(1, 0, 0, 0), 0);

        assert!(dispatcher.tick(59).snapshot.is_none());
        let snapshot = dispatcher.tick(60).snapshot.expect("due at 60");
        assert_eq!(snapshot.taken_at, 60);
        assert!(dispatcher.tick(61).snapshot.is_none());
        assert_eq!(dispatcher.history().len(), 1);

        dispatcher.persist(&snapshot);
        assert!(dir.path().join("dispatch_state.json").exists());
    }

    #[test]
    fn restore_resets_reservations_and_keeps_counts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut dispatcher = dispatcher(&dir);
        dispatcher.handle(position(1, 2, 2, 0), 0);
        dispatcher.handle(position(2, 9, 9, 0), 0);
        dispatcher.request_ride(1, GridPos::new(2, 3), 1);
        dispatcher.handle(DispatchEvent::ShiftEnded { taxi_id: 2, timestamp: 2 }, 2);
        dispatcher.shutdown(3);

        let mut restarted = Dispatcher::new(dispatcher.config().clone());
        assert!(restarted.restore().is_some());
        assert_eq!(restarted.tracker().counts().assigned, 1);
        assert_eq!(
            restarted.registry().get(1).expect("taxi").availability,
            Availability::Free
        );
        assert_eq!(
            restarted.registry().get(2).expect("taxi").availability,
            Availability::OffDuty
        );
        assert!(log_lines(&dir)
            .last()
            .is_some_and(|line| line.contains("shutdown assigned=1")));
    }

    #[test]
    fn tracker_state_follows_dispatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut dispatcher = dispatcher(&dir);
        dispatcher.handle(position(4, 1, 1, 0), 0);
        dispatcher.request_ride(8, GridPos::new(1, 2), 0);

        let request = dispatcher.tracker().request(1).expect("active");
        assert_eq!(request.state, RequestState::Assigned);
        assert_eq!(dispatcher.tracker().assigned_request_for(4), Some(1));
    }
}
