//! Simulated taxi: random walk while idle, drive-serve-return when dispatched.

use dispatch_core::agents::{SpeedClass, TaxiId};
use dispatch_core::clock::SimTime;
use dispatch_core::grid::{GridBounds, GridPos};
use dispatch_core::messages::{InboundMessage, TaxiNotice};
use dispatch_core::runner::CoordinatorHandle;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast::error::RecvError;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STEPS: [(i64, i64); 4] = [(0, 1), (0, -1), (1, 0), (-1, 0)];

/// How far and how often an idle taxi moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub cells: u32,
    pub every: SimTime,
}

pub fn cadence(speed: SpeedClass) -> Cadence {
    match speed {
        SpeedClass::One => Cadence { cells: 1, every: 2 },
        SpeedClass::Two => Cadence { cells: 1, every: 1 },
        SpeedClass::Four => Cadence { cells: 2, every: 1 },
    }
}

/// One cell in a random cardinal direction. A step that would leave the grid
/// is dropped and the taxi stays put.
pub fn random_step<R: Rng>(rng: &mut R, from: GridPos, bounds: GridBounds) -> GridPos {
    let (dx, dy) = STEPS[rng.gen_range(0..STEPS.len())];
    bounds
        .checked_pos(i64::from(from.x) + dx, i64::from(from.y) + dy)
        .unwrap_or(from)
}

pub fn walk<R: Rng>(rng: &mut R, from: GridPos, bounds: GridBounds, cells: u32) -> GridPos {
    (0..cells).fold(from, |pos, _| random_step(rng, pos, bounds))
}

#[derive(Debug, Clone)]
pub struct TaxiPlan {
    pub taxi_id: TaxiId,
    pub start: GridPos,
    pub speed: SpeedClass,
    pub seed: u64,
    /// Time units spent with a passenger before reporting completion.
    pub service_duration: SimTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxiSummary {
    pub taxi_id: TaxiId,
    pub services: u32,
    pub final_position: GridPos,
    pub shift_over: bool,
}

struct TaxiAgent {
    plan: TaxiPlan,
    handle: CoordinatorHandle,
    position: GridPos,
    last_sent: Option<SimTime>,
    services: u32,
}

impl TaxiAgent {
    /// Coordinator time, bumped so consecutive reports never share a timestamp.
    fn next_timestamp(&mut self) -> SimTime {
        let now = self.handle.now();
        let ts = match self.last_sent {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        self.last_sent = Some(ts);
        ts
    }

    async fn report_position(&mut self) -> bool {
        let timestamp = self.next_timestamp();
        let message = InboundMessage::PositionUpdate {
            taxi_id: self.plan.taxi_id,
            x: i64::from(self.position.x),
            y: i64::from(self.position.y),
            timestamp,
            speed: Some(u8::from(self.plan.speed)),
        };
        self.handle.publish(message).await.is_ok()
    }

    /// Drive to the pickup, carry the passenger, report, head home.
    /// Returns `false` if cancelled or the coordinator went away.
    async fn serve(&mut self, pickup: GridPos, cancel: &CancellationToken) -> bool {
        self.position = pickup;
        if !self.report_position().await {
            return false;
        }

        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = time::sleep(self.handle.clock().units(self.plan.service_duration)) => {}
        }

        let timestamp = self.next_timestamp();
        let done = InboundMessage::CompletionNotice {
            taxi_id: self.plan.taxi_id,
            timestamp,
        };
        if self.handle.publish(done).await.is_err() {
            return false;
        }
        self.services += 1;
        info!(taxi_id = self.plan.taxi_id, services = self.services, "service completed");

        self.position = self.plan.start;
        self.report_position().await
    }
}

/// Runs one taxi until cancelled, told its shift is over, or the
/// coordinator stops.
pub async fn run_taxi(
    handle: CoordinatorHandle,
    plan: TaxiPlan,
    cancel: CancellationToken,
) -> TaxiSummary {
    let mut notices = handle.subscribe_notices();
    let mut rng = StdRng::seed_from_u64(plan.seed);
    let bounds = handle.bounds();
    let step = cadence(plan.speed);
    let mut agent = TaxiAgent {
        position: plan.start,
        plan,
        handle,
        last_sent: None,
        services: 0,
    };
    let taxi_id = agent.plan.taxi_id;
    let mut shift_over = false;

    let mut ticker = time::interval(agent.handle.clock().units(step.every));
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // First tick completes immediately; it doubles as the registration report.
    ticker.tick().await;
    if agent.report_position().await {
        debug!(taxi_id, position = %agent.position, "taxi on duty");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                notice = notices.recv() => match notice {
                    Ok(TaxiNotice::Dispatched { taxi_id: id, requester_id, pickup }) if id == taxi_id => {
                        info!(taxi_id, requester_id, %pickup, "dispatched");
                        if !agent.serve(pickup, &cancel).await {
                            break;
                        }
                        ticker.reset();
                    }
                    Ok(TaxiNotice::ShiftOver { taxi_id: id }) if id == taxi_id => {
                        info!(taxi_id, services = agent.services, "shift over");
                        shift_over = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(taxi_id, missed, "taxi fell behind on notices");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => {
                    agent.position = walk(&mut rng, agent.position, bounds, step.cells);
                    if !agent.report_position().await {
                        break;
                    }
                }
            }
        }
    }

    TaxiSummary {
        taxi_id,
        services: agent.services,
        final_position: agent.position,
        shift_over,
    }
}
