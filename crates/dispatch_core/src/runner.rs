//! Async coordinator loop.
//!
//! All inbound traffic (position reports, completions, ride requests) is
//! funnelled into one bounded queue and applied to the [Dispatcher] one event
//! at a time. A timer ticks once per simulated time unit to expire requests,
//! retry pending ones and take checkpoints. Checkpoint files are written on
//! the blocking pool so a slow disk never stalls the loop.

use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::{RequestId, RequesterId};
use crate::clock::{SimClock, SimTime};
use crate::config::DispatchConfig;
use crate::dispatcher::{Dispatcher, RideOutcome};
use crate::error::{ChannelError, ConfigError};
use crate::grid::{GridBounds, GridPos};
use crate::messages::{DispatchEvent, InboundMessage, RideReply, RideRequestMessage, TaxiNotice};
use crate::telemetry::{DispatchSnapshot, SnapshotHistory};

const NOTICE_CAPACITY: usize = 256;

enum Inbound {
    Event(DispatchEvent),
    Ride {
        requester_id: RequesterId,
        pickup: GridPos,
        reply: oneshot::Sender<RideReply>,
    },
}

/// Cloneable front door to a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Inbound>,
    notices: broadcast::Sender<TaxiNotice>,
    bounds: GridBounds,
    clock: SimClock,
}

impl CoordinatorHandle {
    /// Fire-and-forget taxi report. Invalid messages are dropped with a warning.
    pub async fn publish(&self, message: InboundMessage) -> Result<(), ChannelError> {
        let event = message.validate(self.bounds).map_err(|err| {
            warn!(%err, "dropping invalid taxi message");
            err
        })?;
        self.tx
            .send(Inbound::Event(event))
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Same as [publish](Self::publish) for a raw JSON payload.
    pub async fn publish_raw(&self, payload: &[u8]) -> Result<(), ChannelError> {
        let message = InboundMessage::from_json(payload).map_err(|err| {
            warn!(%err, "dropping malformed taxi message");
            err
        })?;
        self.publish(message).await
    }

    /// Sends a ride request and waits for its single reply.
    pub async fn request_ride(&self, request: RideRequestMessage) -> Result<RideReply, ChannelError> {
        let pickup = request.checked_pickup(self.bounds).map_err(|err| {
            warn!(requester_id = request.requester_id, %err, "dropping invalid ride request");
            err
        })?;

        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Inbound::Ride {
                requester_id: request.requester_id,
                pickup,
                reply,
            })
            .await
            .map_err(|_| ChannelError::Closed)?;
        rx.await.map_err(|_| ChannelError::Closed)
    }

    pub async fn request_ride_raw(&self, payload: &[u8]) -> Result<RideReply, ChannelError> {
        let request = RideRequestMessage::from_json(payload).map_err(|err| {
            warn!(%err, "dropping malformed ride request");
            err
        })?;
        self.request_ride(request).await
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<TaxiNotice> {
        self.notices.subscribe()
    }

    pub fn bounds(&self) -> GridBounds {
        self.bounds
    }

    pub fn clock(&self) -> SimClock {
        self.clock
    }

    pub fn now(&self) -> SimTime {
        self.clock.now()
    }
}

/// What the coordinator leaves behind when it stops.
#[derive(Debug)]
pub struct CoordinatorReport {
    pub final_snapshot: DispatchSnapshot,
    pub history: SnapshotHistory,
}

pub struct Coordinator {
    dispatcher: Dispatcher,
    rx: mpsc::Receiver<Inbound>,
    notices: broadcast::Sender<TaxiNotice>,
    clock: SimClock,
    waiting: HashMap<RequestId, oneshot::Sender<RideReply>>,
    pending_write: Option<JoinHandle<()>>,
}

impl Coordinator {
    pub fn new(config: DispatchConfig) -> Result<(Self, CoordinatorHandle), ConfigError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let time_unit_ms = config.time_unit_ms;
        let mut dispatcher = Dispatcher::new(config);
        // Restored timestamps are capped at the checkpoint time, so the clock
        // resumes one unit after it.
        let clock = match dispatcher.restore() {
            Some(taken_at) => {
                let resume_at = taken_at + 1;
                info!(resume_at, "state restored from previous checkpoint");
                SimClock::resume(time_unit_ms, resume_at)
            }
            None => SimClock::start(time_unit_ms),
        };
        let handle = CoordinatorHandle {
            tx,
            notices: notices.clone(),
            bounds: dispatcher.config().grid,
            clock,
        };
        let coordinator = Self {
            dispatcher,
            rx,
            notices,
            clock,
            waiting: HashMap::new(),
            pending_write: None,
        };
        Ok((coordinator, handle))
    }

    /// Runs until `cancel` fires or every handle is dropped, then writes the
    /// final checkpoint.
    pub async fn run(mut self, cancel: CancellationToken) -> CoordinatorReport {
        let mut ticker = time::interval(self.clock.unit());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.on_tick(),
                inbound = self.rx.recv() => match inbound {
                    Some(inbound) => self.on_inbound(inbound),
                    None => {
                        debug!("all coordinator handles dropped");
                        break;
                    }
                },
            }
        }

        if let Some(write) = self.pending_write.take() {
            if let Err(err) = write.await {
                warn!(%err, "checkpoint writer task failed");
            }
        }

        let final_snapshot = self.dispatcher.finish(self.clock.now());
        let writer = self.dispatcher.recorder().writer();
        let snapshot = final_snapshot.clone();
        match tokio::task::spawn_blocking(move || writer.write(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "final checkpoint write failed"),
            Err(err) => warn!(%err, "final checkpoint writer task failed"),
        }
        if !self.waiting.is_empty() {
            info!(
                unanswered = self.waiting.len(),
                "dropping pending ride requests at shutdown"
            );
        }
        CoordinatorReport {
            final_snapshot,
            history: self.dispatcher.into_history(),
        }
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        let now = self.clock.now();
        match inbound {
            Inbound::Event(event) => {
                self.dispatcher.handle(event, now);
            }
            Inbound::Ride {
                requester_id,
                pickup,
                reply,
            } => match self.dispatcher.request_ride(requester_id, pickup, now) {
                RideOutcome::Replied(answer) => {
                    if reply.send(answer).is_err() {
                        debug!(requester_id, "requester went away before the reply");
                    }
                }
                RideOutcome::Pending(request_id) => {
                    self.waiting.insert(request_id, reply);
                }
            },
        }
        self.flush_notices();
    }

    fn on_tick(&mut self) {
        let outcome = self.dispatcher.tick(self.clock.now());
        for (request_id, answer) in outcome.replies {
            match self.waiting.remove(&request_id) {
                Some(reply) => {
                    if reply.send(answer).is_err() {
                        debug!(request_id, "requester went away before the reply");
                    }
                }
                None => debug!(request_id, "no requester waiting for reply"),
            }
        }
        if let Some(snapshot) = outcome.snapshot {
            self.spawn_write(snapshot);
        }
        self.flush_notices();
    }

    fn spawn_write(&mut self, snapshot: DispatchSnapshot) {
        if self
            .pending_write
            .as_ref()
            .is_some_and(|write| !write.is_finished())
        {
            warn!(
                taken_at = snapshot.taken_at,
                "previous checkpoint still being written, skipping"
            );
            return;
        }

        let writer = self.dispatcher.recorder().writer();
        self.pending_write = Some(tokio::task::spawn_blocking(move || {
            if let Err(err) = writer.write(&snapshot) {
                warn!(%err, "checkpoint write failed");
            }
        }));
    }

    fn flush_notices(&mut self) {
        for notice in self.dispatcher.drain_notices() {
            // No subscribers is fine; notices are advisory.
            let _ = self.notices.send(notice);
        }
    }
}
