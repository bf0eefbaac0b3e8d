//! Scripted ride requesters.
//!
//! A user file has one requester per line: `x y wait`, where `wait` is the
//! number of time units to sleep before asking for a ride. Requester ids are
//! assigned from 1 in line order; lines that don't parse are skipped.

use std::fs;
use std::path::Path;

use anyhow::Context;
use dispatch_core::agents::RequesterId;
use dispatch_core::clock::SimTime;
use dispatch_core::error::ChannelError;
use dispatch_core::messages::{RideReply, RideRequestMessage};
use dispatch_core::runner::CoordinatorHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPlan {
    pub requester_id: RequesterId,
    pub x: i64,
    pub y: i64,
    pub wait: SimTime,
}

/// How a single requester's ride attempt ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UserOutcome {
    Replied(RideReply),
    /// No reply arrived within the requester's patience.
    GaveUp,
    /// The request never reached the coordinator or was dropped by it.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserResult {
    pub requester_id: RequesterId,
    pub outcome: UserOutcome,
}

pub fn parse_user_plans(contents: &str) -> Vec<UserPlan> {
    let mut plans = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        let parsed = match parts.as_slice() {
            [x, y, wait] => x
                .parse::<i64>()
                .ok()
                .zip(y.parse::<i64>().ok())
                .zip(wait.parse::<SimTime>().ok()),
            _ => None,
        };
        match parsed {
            Some(((x, y), wait)) => plans.push(UserPlan {
                requester_id: plans.len() as RequesterId + 1,
                x,
                y,
                wait,
            }),
            None => warn!(line = line_no + 1, content = line, "skipping malformed user line"),
        }
    }
    plans
}

pub fn load_user_plans(path: &Path) -> anyhow::Result<Vec<UserPlan>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading user file {}", path.display()))?;
    Ok(parse_user_plans(&contents))
}

/// Sleeps for the plan's wait, asks for a ride, then waits up to `patience`
/// time units for the answer. Returns `None` if cancelled first.
pub async fn run_user(
    handle: CoordinatorHandle,
    plan: UserPlan,
    patience: SimTime,
    cancel: CancellationToken,
) -> Option<UserResult> {
    let clock = handle.clock();
    tokio::select! {
        _ = cancel.cancelled() => return None,
        _ = time::sleep(clock.units(plan.wait)) => {}
    }

    let request = RideRequestMessage {
        requester_id: plan.requester_id,
        x: plan.x,
        y: plan.y,
    };
    debug!(requester_id = plan.requester_id, x = plan.x, y = plan.y, "requesting ride");

    let outcome = tokio::select! {
        _ = cancel.cancelled() => return None,
        reply = time::timeout(clock.units(patience), handle.request_ride(request)) => match reply {
            Ok(Ok(reply)) => UserOutcome::Replied(reply),
            Ok(Err(ChannelError::Closed)) => UserOutcome::Failed,
            Ok(Err(ChannelError::Invalid(err))) => {
                warn!(requester_id = plan.requester_id, %err, "ride request refused");
                UserOutcome::Failed
            }
            Err(_) => UserOutcome::GaveUp,
        },
    };

    match outcome {
        UserOutcome::Replied(RideReply::Assigned {
            taxi_id,
            estimated_response_time,
        }) => info!(requester_id = plan.requester_id, taxi_id, estimated_response_time, "ride assigned"),
        UserOutcome::Replied(reply) => info!(requester_id = plan.requester_id, ?reply, "no ride"),
        UserOutcome::GaveUp => info!(requester_id = plan.requester_id, patience, "gave up waiting"),
        UserOutcome::Failed => {}
    }

    Some(UserResult {
        requester_id: plan.requester_id,
        outcome,
    })
}
