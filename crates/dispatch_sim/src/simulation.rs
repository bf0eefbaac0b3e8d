//! Wires a coordinator to a fleet of taxis and a set of requesters.

use dispatch_core::agents::SpeedClass;
use dispatch_core::clock::SimTime;
use dispatch_core::config::DispatchConfig;
use dispatch_core::grid::{GridBounds, GridPos};
use dispatch_core::runner::{Coordinator, CoordinatorReport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::taxi::{run_taxi, TaxiPlan, TaxiSummary};
use crate::users::{run_user, UserPlan, UserResult};

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub taxis: u32,
    pub seed: u64,
    pub service_duration: SimTime,
    pub user_patience: SimTime,
    pub users: Vec<UserPlan>,
    /// Stop after this many time units. `None` runs until every user has
    /// an answer or the caller cancels.
    pub duration: Option<SimTime>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            taxis: 5,
            seed: 42,
            service_duration: 30,
            user_patience: 60,
            users: Vec::new(),
            duration: None,
        }
    }
}

#[derive(Debug)]
pub struct SimulationReport {
    pub coordinator: CoordinatorReport,
    pub taxis: Vec<TaxiSummary>,
    pub users: Vec<UserResult>,
}

/// Random start cell and speed class per taxi, reproducible from `seed`.
pub fn fleet_plans(
    count: u32,
    bounds: GridBounds,
    seed: u64,
    service_duration: SimTime,
) -> Vec<TaxiPlan> {
    let mut rng = StdRng::seed_from_u64(seed);
    (1..=count)
        .map(|taxi_id| TaxiPlan {
            taxi_id,
            start: GridPos::new(rng.gen_range(0..bounds.n), rng.gen_range(0..bounds.m)),
            speed: SpeedClass::ALL[rng.gen_range(0..SpeedClass::ALL.len())],
            seed: rng.gen(),
            service_duration,
        })
        .collect()
}

pub async fn run_simulation(
    config: DispatchConfig,
    options: SimulationOptions,
    cancel: CancellationToken,
) -> anyhow::Result<SimulationReport> {
    let bounds = config.grid;
    let (coordinator, handle) = Coordinator::new(config)?;
    let stop = CancellationToken::new();
    let coordinator_task = tokio::spawn(coordinator.run(stop.clone()));
    let producers = cancel.child_token();

    let mut taxis = JoinSet::new();
    for plan in fleet_plans(options.taxis, bounds, options.seed, options.service_duration) {
        taxis.spawn(run_taxi(handle.clone(), plan, producers.clone()));
    }
    let mut users = JoinSet::new();
    for plan in options.users.iter().copied() {
        users.spawn(run_user(
            handle.clone(),
            plan,
            options.user_patience,
            producers.clone(),
        ));
    }
    info!(
        taxis = options.taxis,
        users = options.users.len(),
        "simulation started"
    );

    let mut user_results = Vec::new();
    match options.duration {
        Some(duration) => {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = time::sleep(handle.clock().units(duration)) => {}
            }
        }
        None => loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                joined = users.join_next() => match joined {
                    Some(Ok(Some(result))) => user_results.push(result),
                    Some(Ok(None)) => {}
                    Some(Err(err)) => warn!(%err, "user task failed"),
                    None => break,
                },
            }
        },
    }

    producers.cancel();
    while let Some(joined) = users.join_next().await {
        match joined {
            Ok(Some(result)) => user_results.push(result),
            Ok(None) => {}
            Err(err) => warn!(%err, "user task failed"),
        }
    }
    let mut taxi_summaries = Vec::new();
    while let Some(joined) = taxis.join_next().await {
        match joined {
            Ok(summary) => taxi_summaries.push(summary),
            Err(err) => warn!(%err, "taxi task failed"),
        }
    }
    taxi_summaries.sort_by_key(|summary| summary.taxi_id);
    user_results.sort_by_key(|result| result.requester_id);

    drop(handle);
    stop.cancel();
    let report = coordinator_task.await?;
    info!(
        assigned = report.final_snapshot.counts.assigned,
        completed = report.final_snapshot.counts.completed,
        rejected = report.final_snapshot.counts.rejected,
        timed_out = report.final_snapshot.counts.timed_out,
        "simulation finished"
    );

    Ok(SimulationReport {
        coordinator: report,
        taxis: taxi_summaries,
        users: user_results,
    })
}
