use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use dispatch_core::clock::SimTime;
use dispatch_core::config::{DispatchConfig, RejectionPolicy};

use crate::simulation::SimulationOptions;
use crate::users::load_user_plans;

#[derive(Debug, Parser)]
#[command(
    name = "dispatch",
    about = "Taxi dispatch coordinator with a simulated fleet and requesters"
)]
pub struct Cli {
    /// Grid width in cells
    #[arg(short, long)]
    pub n: Option<u32>,
    /// Grid height in cells
    #[arg(short, long)]
    pub m: Option<u32>,
    /// Number of simulated taxis
    #[arg(long, default_value_t = 5)]
    pub taxis: u32,
    /// User file with one `x y wait` line per requester
    #[arg(long)]
    pub users: Option<PathBuf>,
    /// JSON dispatch configuration; flags override its values
    #[arg(long, env = "DISPATCH_CONFIG")]
    pub config: Option<PathBuf>,
    /// Directory for the checkpoint file and the interaction log
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
    /// Stop after this many time units instead of when all users are answered
    #[arg(long)]
    pub duration: Option<SimTime>,
    /// Wall-clock milliseconds per time unit
    #[arg(long)]
    pub time_unit_ms: Option<u64>,
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,
    /// Seed for taxi placement and random walks
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// Time units a taxi spends with a passenger
    #[arg(long, default_value_t = 30)]
    pub service_duration: SimTime,
    /// Time units a requester waits for a reply before giving up
    #[arg(long, default_value_t = 60)]
    pub patience: SimTime,
    /// Write checkpoint history and final fleet as parquet into this directory
    #[arg(long)]
    pub export_parquet: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PolicyArg {
    Immediate,
    Retry,
}

impl From<PolicyArg> for RejectionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Immediate => RejectionPolicy::Immediate,
            PolicyArg::Retry => RejectionPolicy::RetryUntilTimeout,
        }
    }
}

impl Cli {
    pub fn dispatch_config(&self) -> anyhow::Result<DispatchConfig> {
        let mut config = match &self.config {
            Some(path) => DispatchConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => DispatchConfig::default(),
        };
        if self.n.is_some() || self.m.is_some() {
            let n = self.n.unwrap_or(config.grid.n);
            let m = self.m.unwrap_or(config.grid.m);
            config = config.with_grid(n, m);
        }
        if let Some(dir) = &self.state_dir {
            config = config.with_state_dir(dir);
        }
        if let Some(unit_ms) = self.time_unit_ms {
            config = config.with_time_unit_ms(unit_ms);
        }
        if let Some(policy) = self.policy {
            config = config.with_rejection_policy(policy.into());
        }
        config.validate()?;
        Ok(config)
    }

    pub fn simulation_options(&self) -> anyhow::Result<SimulationOptions> {
        let users = match &self.users {
            Some(path) => load_user_plans(path)?,
            None => Vec::new(),
        };
        Ok(SimulationOptions {
            taxis: self.taxis,
            seed: self.seed,
            service_duration: self.service_duration,
            user_patience: self.patience,
            users,
            duration: self.duration,
        })
    }
}
