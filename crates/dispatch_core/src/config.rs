use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agents::SpeedClass;
use crate::clock::SimTime;
use crate::error::ConfigError;
use crate::grid::GridBounds;

/// What happens to a request when no taxi can be reserved for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Reply `rejected: NoTaxiAvailable` straight away.
    #[default]
    Immediate,
    /// Keep the request Pending, retry every tick, reply `timedOut` once it
    /// reaches the request timeout.
    RetryUntilTimeout,
}

/// Coordinator configuration. Every field has a default, so a config file
/// only needs to list what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub grid: GridBounds,
    /// Time units between periodic checkpoints.
    pub snapshot_interval: SimTime,
    /// Age at which a Pending request times out.
    pub request_timeout: SimTime,
    /// Silence after which a Free taxi is excluded from matching.
    pub staleness_window: SimTime,
    /// Speed class for taxis that register without announcing one.
    pub default_speed: SpeedClass,
    /// Services a taxi may complete before going off duty; `None` = unlimited.
    pub max_services_per_shift: Option<u32>,
    pub rejection_policy: RejectionPolicy,
    /// Wall-clock milliseconds per simulated time unit.
    pub time_unit_ms: u64,
    pub snapshot_path: PathBuf,
    pub interaction_log_path: PathBuf,
    /// Checkpoint summaries kept in memory for export.
    pub snapshot_history_limit: usize,
    /// Capacity of the merged inbound queue.
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            grid: GridBounds::default(),
            snapshot_interval: 60,
            request_timeout: 60,
            staleness_window: 120,
            default_speed: SpeedClass::One,
            max_services_per_shift: Some(3),
            rejection_policy: RejectionPolicy::Immediate,
            time_unit_ms: 1000,
            snapshot_path: PathBuf::from("dispatch_state.json"),
            interaction_log_path: PathBuf::from("interactions.log"),
            snapshot_history_limit: 10_000,
            queue_capacity: 1024,
        }
    }
}

impl DispatchConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.n == 0 || self.grid.m == 0 {
            return Err(ConfigError::InvalidGrid {
                n: self.grid.n,
                m: self.grid.m,
            });
        }
        if self.snapshot_interval == 0 {
            return Err(ConfigError::Zero("snapshot_interval"));
        }
        if self.request_timeout == 0 {
            return Err(ConfigError::Zero("request_timeout"));
        }
        if self.time_unit_ms == 0 {
            return Err(ConfigError::Zero("time_unit_ms"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero("queue_capacity"));
        }
        if self.max_services_per_shift == Some(0) {
            return Err(ConfigError::Zero("max_services_per_shift"));
        }
        Ok(())
    }

    pub fn with_grid(mut self, n: u32, m: u32) -> Self {
        self.grid = GridBounds::new(n, m);
        self
    }

    pub fn with_snapshot_interval(mut self, interval: SimTime) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: SimTime) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_staleness_window(mut self, window: SimTime) -> Self {
        self.staleness_window = window;
        self
    }

    pub fn with_default_speed(mut self, speed: SpeedClass) -> Self {
        self.default_speed = speed;
        self
    }

    pub fn with_shift_limit(mut self, limit: Option<u32>) -> Self {
        self.max_services_per_shift = limit;
        self
    }

    pub fn with_rejection_policy(mut self, policy: RejectionPolicy) -> Self {
        self.rejection_policy = policy;
        self
    }

    pub fn with_time_unit_ms(mut self, unit_ms: u64) -> Self {
        self.time_unit_ms = unit_ms;
        self
    }

    /// Place the checkpoint and interaction log under `dir`.
    pub fn with_state_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.snapshot_path = dir.join("dispatch_state.json");
        self.interaction_log_path = dir.join("interactions.log");
        self
    }
}
