use std::fs;
use std::path::PathBuf;

use dispatch_core::agents::{SpeedClass, TaxiId};
use dispatch_core::clock::SimTime;
use dispatch_core::config::{DispatchConfig, RejectionPolicy};
use dispatch_core::dispatcher::Dispatcher;
use dispatch_core::grid::GridPos;
use dispatch_core::messages::DispatchEvent;
use dispatch_core::test_helpers::{completion, test_config};
use tempfile::TempDir;

/// Builder for a dispatcher whose checkpoint and log live in a private temp dir.
#[derive(Debug)]
pub struct TestDispatcherBuilder {
    dir: TempDir,
    config: DispatchConfig,
    taxis: Vec<(TaxiId, GridPos, SpeedClass, SimTime)>,
}

impl Default for TestDispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDispatcherBuilder {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = test_config(dir.path());
        Self {
            dir,
            config,
            taxis: Vec::new(),
        }
    }

    pub fn with_config(mut self, edit: impl FnOnce(DispatchConfig) -> DispatchConfig) -> Self {
        self.config = edit(self.config);
        self
    }

    pub fn with_policy(self, policy: RejectionPolicy) -> Self {
        self.with_config(|config| config.with_rejection_policy(policy))
    }

    /// Adds a taxi that reports its position at time 0.
    pub fn with_taxi(self, taxi_id: TaxiId, x: u32, y: u32, speed: SpeedClass) -> Self {
        self.with_taxi_at(taxi_id, x, y, speed, 0)
    }

    pub fn with_taxi_at(
        mut self,
        taxi_id: TaxiId,
        x: u32,
        y: u32,
        speed: SpeedClass,
        reported_at: SimTime,
    ) -> Self {
        self.taxis
            .push((taxi_id, GridPos::new(x, y), speed, reported_at));
        self
    }

    pub fn build(self) -> TestDispatcher {
        let mut dispatcher = Dispatcher::new(self.config);
        for (taxi_id, position, speed, reported_at) in self.taxis {
            dispatcher.handle(
                DispatchEvent::PositionUpdate {
                    taxi_id,
                    position,
                    timestamp: reported_at,
                    speed: Some(speed),
                },
                reported_at,
            );
        }
        TestDispatcher {
            dispatcher,
            dir: self.dir,
        }
    }
}

/// A dispatcher plus the temp dir that holds its files.
#[derive(Debug)]
pub struct TestDispatcher {
    pub dispatcher: Dispatcher,
    pub dir: TempDir,
}

impl TestDispatcher {
    pub fn complete(&mut self, taxi_id: TaxiId, at: SimTime) {
        self.dispatcher.handle(completion(taxi_id, at), at);
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dispatcher.config().snapshot_path.clone()
    }

    pub fn log_lines(&self) -> Vec<String> {
        fs::read_to_string(&self.dispatcher.config().interaction_log_path)
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    /// Log lines whose event kind is `kind` (e.g. `"assigned"`).
    pub fn log_lines_of(&self, kind: &str) -> Vec<String> {
        let needle = format!(" {kind} ");
        self.log_lines()
            .into_iter()
            .filter(|line| line.contains(&needle))
            .collect()
    }
}
