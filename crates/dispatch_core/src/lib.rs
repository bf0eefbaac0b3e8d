pub mod agents;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod grid;
pub mod lifecycle;
pub mod matching;
pub mod messages;
pub mod recorder;
pub mod registry;
pub mod runner;
pub mod telemetry;
pub mod telemetry_export;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;
