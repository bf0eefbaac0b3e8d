//! Fixtures shared by unit tests, integration tests and benches.

use std::path::Path;

use crate::agents::{SpeedClass, TaxiId};
use crate::clock::SimTime;
use crate::config::DispatchConfig;
use crate::grid::{GridBounds, GridPos};
use crate::messages::DispatchEvent;
use crate::registry::SpatialTaxiRegistry;

/// Grid used by fixtures unless a test asks for something else.
pub const TEST_GRID: GridBounds = GridBounds::new(50, 50);

/// Default configuration with both output files placed under `dir`.
pub fn test_config(dir: &Path) -> DispatchConfig {
    DispatchConfig::default()
        .with_grid(TEST_GRID.n, TEST_GRID.m)
        .with_state_dir(dir)
}

/// Registry holding one Free taxi per `(id, x, y, speed)` entry, all reported at `reported_at`.
///
/// # Panics
///
/// Panics if a position falls outside [TEST_GRID].
pub fn registry_with_taxis(
    taxis: &[(TaxiId, u32, u32, SpeedClass)],
    staleness_window: SimTime,
    reported_at: SimTime,
) -> SpatialTaxiRegistry {
    let mut registry = SpatialTaxiRegistry::new(TEST_GRID, staleness_window, SpeedClass::One);
    for &(taxi_id, x, y, speed) in taxis {
        registry
            .report_position(taxi_id, GridPos::new(x, y), reported_at, Some(speed))
            .expect("fixture taxi should be inside the test grid");
    }
    registry
}

/// `count` taxis laid out row by row across [TEST_GRID], cycling through the speed classes.
pub fn scattered_registry(count: u32, reported_at: SimTime) -> SpatialTaxiRegistry {
    let taxis: Vec<_> = (0..count)
        .map(|i| {
            let cell = (i * 7) % (TEST_GRID.n * TEST_GRID.m);
            let speed = SpeedClass::ALL[(i % 3) as usize];
            (i + 1, cell % TEST_GRID.n, cell / TEST_GRID.n, speed)
        })
        .collect();
    registry_with_taxis(&taxis, SimTime::MAX, reported_at)
}

pub fn position_update(taxi_id: TaxiId, x: u32, y: u32, timestamp: SimTime) -> DispatchEvent {
    DispatchEvent::PositionUpdate {
        taxi_id,
        position: GridPos::new(x, y),
        timestamp,
        speed: None,
    }
}

pub fn completion(taxi_id: TaxiId, timestamp: SimTime) -> DispatchEvent {
    DispatchEvent::CompletionNotice { taxi_id, timestamp }
}
