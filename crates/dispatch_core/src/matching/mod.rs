pub mod engine;
pub mod pool;
pub mod types;

pub use engine::AssignmentEngine;
pub use pool::TaxiPool;
pub use types::{estimate_response_time, Assignment, MatchCandidate};
