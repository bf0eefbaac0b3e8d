//! In-process producers for the dispatch coordinator: a random-walk taxi
//! fleet and a scripted population of ride requesters.

pub mod cli;
pub mod shutdown;
pub mod simulation;
pub mod taxi;
pub mod users;
