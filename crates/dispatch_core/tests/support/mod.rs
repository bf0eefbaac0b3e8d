#![allow(dead_code)]

pub mod dispatcher;

pub use dispatcher::{TestDispatcher, TestDispatcherBuilder};
