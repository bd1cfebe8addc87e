//! Core logic: types, parsing, conda rendering, resolution, planning, execution.

pub mod conda;
pub mod error;
pub mod executor;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod types;
