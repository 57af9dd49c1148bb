//! pageship library crate
//!
//! Exposes the build-error engine and its collaborators so the binary,
//! benchmarks and tests share one implementation.

pub mod assistant;
pub mod autofix;
pub mod config;
pub mod context;
pub mod logs;
pub mod manifest;
pub mod runner;
pub mod util;
