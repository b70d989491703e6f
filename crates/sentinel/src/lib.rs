//! Cost sentinel service internals
//!
//! Configuration loading, the health/metrics HTTP API and console output for
//! the `cost-sentinel` binary.

pub mod api;
pub mod config;
pub mod output;
