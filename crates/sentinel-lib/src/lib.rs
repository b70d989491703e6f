//! Cost anomaly detection library
//!
//! This crate provides the core functionality for:
//! - Hourly aggregation of per-service cost observations
//! - Z-score spike detection against a per-service baseline
//! - Alert dispatch to Slack and email
//! - Scheduled detection passes with health checks and observability

pub mod aggregator;
pub mod anomaly;
pub mod channel;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod source;

pub use error::{ChannelError, DetectorError, PipelineError, SourceError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{SentinelMetrics, StructuredLogger};
pub use pipeline::{DetectionPipeline, DetectionPipelineBuilder, RunReport};
