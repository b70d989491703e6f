//! Anomaly detection and alerting for hourly service costs
//!
//! This module provides:
//! - Cost spike detection (buckets exceeding mean + k standard deviations)
//! - Alert fan-out to notification channels

mod alerter;
mod detector;

pub use alerter::{Alerter, ChannelTally, DispatchReport};
pub use detector::{
    Detection, SpikeDetector, ZeroVariancePolicy, DEFAULT_EVALUATION_WINDOW,
    DEFAULT_MINIMUM_SAMPLES, DEFAULT_SENSITIVITY,
};
