//! Alert dispatch for detected cost anomalies
//!
//! Handles:
//! - Fan-out of every anomaly to every configured channel
//! - Isolation of channel failures (logged, never propagated)
//! - Per-channel delivery accounting for metrics

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::channel::{AlertChannel, Delivery};
use crate::models::Anomaly;

/// Delivery counts for one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelTally {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Summary of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
    pub by_channel: BTreeMap<String, ChannelTally>,
}

impl DispatchReport {
    fn tally(&mut self, channel: &str) -> &mut ChannelTally {
        self.by_channel.entry(channel.to_string()).or_default()
    }

    fn record_delivered(&mut self, channel: &str) {
        self.delivered += 1;
        self.tally(channel).delivered += 1;
    }

    fn record_skipped(&mut self, channel: &str) {
        self.skipped += 1;
        self.tally(channel).skipped += 1;
    }

    fn record_failed(&mut self, channel: &str) {
        self.failed += 1;
        self.tally(channel).failed += 1;
    }

    /// Total delivery attempts, including skipped ones
    pub fn attempts(&self) -> usize {
        self.delivered + self.skipped + self.failed
    }
}

/// Dispatches anomaly alerts to a fixed set of channels.
///
/// Each (anomaly, channel) pair gets exactly one attempt per dispatch. The
/// channels for one anomaly are notified concurrently and joined before the
/// next anomaly is sent.
#[derive(Clone, Default)]
pub struct Alerter {
    channels: Vec<Arc<dyn AlertChannel>>,
}

impl Alerter {
    pub fn new(channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        Self { channels }
    }

    /// Add a channel
    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Deliver every anomaly through every channel
    pub async fn dispatch(&self, anomalies: &[Anomaly]) -> DispatchReport {
        let mut report = DispatchReport::default();

        for anomaly in anomalies {
            let mut deliveries = JoinSet::new();

            for channel in &self.channels {
                let channel = Arc::clone(channel);
                let anomaly = anomaly.clone();
                deliveries.spawn(async move {
                    let outcome = channel.notify(&anomaly).await;
                    (channel.name(), outcome)
                });
            }

            while let Some(joined) = deliveries.join_next().await {
                match joined {
                    Ok((channel, Ok(Delivery::Delivered))) => {
                        info!(
                            channel = channel,
                            service = %anomaly.service,
                            hour = %anomaly.hour_display(),
                            "Alert delivered"
                        );
                        report.record_delivered(channel);
                    }
                    Ok((channel, Ok(Delivery::Skipped(reason)))) => {
                        info!(channel = channel, reason = %reason, "Channel not configured, skipping alert");
                        report.record_skipped(channel);
                    }
                    Ok((channel, Err(e))) => {
                        warn!(
                            channel = channel,
                            service = %anomaly.service,
                            hour = %anomaly.hour_display(),
                            error = %e,
                            "Alert delivery failed"
                        );
                        report.record_failed(channel);
                    }
                    Err(e) => {
                        warn!(error = %e, "Alert delivery task aborted");
                        report.record_failed("unknown");
                    }
                }
            }
        }

        report
    }
}
