//! Notification channels for cost anomaly alerts
//!
//! Each channel owns its transport configuration and credential. A channel
//! that is missing required configuration reports [`Delivery::Skipped`]
//! instead of attempting a request.

mod email;
mod slack;

pub use email::{EmailChannel, EmailSettings, DEFAULT_EMAIL_ENDPOINT, EMAIL_SUBJECT};
pub use slack::SlackChannel;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::models::Anomaly;

/// Default timeout for a single channel request
pub const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a delivery attempt that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The provider accepted the alert
    Delivered,
    /// The channel is not configured; nothing was sent
    Skipped(String),
}

/// Trait for alert delivery implementations
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Short channel name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Deliver one anomaly alert
    async fn notify(&self, anomaly: &Anomaly) -> Result<Delivery, ChannelError>;
}

/// Human-readable alert text shared by all channels
pub fn format_message(anomaly: &Anomaly) -> String {
    format!(
        "Anomaly detected for {} at {}: cost ${:.2} (threshold ${:.2})",
        anomaly.service,
        anomaly.hour_display(),
        anomaly.observed_cost,
        anomaly.threshold
    )
}

/// Build the HTTP client channels send through
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ChannelError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Turn a non-2xx provider response into an error
pub(crate) async fn check_response(response: reqwest::Response) -> Result<Delivery, ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(Delivery::Delivered);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ChannelError::Rejected {
        status: status.as_u16(),
        body,
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_message() {
        let message = format_message(&test_support::anomaly("ec2"));
        assert_eq!(
            message,
            "Anomaly detected for ec2 at 2025-08-01 13:00:00+00:00: cost $200.00 (threshold $143.46)"
        );
    }
}
