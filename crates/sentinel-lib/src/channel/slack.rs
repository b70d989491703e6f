//! Slack incoming-webhook channel

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use url::Url;

use super::{check_response, format_message, http_client, AlertChannel, Delivery};
use crate::error::ChannelError;
use crate::models::Anomaly;

#[derive(Debug, Serialize)]
struct SlackMessage<'a> {
    text: &'a str,
}

/// Posts alerts to a Slack incoming webhook
pub struct SlackChannel {
    webhook_url: Option<Url>,
    client: reqwest::Client,
}

impl SlackChannel {
    /// Create a Slack channel. `None` leaves the channel unconfigured.
    pub fn new(webhook_url: Option<Url>, timeout: Duration) -> Result<Self, ChannelError> {
        Ok(Self {
            webhook_url,
            client: http_client(timeout)?,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }
}

#[async_trait]
impl AlertChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn notify(&self, anomaly: &Anomaly) -> Result<Delivery, ChannelError> {
        let Some(url) = &self.webhook_url else {
            return Ok(Delivery::Skipped("No Slack webhook set".to_string()));
        };

        let message = format_message(anomaly);
        debug!(service = %anomaly.service, "Posting alert to Slack webhook");

        let response = self
            .client
            .post(url.clone())
            .json(&SlackMessage { text: &message })
            .send()
            .await?;

        check_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::anomaly;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_unconfigured_slack_is_skipped() {
        let channel = SlackChannel::new(None, Duration::from_secs(1)).unwrap();

        let outcome = channel.notify(&anomaly("ec2")).await.unwrap();

        assert!(!channel.is_configured());
        assert!(matches!(outcome, Delivery::Skipped(_)));
    }

    #[tokio::test]
    async fn test_posts_text_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/T000")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(serde_json::json!({
                "text": "Anomaly detected for ec2 at 2025-08-01 13:00:00+00:00: cost $200.00 (threshold $143.46)"
            })))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/hooks/T000", server.url())).unwrap();
        let channel = SlackChannel::new(Some(url), Duration::from_secs(2)).unwrap();

        let outcome = channel.notify(&anomaly("ec2")).await.unwrap();

        assert_eq!(outcome, Delivery::Delivered);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hooks/T000")
            .with_status(404)
            .with_body("no_service")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/hooks/T000", server.url())).unwrap();
        let channel = SlackChannel::new(Some(url), Duration::from_secs(2)).unwrap();

        let err = channel.notify(&anomaly("ec2")).await.unwrap_err();

        match err {
            ChannelError::Rejected { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no_service");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
