//! Email channel backed by a SendGrid-compatible send endpoint

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use url::Url;

use super::{check_response, format_message, http_client, AlertChannel, Delivery};
use crate::error::ChannelError;
use crate::models::Anomaly;

/// Provider endpoint used when none is configured
pub const DEFAULT_EMAIL_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

/// Subject line of every alert email
pub const EMAIL_SUBJECT: &str = "Cloud Cost Anomaly Alert";

/// Transport configuration for the email channel
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub api_key: Option<String>,
    pub recipient: Option<String>,
    /// Defaults to the recipient
    pub sender: Option<String>,
    pub endpoint: Url,
}

#[derive(Debug, Serialize)]
struct EmailAddress<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<EmailAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SendPayload<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: EmailAddress<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

/// Sends alerts as plain-text email through the provider's HTTP API
pub struct EmailChannel {
    settings: EmailSettings,
    client: reqwest::Client,
}

impl EmailChannel {
    pub fn new(settings: EmailSettings, timeout: Duration) -> Result<Self, ChannelError> {
        Ok(Self {
            settings,
            client: http_client(timeout)?,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.credentials().is_some()
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        let api_key = self.settings.api_key.as_deref().filter(|k| !k.is_empty())?;
        let recipient = self.settings.recipient.as_deref().filter(|r| !r.is_empty())?;
        Some((api_key, recipient))
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn notify(&self, anomaly: &Anomaly) -> Result<Delivery, ChannelError> {
        let Some((api_key, recipient)) = self.credentials() else {
            return Ok(Delivery::Skipped(
                "No SendGrid API key or alert email set".to_string(),
            ));
        };

        let sender = self
            .settings
            .sender
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(recipient);
        let message = format_message(anomaly);

        let payload = SendPayload {
            personalizations: vec![Personalization {
                to: vec![EmailAddress { email: recipient }],
            }],
            from: EmailAddress { email: sender },
            subject: EMAIL_SUBJECT,
            content: vec![Content {
                content_type: "text/plain",
                value: &message,
            }],
        };

        debug!(service = %anomaly.service, recipient = %recipient, "Sending alert email");

        let response = self
            .client
            .post(self.settings.endpoint.clone())
            .bearer_auth(api_key)
            .json(&payload)
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

    fn settings(endpoint: &str) -> EmailSettings {
        EmailSettings {
            api_key: Some("SG.test-key".to_string()),
            recipient: Some("oncall@example.com".to_string()),
            sender: None,
            endpoint: Url::parse(endpoint).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_skipped() {
        let mut incomplete = settings(DEFAULT_EMAIL_ENDPOINT);
        incomplete.api_key = None;
        let channel = EmailChannel::new(incomplete, Duration::from_secs(1)).unwrap();

        assert!(!channel.is_configured());
        assert!(matches!(
            channel.notify(&anomaly("ec2")).await.unwrap(),
            Delivery::Skipped(_)
        ));

        let mut blank = settings(DEFAULT_EMAIL_ENDPOINT);
        blank.recipient = Some(String::new());
        let channel = EmailChannel::new(blank, Duration::from_secs(1)).unwrap();
        assert!(!channel.is_configured());
    }

    #[tokio::test]
    async fn test_sends_provider_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v3/mail/send")
            .match_header("authorization", "Bearer SG.test-key")
            .match_body(Matcher::Json(serde_json::json!({
                "personalizations": [{"to": [{"email": "oncall@example.com"}]}],
                "from": {"email": "oncall@example.com"},
                "subject": "Cloud Cost Anomaly Alert",
                "content": [{
                    "type": "text/plain",
                    "value": "Anomaly detected for rds at 2025-08-01 13:00:00+00:00: cost $200.00 (threshold $143.46)"
                }]
            })))
            .with_status(202)
            .create_async()
            .await;

        let channel = EmailChannel::new(
            settings(&format!("{}/v3/mail/send", server.url())),
            Duration::from_secs(2),
        )
        .unwrap();

        let outcome = channel.notify(&anomaly("rds")).await.unwrap();

        assert_eq!(outcome, Delivery::Delivered);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_explicit_sender_used() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v3/mail/send")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "from": {"email": "alerts@example.com"}
            })))
            .with_status(202)
            .create_async()
            .await;

        let mut config = settings(&format!("{}/v3/mail/send", server.url()));
        config.sender = Some("alerts@example.com".to_string());
        let channel = EmailChannel::new(config, Duration::from_secs(2)).unwrap();

        channel.notify(&anomaly("rds")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_request_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v3/mail/send")
            .with_status(401)
            .with_body(r#"{"errors":[{"message":"unauthorized"}]}"#)
            .create_async()
            .await;

        let channel = EmailChannel::new(
            settings(&format!("{}/v3/mail/send", server.url())),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = channel.notify(&anomaly("rds")).await.unwrap_err();
        assert!(matches!(err, ChannelError::Rejected { status: 401, .. }));
    }
}
