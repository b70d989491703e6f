//! Cost API source
//!
//! Reads `GET {base_url}/costs?limit=N`, which returns the most recent cost
//! rows as a JSON array of `{timestamp, service, cost}`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use url::Url;

use super::{retain_window, ObservationSource};
use crate::error::SourceError;
use crate::models::Observation;

/// Rows requested per fetch; a week of hourly rows for a few hundred services
pub const DEFAULT_FETCH_LIMIT: usize = 10_000;

/// Observation source backed by the cost API
pub struct HttpSource {
    client: reqwest::Client,
    base_url: Url,
    limit: usize,
}

impl HttpSource {
    /// Create a new source for the API at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = Url::parse(base_url)?;

        Ok(Self {
            client,
            base_url,
            limit: DEFAULT_FETCH_LIMIT,
        })
    }

    /// Set the number of rows requested per fetch
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl ObservationSource for HttpSource {
    fn name(&self) -> &'static str {
        "cost_api"
    }

    async fn fetch_observations(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, SourceError> {
        let url = self.base_url.join("costs")?;

        let response = self
            .client
            .get(url)
            .query(&[("limit", self.limit)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status { status, body });
        }

        let body = response.bytes().await?;
        let mut observations: Vec<Observation> = serde_json::from_slice(&body)?;
        let fetched = observations.len();

        if fetched >= self.limit {
            warn!(
                limit = self.limit,
                "Cost API returned a full page; older observations in the window may be missing"
            );
        }

        retain_window(&mut observations, start, end);
        debug!(
            fetched = fetched,
            in_window = observations.len(),
            "Fetched observations from cost API"
        );

        Ok(observations)
    }
}
