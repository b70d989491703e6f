//! Cost observation sources
//!
//! The pipeline only needs one capability from the outside world: return the
//! cost observations recorded inside a time range. Where they come from (the
//! cost API, a JSON export, memory) is up to the implementation.

mod file;
mod http;

pub use file::FileSource;
pub use http::{HttpSource, DEFAULT_FETCH_LIMIT};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SourceError;
use crate::models::Observation;

/// Trait for observation source implementations
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Short source name used in logs
    fn name(&self) -> &'static str;

    /// Fetch observations with `start < timestamp <= end`
    async fn fetch_observations(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, SourceError>;
}

/// Keep only observations inside `(start, end]`
pub(crate) fn retain_window(
    observations: &mut Vec<Observation>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) {
    observations.retain(|o| o.timestamp > start && o.timestamp <= end);
}

/// Fixed, in-memory observations
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    observations: Vec<Observation>,
}

impl StaticSource {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { observations }
    }
}

#[async_trait]
impl ObservationSource for StaticSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch_observations(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, SourceError> {
        let mut observations = self.observations.clone();
        retain_window(&mut observations, start, end);
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn test_static_source_filters_window() {
        let end = Utc.with_ymd_and_hms(2025, 8, 8, 0, 0, 0).unwrap();
        let source = StaticSource::new(vec![
            Observation::new(end - Duration::days(8), "ec2", 1.0),
            Observation::new(end - Duration::days(7), "ec2", 2.0),
            Observation::new(end - Duration::hours(1), "ec2", 3.0),
            Observation::new(end, "ec2", 4.0),
            Observation::new(end + Duration::seconds(1), "ec2", 5.0),
        ]);

        let fetched = source
            .fetch_observations(end - Duration::days(7), end)
            .await
            .unwrap();
        let costs: Vec<f64> = fetched.iter().map(|o| o.cost).collect();

        assert_eq!(costs, vec![3.0, 4.0]);
    }
}
