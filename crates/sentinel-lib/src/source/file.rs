//! JSON file source
//!
//! Reads an export in the same shape the cost API returns: an array of
//! `{timestamp, service, cost}` records.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{retain_window, ObservationSource};
use crate::error::SourceError;
use crate::models::Observation;

/// Observation source backed by a JSON file on disk
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ObservationSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn fetch_observations(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, SourceError> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.display().to_string(),
                source,
            })?;

        let mut observations: Vec<Observation> = serde_json::from_slice(&raw)?;
        let total = observations.len();
        retain_window(&mut observations, start, end);

        debug!(
            path = %self.path.display(),
            total = total,
            in_window = observations.len(),
            "Loaded observations from file"
        );

        Ok(observations)
    }
}
