//! Core data models for the cost sentinel

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Timestamp layouts accepted from cost sources, tried in order after RFC 3339
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%#z",
];

/// Naive layouts, interpreted as UTC
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

/// A single cost record as reported by the cost source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub cost: f64,
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>, service: impl Into<String>, cost: f64) -> Self {
        Self {
            timestamp,
            service: service.into(),
            cost,
        }
    }

    /// Costs must be finite and non-negative to be aggregated
    pub fn has_valid_cost(&self) -> bool {
        self.cost.is_finite() && self.cost >= 0.0
    }
}

/// One hour of summed cost for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub service: String,
    /// Start of the hour
    pub hour: DateTime<Utc>,
    pub total_cost: f64,
    pub observation_count: usize,
}

/// Reference statistics for a service's normal cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub service: String,
    pub mean: f64,
    /// Sample standard deviation (Bessel-corrected)
    pub stddev: f64,
    /// Largest bucket cost in the series
    pub peak: f64,
    pub sample_count: usize,
}

impl Baseline {
    /// Compute the baseline over every bucket of a service.
    ///
    /// Returns `None` for an empty series. A single bucket, or a series of
    /// identical buckets, has a standard deviation of exactly zero.
    pub fn from_buckets(service: &str, buckets: &[Bucket]) -> Option<Self> {
        let first = buckets.first()?.total_cost;
        let count = buckets.len();
        let peak = buckets.iter().map(|b| b.total_cost).fold(first, f64::max);

        // Summing a repeated value can drift from it, so constant series are exact
        if buckets.iter().all(|b| b.total_cost == first) {
            return Some(Self {
                service: service.to_string(),
                mean: first,
                stddev: 0.0,
                peak,
                sample_count: count,
            });
        }

        let mean = buckets.iter().map(|b| b.total_cost).sum::<f64>() / count as f64;

        // Two-pass variance for stability
        let stddev = if count > 1 {
            let variance = buckets
                .iter()
                .map(|b| (b.total_cost - mean).powi(2))
                .sum::<f64>()
                / (count - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        Some(Self {
            service: service.to_string(),
            mean,
            stddev,
            peak,
            sample_count: count,
        })
    }

    /// True when the series carries no usable variance.
    ///
    /// The tolerance scales with the mean so rounding noise in large or
    /// fractional costs is not mistaken for variance.
    pub fn is_degenerate(&self) -> bool {
        self.stddev <= f64::EPSILON * self.mean.abs().max(1.0)
    }
}

/// A bucket whose cost exceeded its service's threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub service: String,
    pub hour: DateTime<Utc>,
    pub observed_cost: f64,
    pub threshold: f64,
    /// Baseline mean the threshold was derived from
    pub mean: f64,
    /// Baseline standard deviation the threshold was derived from
    pub stddev: f64,
}

impl Anomaly {
    /// Number of standard deviations above the mean.
    ///
    /// Infinite when the baseline had no variance.
    pub fn z_score(&self) -> f64 {
        if self.stddev <= f64::EPSILON * self.mean.abs().max(1.0) {
            return f64::INFINITY;
        }
        (self.observed_cost - self.mean) / self.stddev
    }

    /// Severity bucket used for log levels and metrics labels
    pub fn severity(&self) -> AnomalySeverity {
        let z = self.z_score();
        if z >= 5.0 {
            AnomalySeverity::Critical
        } else if z >= 4.0 {
            AnomalySeverity::High
        } else {
            AnomalySeverity::Warning
        }
    }

    /// Hour rendered the way alert messages show it
    pub fn hour_display(&self) -> String {
        format_hour(&self.hour)
    }
}

/// Severity levels for cost anomalies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Warning,
    High,
    Critical,
}

impl std::fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalySeverity::Warning => write!(f, "warning"),
            AnomalySeverity::High => write!(f, "high"),
            AnomalySeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Render a bucket hour, e.g. `2025-08-01 13:00:00+00:00`
pub fn format_hour(hour: &DateTime<Utc>) -> String {
    hour.format("%Y-%m-%d %H:%M:%S%:z").to_string()
}

/// Parse a cost-source timestamp.
///
/// Accepts RFC 3339 and the space-separated layout PostgreSQL emits for
/// `timestamptz` values. Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp: {raw}")))
}
