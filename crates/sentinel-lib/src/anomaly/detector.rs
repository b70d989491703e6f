//! Cost spike detection
//!
//! Flags hourly buckets whose cost exceeds the service's baseline mean by more
//! than a configurable number of standard deviations.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregator::ServiceBuckets;
use crate::error::DetectorError;
use crate::models::{Anomaly, Baseline, Bucket};

/// Minimum buckets required before a baseline is trusted
pub const DEFAULT_MINIMUM_SAMPLES: usize = 10;

/// Default number of standard deviations to consider a spike
pub const DEFAULT_SENSITIVITY: f64 = 3.0;

/// Default number of trailing buckets checked for spikes
pub const DEFAULT_EVALUATION_WINDOW: usize = 24;

/// What to do with a service whose baseline has zero variance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZeroVariancePolicy {
    /// Use the series' level as the threshold; any bucket above it is flagged
    #[default]
    FlagAboveMean,
    /// Produce no anomalies for the service
    Suppress,
}

impl std::str::FromStr for ZeroVariancePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flag-above-mean" => Ok(ZeroVariancePolicy::FlagAboveMean),
            "suppress" => Ok(ZeroVariancePolicy::Suppress),
            other => Err(format!(
                "unknown zero variance policy '{other}' (expected flag-above-mean or suppress)"
            )),
        }
    }
}

/// Outcome of a detection pass over all services
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    /// Anomalies in service-then-hour order
    pub anomalies: Vec<Anomaly>,
    /// Baselines of every evaluated service
    pub baselines: Vec<Baseline>,
    /// Services skipped for having too few buckets
    pub skipped: Vec<String>,
}

/// Detects hourly cost spikes exceeding a standard deviation threshold
#[derive(Debug, Clone)]
pub struct SpikeDetector {
    /// Number of standard deviations to consider a spike
    sensitivity: f64,
    /// Buckets required before a service is evaluated
    minimum_samples: usize,
    /// Trailing buckets checked against the baseline
    evaluation_window: usize,
    zero_variance_policy: ZeroVariancePolicy,
}

impl SpikeDetector {
    /// Create a new spike detector with given sensitivity
    pub fn new(sensitivity: f64) -> Result<Self, DetectorError> {
        if !sensitivity.is_finite() || sensitivity < 0.0 {
            return Err(DetectorError::InvalidSensitivity(sensitivity));
        }

        Ok(Self {
            sensitivity,
            ..Self::default()
        })
    }

    /// Set minimum bucket count
    pub fn with_minimum_samples(mut self, minimum_samples: usize) -> Result<Self, DetectorError> {
        if minimum_samples == 0 {
            return Err(DetectorError::ZeroMinimumSamples);
        }
        self.minimum_samples = minimum_samples;
        Ok(self)
    }

    /// Set number of trailing buckets to evaluate
    pub fn with_evaluation_window(mut self, buckets: usize) -> Result<Self, DetectorError> {
        if buckets == 0 {
            return Err(DetectorError::EmptyEvaluationWindow);
        }
        self.evaluation_window = buckets;
        Ok(self)
    }

    pub fn with_zero_variance_policy(mut self, policy: ZeroVariancePolicy) -> Self {
        self.zero_variance_policy = policy;
        self
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    pub fn minimum_samples(&self) -> usize {
        self.minimum_samples
    }

    pub fn evaluation_window(&self) -> usize {
        self.evaluation_window
    }

    pub fn zero_variance_policy(&self) -> ZeroVariancePolicy {
        self.zero_variance_policy
    }

    /// Run detection over every service's bucket series
    pub fn detect(&self, series: &ServiceBuckets) -> Detection {
        let mut detection = Detection::default();

        for (service, buckets) in series {
            if buckets.len() < self.minimum_samples {
                debug!(
                    service = %service,
                    buckets = buckets.len(),
                    minimum_samples = self.minimum_samples,
                    "Skipping service with insufficient history"
                );
                detection.skipped.push(service.clone());
                continue;
            }

            let Some(baseline) = Baseline::from_buckets(service, buckets) else {
                continue;
            };

            detection
                .anomalies
                .extend(self.detect_service(&baseline, buckets));
            detection.baselines.push(baseline);
        }

        detection
    }

    /// Check the evaluation window of one service against its baseline
    ///
    /// # Returns
    /// Anomalies in hour order, empty when nothing exceeds the threshold
    pub fn detect_service(&self, baseline: &Baseline, buckets: &[Bucket]) -> Vec<Anomaly> {
        let Some(threshold) = self.threshold(baseline) else {
            debug!(
                service = %baseline.service,
                mean = baseline.mean,
                "Zero variance baseline suppressed"
            );
            return Vec::new();
        };

        let start = buckets.len().saturating_sub(self.evaluation_window);

        buckets[start..]
            .iter()
            .filter(|bucket| bucket.total_cost > threshold)
            .map(|bucket| Anomaly {
                service: baseline.service.clone(),
                hour: bucket.hour,
                observed_cost: bucket.total_cost,
                threshold,
                mean: baseline.mean,
                stddev: baseline.stddev,
            })
            .collect()
    }

    /// Threshold a bucket must exceed, `None` when the service is suppressed
    pub fn threshold(&self, baseline: &Baseline) -> Option<f64> {
        // A flat series sits at its peak; only costs above it stand out
        if baseline.is_degenerate() {
            return match self.zero_variance_policy {
                ZeroVariancePolicy::FlagAboveMean => Some(baseline.peak),
                ZeroVariancePolicy::Suppress => None,
            };
        }

        Some(baseline.mean + self.sensitivity * baseline.stddev)
    }
}

impl Default for SpikeDetector {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY, // 3 sigma
            minimum_samples: DEFAULT_MINIMUM_SAMPLES,
            evaluation_window: DEFAULT_EVALUATION_WINDOW,
            zero_variance_policy: ZeroVariancePolicy::default(),
        }
    }
}
