//! Sentinel configuration
//!
//! Layered from built-in defaults, an optional config file, `SENTINEL_*`
//! environment variables, the legacy channel variables, and finally
//! command-line flags.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use sentinel_lib::anomaly::{
    Alerter, SpikeDetector, ZeroVariancePolicy, DEFAULT_EVALUATION_WINDOW,
    DEFAULT_MINIMUM_SAMPLES, DEFAULT_SENSITIVITY,
};
use sentinel_lib::aggregator::DEFAULT_LOOKBACK_HOURS;
use sentinel_lib::channel::{
    AlertChannel, EmailChannel, EmailSettings, SlackChannel, DEFAULT_EMAIL_ENDPOINT,
};
use sentinel_lib::source::{FileSource, HttpSource, ObservationSource, DEFAULT_FETCH_LIMIT};
use serde::{Deserialize, Serialize};
use url::Url;

/// Unprefixed variables the alerting scripts have always read
const LEGACY_ENV_VARS: &[(&str, &str)] = &[
    ("slack_webhook_url", "SLACK_WEBHOOK_URL"),
    ("sendgrid_api_key", "SENDGRID_API_KEY"),
    ("alert_email", "ALERT_EMAIL"),
    ("cost_api_url", "COST_API_URL"),
];

/// Sentinel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Name reported in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Hours of history fetched for the baseline
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,

    /// Buckets required before a service is evaluated
    #[serde(default = "default_minimum_samples")]
    pub minimum_samples: usize,

    /// Standard deviations above the mean that count as a spike
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,

    /// Trailing buckets checked for spikes
    #[serde(default = "default_evaluation_window")]
    pub evaluation_window: usize,

    #[serde(default)]
    pub zero_variance_policy: ZeroVariancePolicy,

    /// Timeout for every outbound HTTP request
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Cost API base URL
    #[serde(default = "default_cost_api_url")]
    pub cost_api_url: String,

    /// Rows requested from the cost API per pass
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    /// JSON export to read instead of the cost API
    #[serde(default)]
    pub cost_file: Option<PathBuf>,

    #[serde(default)]
    pub slack_webhook_url: Option<String>,

    #[serde(default)]
    pub sendgrid_api_key: Option<String>,

    /// Alert recipient
    #[serde(default)]
    pub alert_email: Option<String>,

    /// Alert sender, defaults to the recipient
    #[serde(default)]
    pub alert_sender: Option<String>,

    #[serde(default = "default_email_endpoint")]
    pub email_endpoint: String,

    /// Seconds between passes in watch mode
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Health/metrics API port in watch mode
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "cost-sentinel".to_string())
}

fn default_lookback_hours() -> i64 {
    DEFAULT_LOOKBACK_HOURS
}

fn default_minimum_samples() -> usize {
    DEFAULT_MINIMUM_SAMPLES
}

fn default_sensitivity() -> f64 {
    DEFAULT_SENSITIVITY
}

fn default_evaluation_window() -> usize {
    DEFAULT_EVALUATION_WINDOW
}

fn default_http_timeout() -> u64 {
    5
}

fn default_cost_api_url() -> String {
    "http://localhost:8000/".to_string()
}

fn default_fetch_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}

fn default_email_endpoint() -> String {
    DEFAULT_EMAIL_ENDPOINT.to_string()
}

fn default_interval() -> u64 {
    60 * 60
}

fn default_api_port() -> u16 {
    8080
}

/// Command-line overrides shared by every subcommand
#[derive(Debug, Clone, Default, Args)]
pub struct DetectionOverrides {
    /// Read observations from a JSON export instead of the cost API
    #[arg(long)]
    pub cost_file: Option<PathBuf>,

    /// Cost API base URL
    #[arg(long)]
    pub cost_api_url: Option<String>,

    /// Hours of history used for the baseline
    #[arg(long)]
    pub lookback_hours: Option<i64>,

    /// Buckets required before a service is evaluated
    #[arg(long)]
    pub minimum_samples: Option<usize>,

    /// Standard deviations above the mean that count as a spike
    #[arg(long, short = 'k')]
    pub sensitivity: Option<f64>,

    /// Trailing buckets checked for spikes
    #[arg(long)]
    pub evaluation_window: Option<usize>,

    /// Zero-variance policy: flag-above-mean or suppress
    #[arg(long)]
    pub zero_variance_policy: Option<ZeroVariancePolicy>,
}

impl SentinelConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(config::Environment::with_prefix("SENTINEL").try_parsing(true));

        for (key, var) in LEGACY_ENV_VARS {
            builder = builder.set_override_option(*key, std::env::var(var).ok())?;
        }

        builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply_overrides(&mut self, overrides: DetectionOverrides) {
        if let Some(path) = overrides.cost_file {
            self.cost_file = Some(path);
        }
        if let Some(url) = overrides.cost_api_url {
            self.cost_api_url = url;
        }
        if let Some(hours) = overrides.lookback_hours {
            self.lookback_hours = hours;
        }
        if let Some(samples) = overrides.minimum_samples {
            self.minimum_samples = samples;
        }
        if let Some(k) = overrides.sensitivity {
            self.sensitivity = k;
        }
        if let Some(window) = overrides.evaluation_window {
            self.evaluation_window = window;
        }
        if let Some(policy) = overrides.zero_variance_policy {
            self.zero_variance_policy = policy;
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn lookback(&self) -> Result<chrono::Duration> {
        anyhow::ensure!(self.lookback_hours > 0, "lookback_hours must be positive");
        let lookback = chrono::Duration::try_hours(self.lookback_hours)
            .with_context(|| format!("lookback_hours {} is out of range", self.lookback_hours))?;
        chrono::Utc::now()
            .checked_sub_signed(lookback)
            .with_context(|| format!("lookback_hours {} is out of range", self.lookback_hours))?;
        Ok(lookback)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Build the spike detector
    pub fn detector(&self) -> Result<SpikeDetector> {
        let detector = SpikeDetector::new(self.sensitivity)?
            .with_minimum_samples(self.minimum_samples)?
            .with_evaluation_window(self.evaluation_window)?
            .with_zero_variance_policy(self.zero_variance_policy);
        Ok(detector)
    }

    /// Build the observation source; a cost file takes precedence
    pub fn source(&self) -> Result<Arc<dyn ObservationSource>> {
        if let Some(path) = &self.cost_file {
            return Ok(Arc::new(FileSource::new(path)));
        }

        let source = HttpSource::new(&self.cost_api_url, self.http_timeout())
            .with_context(|| format!("Invalid cost API URL {}", self.cost_api_url))?
            .with_limit(self.fetch_limit);
        Ok(Arc::new(source))
    }

    /// Build the alerter with the Slack and email channels.
    ///
    /// Channels without credentials are still registered; they skip delivery
    /// with a notice.
    pub fn alerter(&self) -> Result<Alerter> {
        let timeout = self.http_timeout();

        let webhook = non_empty(&self.slack_webhook_url)
            .map(Url::parse)
            .transpose()
            .context("Invalid Slack webhook URL")?;
        let slack = SlackChannel::new(webhook, timeout).context("Failed to create Slack channel")?;

        let endpoint = Url::parse(&self.email_endpoint).context("Invalid email endpoint")?;
        let email = EmailChannel::new(
            EmailSettings {
                api_key: non_empty(&self.sendgrid_api_key).map(str::to_string),
                recipient: non_empty(&self.alert_email).map(str::to_string),
                sender: non_empty(&self.alert_sender).map(str::to_string),
                endpoint,
            },
            timeout,
        )
        .context("Failed to create email channel")?;

        Ok(Alerter::new(vec![
            Arc::new(slack) as Arc<dyn AlertChannel>,
            Arc::new(email) as Arc<dyn AlertChannel>,
        ]))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_toml(contents: &str) -> SentinelConfig {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        SentinelConfig::load(Some(file.path())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = load_toml("");

        assert_eq!(config.lookback_hours, 168);
        assert_eq!(config.minimum_samples, 10);
        assert_eq!(config.sensitivity, 3.0);
        assert_eq!(config.evaluation_window, 24);
        assert_eq!(config.zero_variance_policy, ZeroVariancePolicy::FlagAboveMean);
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
        assert_eq!(config.email_endpoint, DEFAULT_EMAIL_ENDPOINT);
    }

    #[test]
    fn test_file_values() {
        let config = load_toml(
            r#"
            sensitivity = 2.5
            minimum_samples = 20
            zero_variance_policy = "suppress"
            cost_file = "/var/lib/costs.json"
            alert_sender = "alerts@example.com"
            "#,
        );

        assert_eq!(config.sensitivity, 2.5);
        assert_eq!(config.minimum_samples, 20);
        assert_eq!(config.zero_variance_policy, ZeroVariancePolicy::Suppress);
        assert_eq!(config.cost_file, Some(PathBuf::from("/var/lib/costs.json")));
        assert_eq!(config.alert_sender.as_deref(), Some("alerts@example.com"));
    }

    #[test]
    fn test_overrides_win() {
        let mut config = load_toml("sensitivity = 2.5");
        config.apply_overrides(DetectionOverrides {
            sensitivity: Some(4.0),
            evaluation_window: Some(12),
            ..DetectionOverrides::default()
        });

        assert_eq!(config.sensitivity, 4.0);
        assert_eq!(config.evaluation_window, 12);

        let detector = config.detector().unwrap();
        assert_eq!(detector.sensitivity(), 4.0);
        assert_eq!(detector.evaluation_window(), 12);
    }

    #[test]
    fn test_invalid_detector_settings_rejected() {
        let mut config = load_toml("");
        config.sensitivity = -2.0;
        assert!(config.detector().is_err());

        config.sensitivity = 3.0;
        config.lookback_hours = 0;
        assert!(config.lookback().is_err());
    }

    #[test]
    fn test_out_of_range_lookback_rejected() {
        let mut config = load_toml("lookback_hours = 10000000000\n");
        let err = config.lookback().unwrap_err();
        assert!(err.to_string().contains("out of range"));

        config.lookback_hours = i64::MAX;
        assert!(config.lookback().is_err());

        config.lookback_hours = 24;
        assert_eq!(config.lookback().unwrap(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_alerter_registers_both_channels() {
        let mut config = load_toml("");
        config.slack_webhook_url = Some("   ".to_string());

        let alerter = config.alerter().unwrap();
        assert_eq!(alerter.channel_names(), vec!["slack", "email"]);

        config.slack_webhook_url = Some("not a url".to_string());
        assert!(config.alerter().is_err());
    }
}
