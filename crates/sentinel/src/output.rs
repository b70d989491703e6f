//! Console output for detection passes

use anyhow::Result;
use clap::ValueEnum;
use sentinel_lib::{Anomaly, RunReport};

/// Output format for the `run` command
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// One `ALERT:` line per anomaly (default)
    #[default]
    Text,
    /// The full run report as JSON
    Json,
}

/// Line printed for one anomaly
pub fn alert_line(anomaly: &Anomaly) -> String {
    format!(
        "ALERT: {} at {}: cost ${:.2} (threshold ${:.2})",
        anomaly.service,
        anomaly.hour_display(),
        anomaly.observed_cost,
        anomaly.threshold
    )
}

/// Render a run report for standard output
pub fn render_report(report: &RunReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => {
            if report.anomalies.is_empty() {
                return Ok("No anomalies detected.".to_string());
            }
            Ok(report
                .anomalies
                .iter()
                .map(alert_line)
                .collect::<Vec<_>>()
                .join("\n"))
        }
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
    }
}
