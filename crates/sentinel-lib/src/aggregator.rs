//! Hourly cost aggregation
//!
//! Groups raw observations into one bucket per (service, hour) inside a
//! lookback window.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::models::{Bucket, Observation};

/// Default lookback window (7 days)
pub const DEFAULT_LOOKBACK_HOURS: i64 = 7 * 24;

const SECS_PER_HOUR: i64 = 60 * 60;

/// Time range observations are drawn from: `(start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Window of `lookback` ending at `end`.
    ///
    /// Returns `None` when the start falls outside the representable range.
    pub fn ending_at(end: DateTime<Utc>, lookback: Duration) -> Option<Self> {
        let start = end.checked_sub_signed(lookback)?;
        Some(Self { start, end })
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts > self.start && *ts <= self.end
    }
}

/// Per-service bucket series, keyed and ordered by service name
pub type ServiceBuckets = BTreeMap<String, Vec<Bucket>>;

/// Result of one aggregation
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub buckets: ServiceBuckets,
    /// Observations dropped for a negative or non-finite cost
    pub rejected: usize,
    /// Observations dropped for falling outside the window
    pub out_of_window: usize,
}

/// Truncate a timestamp to the start of its hour
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let excess_secs = secs.rem_euclid(SECS_PER_HOUR);
    ts - Duration::seconds(excess_secs) - Duration::nanoseconds(ts.timestamp_subsec_nanos() as i64)
}

/// Aggregate observations into hourly buckets per service.
///
/// Costs within a bucket are summed in sorted order so the totals do not
/// depend on the order observations arrive in.
pub fn aggregate<'a, I>(observations: I, window: &Window) -> Aggregation
where
    I: IntoIterator<Item = &'a Observation>,
{
    let mut grouped: BTreeMap<String, BTreeMap<DateTime<Utc>, Vec<f64>>> = BTreeMap::new();
    let mut rejected = 0;
    let mut out_of_window = 0;

    for observation in observations {
        if !window.contains(&observation.timestamp) {
            out_of_window += 1;
            continue;
        }

        if !observation.has_valid_cost() {
            warn!(
                service = %observation.service,
                timestamp = %observation.timestamp,
                cost = observation.cost,
                "Rejecting observation with invalid cost"
            );
            rejected += 1;
            continue;
        }

        grouped
            .entry(observation.service.clone())
            .or_default()
            .entry(truncate_to_hour(observation.timestamp))
            .or_default()
            .push(observation.cost);
    }

    let buckets = grouped
        .into_iter()
        .map(|(service, hours)| {
            let series = hours
                .into_iter()
                .map(|(hour, mut costs)| {
                    costs.sort_by(f64::total_cmp);
                    Bucket {
                        service: service.clone(),
                        hour,
                        total_cost: costs.iter().sum(),
                        observation_count: costs.len(),
                    }
                })
                .collect();
            (service, series)
        })
        .collect();

    Aggregation {
        buckets,
        rejected,
        out_of_window,
    }
}
