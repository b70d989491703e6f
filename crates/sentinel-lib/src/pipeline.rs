//! Detection pipeline
//!
//! Runs one pass of fetch → aggregate → detect → dispatch, either on demand
//! or on a fixed schedule. Passes never overlap: a pass requested while
//! another is running is rejected.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::aggregator::{aggregate, Window, DEFAULT_LOOKBACK_HOURS};
use crate::anomaly::{Alerter, DispatchReport, SpikeDetector};
use crate::error::PipelineError;
use crate::health::{components, HealthRegistry};
use crate::models::Anomaly;
use crate::observability::{SentinelMetrics, StructuredLogger};
use crate::source::ObservationSource;

/// Default time between scheduled passes (1 hour)
pub const DEFAULT_RUN_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Consecutive failed passes before the scheduler reports degraded
pub const SCHEDULER_FAILURE_THRESHOLD: u32 = 3;

/// Summary of one detection pass
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Observations returned by the source
    pub observations: usize,
    /// Observations dropped for an invalid cost
    pub rejected: usize,
    pub services_evaluated: usize,
    /// Services skipped for insufficient history
    pub services_skipped: Vec<String>,
    pub anomalies: Vec<Anomaly>,
    pub dispatch: DispatchReport,
}

/// Detection pipeline over an injected source and channel set
pub struct DetectionPipeline {
    source: Arc<dyn ObservationSource>,
    detector: SpikeDetector,
    alerter: Alerter,
    lookback: chrono::Duration,
    metrics: SentinelMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
    run_lock: Mutex<()>,
}

impl DetectionPipeline {
    pub fn builder() -> DetectionPipelineBuilder {
        DetectionPipelineBuilder::new()
    }

    pub fn detector(&self) -> &SpikeDetector {
        &self.detector
    }

    pub fn alerter(&self) -> &Alerter {
        &self.alerter
    }

    /// Run one pass with the window ending at `now`
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RunReport, PipelineError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| PipelineError::RunInProgress)?;

        let start = Instant::now();
        let window = Window::ending_at(now, self.lookback)
            .ok_or(PipelineError::LookbackOutOfRange(self.lookback.num_hours()))?;

        let observations = match self
            .source
            .fetch_observations(window.start, window.end)
            .await
        {
            Ok(observations) => observations,
            Err(e) => {
                self.metrics.inc_runs_failed();
                self.logger.log_run_failed(self.source.name(), &e.to_string());
                if let Some(health) = &self.health {
                    health.record_run_failed(e.to_string()).await;
                }
                return Err(e.into());
            }
        };

        let aggregation = aggregate(&observations, &window);
        debug!(
            services = aggregation.buckets.len(),
            out_of_window = aggregation.out_of_window,
            rejected = aggregation.rejected,
            "Aggregated observations into hourly buckets"
        );

        let detection = self.detector.detect(&aggregation.buckets);
        for anomaly in &detection.anomalies {
            self.logger.log_anomaly(anomaly);
        }

        let dispatch = self.alerter.dispatch(&detection.anomalies).await;
        let elapsed = start.elapsed();

        self.metrics.observe_run(elapsed.as_secs_f64());
        self.metrics
            .set_services(detection.baselines.len(), detection.skipped.len());
        self.metrics.add_observations_rejected(aggregation.rejected);
        self.metrics.add_anomalies_detected(detection.anomalies.len());
        self.metrics.record_dispatch(&dispatch);

        if let Some(health) = &self.health {
            health.record_run_completed(&dispatch).await;
        }

        self.logger.log_run_completed(
            self.source.name(),
            observations.len(),
            detection.baselines.len(),
            detection.skipped.len(),
            detection.anomalies.len(),
            &dispatch,
            elapsed.as_millis(),
        );

        Ok(RunReport {
            window_start: window.start,
            window_end: window.end,
            observations: observations.len(),
            rejected: aggregation.rejected,
            services_evaluated: detection.baselines.len(),
            services_skipped: detection.skipped,
            anomalies: detection.anomalies,
            dispatch,
        })
    }

    /// Run a pass every `period` until shutdown is signalled.
    ///
    /// A failed pass is logged and the schedule continues. The scheduler
    /// component turns degraded after [`SCHEDULER_FAILURE_THRESHOLD`]
    /// consecutive failures and unhealthy once the loop stops.
    pub async fn run_scheduled(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(interval_secs = period.as_secs(), "Starting scheduled detection");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once(Utc::now()).await {
                        Ok(report) => {
                            debug!(
                                anomalies = report.anomalies.len(),
                                "Scheduled pass finished"
                            );
                            consecutive_failures = 0;
                            if let Some(health) = &self.health {
                                health.set_healthy(components::SCHEDULER).await;
                            }
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            warn!(
                                error = %e,
                                consecutive_failures,
                                "Scheduled pass failed"
                            );
                            if consecutive_failures >= SCHEDULER_FAILURE_THRESHOLD {
                                if let Some(health) = &self.health {
                                    health
                                        .set_degraded(
                                            components::SCHEDULER,
                                            format!("{consecutive_failures} consecutive passes failed"),
                                        )
                                        .await;
                                }
                            }
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down scheduled detection");
                    if let Some(health) = &self.health {
                        health.set_unhealthy(components::SCHEDULER, "Scheduler stopped").await;
                    }
                    break;
                }
            }
        }
    }
}

/// Builder for creating a detection pipeline
pub struct DetectionPipelineBuilder {
    source: Option<Arc<dyn ObservationSource>>,
    detector: SpikeDetector,
    alerter: Alerter,
    lookback: chrono::Duration,
    logger: Option<StructuredLogger>,
    health: Option<HealthRegistry>,
}

impl DetectionPipelineBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            detector: SpikeDetector::default(),
            alerter: Alerter::default(),
            lookback: chrono::Duration::hours(DEFAULT_LOOKBACK_HOURS),
            logger: None,
            health: None,
        }
    }

    pub fn source(mut self, source: Arc<dyn ObservationSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn detector(mut self, detector: SpikeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn alerter(mut self, alerter: Alerter) -> Self {
        self.alerter = alerter;
        self
    }

    /// Set how far back observations are fetched for the baseline
    pub fn lookback(mut self, lookback: chrono::Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Report pass outcomes to a health registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<DetectionPipeline, PipelineError> {
        let source = self
            .source
            .ok_or(PipelineError::MissingComponent("observation source"))?;

        Ok(DetectionPipeline {
            source,
            detector: self.detector,
            alerter: self.alerter,
            lookback: self.lookback,
            metrics: SentinelMetrics::new(),
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new("cost-sentinel")),
            health: self.health,
            run_lock: Mutex::new(()),
        })
    }
}

impl Default for DetectionPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{AlertChannel, Delivery};
    use crate::error::{ChannelError, SourceError};
    use crate::health::ComponentStatus;
    use crate::models::Observation;
    use crate::source::StaticSource;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Mock channel recording every alerted service
    #[derive(Default)]
    struct RecordingChannel {
        calls: AtomicUsize,
        services: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn notify(&self, anomaly: &Anomaly) -> Result<Delivery, ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.services
                .lock()
                .unwrap()
                .push(anomaly.service.clone());
            Ok(Delivery::Delivered)
        }
    }

    /// Source that always fails
    struct FailingSource;

    #[async_trait]
    impl ObservationSource for FailingSource {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn fetch_observations(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<Observation>, SourceError> {
            Err(SourceError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        }
    }

    /// Source that blocks until released
    struct BlockingSource {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ObservationSource for BlockingSource {
        fn name(&self) -> &'static str {
            "blocking"
        }

        async fn fetch_observations(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<Observation>, SourceError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(Vec::new())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 8, 12, 30, 0).unwrap()
    }

    /// 30 hours of steady ec2 cost ending in a spike, plus a sparse s3 series
    fn observations() -> Vec<Observation> {
        let mut observations = Vec::new();
        for hours_ago in 0..30 {
            let ts = now() - chrono::Duration::hours(hours_ago) - chrono::Duration::minutes(10);
            let cost = if hours_ago == 0 { 200.0 } else { 10.0 };
            observations.push(Observation::new(ts, "ec2", cost));
        }
        for hours_ago in 0..5 {
            let ts = now() - chrono::Duration::hours(hours_ago);
            observations.push(Observation::new(ts, "s3", 1_000.0));
        }
        observations
    }

    #[tokio::test]
    async fn test_run_once_detects_and_dispatches() {
        let channel = Arc::new(RecordingChannel::default());
        let pipeline = DetectionPipeline::builder()
            .source(Arc::new(StaticSource::new(observations())))
            .alerter(Alerter::default().with_channel(channel.clone()))
            .build()
            .unwrap();

        let report = pipeline.run_once(now()).await.unwrap();

        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].service, "ec2");
        assert_eq!(report.anomalies[0].observed_cost, 200.0);
        assert_eq!(report.services_evaluated, 1);
        assert_eq!(report.services_skipped, vec!["s3".to_string()]);
        assert_eq!(report.dispatch.delivered, 1);
        assert_eq!(*channel.services.lock().unwrap(), vec!["ec2".to_string()]);
    }

    #[tokio::test]
    async fn test_repeated_runs_are_identical() {
        let pipeline = DetectionPipeline::builder()
            .source(Arc::new(StaticSource::new(observations())))
            .build()
            .unwrap();

        let first = pipeline.run_once(now()).await.unwrap();
        let second = pipeline.run_once(now()).await.unwrap();

        assert_eq!(first.anomalies, second.anomalies);
    }

    #[tokio::test]
    async fn test_source_failure_aborts_pass() {
        let channel = Arc::new(RecordingChannel::default());
        let health = HealthRegistry::new();
        health.register(components::SOURCE).await;

        let pipeline = DetectionPipeline::builder()
            .source(Arc::new(FailingSource))
            .alerter(Alerter::default().with_channel(channel.clone()))
            .health(health.clone())
            .build()
            .unwrap();

        let err = pipeline.run_once(now()).await.unwrap_err();

        assert!(matches!(err, PipelineError::Source(_)));
        assert_eq!(channel.calls.load(Ordering::SeqCst), 0);
        assert_eq!(health.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_overlapping_run_rejected() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let pipeline = Arc::new(
            DetectionPipeline::builder()
                .source(Arc::new(BlockingSource {
                    started: started.clone(),
                    release: release.clone(),
                }))
                .build()
                .unwrap(),
        );

        let first = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run_once(now()).await })
        };
        started.notified().await;

        let overlapping = pipeline.run_once(now()).await;
        assert!(matches!(overlapping, Err(PipelineError::RunInProgress)));

        release.notify_one();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_out_of_range_lookback_fails_pass() {
        let pipeline = DetectionPipeline::builder()
            .source(Arc::new(StaticSource::new(observations())))
            .lookback(chrono::Duration::hours(10_000_000_000))
            .build()
            .unwrap();

        let err = pipeline.run_once(now()).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::LookbackOutOfRange(10_000_000_000)
        ));
    }

    #[test]
    fn test_builder_missing_source() {
        let result = DetectionPipeline::builder().build();
        assert!(matches!(
            result,
            Err(PipelineError::MissingComponent("observation source"))
        ));
    }

    #[tokio::test]
    async fn test_scheduled_loop_stops_on_shutdown() {
        let channel = Arc::new(RecordingChannel::default());
        let pipeline = Arc::new(
            DetectionPipeline::builder()
                .source(Arc::new(StaticSource::default()))
                .alerter(Alerter::default().with_channel(channel))
                .build()
                .unwrap(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(pipeline.run_scheduled(Duration::from_millis(10), shutdown_rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduled loop should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_degrades_after_consecutive_failures() {
        let health = HealthRegistry::new();
        health.register(components::SCHEDULER).await;
        let pipeline = Arc::new(
            DetectionPipeline::builder()
                .source(Arc::new(FailingSource))
                .health(health.clone())
                .build()
                .unwrap(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(pipeline.run_scheduled(Duration::from_millis(5), shutdown_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let scheduler = health.health().await.components[components::SCHEDULER].clone();
        assert_eq!(scheduler.status, ComponentStatus::Degraded);
        assert!(scheduler
            .message
            .unwrap()
            .ends_with("consecutive passes failed"));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(
            health.health().await.components[components::SCHEDULER].status,
            ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_scheduler_healthy_after_successful_pass() {
        let health = HealthRegistry::new();
        health.set_degraded(components::SCHEDULER, "3 consecutive passes failed").await;
        let pipeline = Arc::new(
            DetectionPipeline::builder()
                .source(Arc::new(StaticSource::default()))
                .health(health.clone())
                .build()
                .unwrap(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(pipeline.run_scheduled(Duration::from_secs(60), shutdown_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            health.health().await.components[components::SCHEDULER].status,
            ComponentStatus::Healthy
        );

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
