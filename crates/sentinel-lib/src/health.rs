//! Health tracking for the cost sentinel
//!
//! Detection passes report their outcome here; the watch API serves the
//! result as liveness and readiness probes.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::anomaly::DispatchReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working, with some failures
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Worst status across components
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
    /// Unix timestamp of the last pass that completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_completed_run: Option<i64>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Tracked component names
pub mod components {
    /// Cost observation source
    pub const SOURCE: &str = "source";
    /// Alert channels
    pub const DISPATCHER: &str = "dispatcher";
    /// Scheduled detection loop
    pub const SCHEDULER: &str = "scheduler";
}

/// Shared component health, cloned into the pipeline and the API
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
    last_completed_run: Arc<RwLock<Option<i64>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as healthy
    pub async fn register(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::new(status, message));
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Record a completed pass and the health of its deliveries
    pub async fn record_run_completed(&self, dispatch: &DispatchReport) {
        self.set_healthy(components::SOURCE).await;

        if dispatch.failed == 0 {
            self.set_healthy(components::DISPATCHER).await;
        } else {
            self.set_degraded(
                components::DISPATCHER,
                format!("{} of {} alerts failed", dispatch.failed, dispatch.attempts()),
            )
            .await;
        }

        *self.last_completed_run.write().await = Some(chrono::Utc::now().timestamp());
    }

    /// Record a pass aborted by its data source
    pub async fn record_run_failed(&self, message: impl Into<String>) {
        self.set_unhealthy(components::SOURCE, message).await;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = components
            .values()
            .map(|c| c.status)
            .max_by_key(|status| match status {
                ComponentStatus::Healthy => 0,
                ComponentStatus::Degraded => 1,
                ComponentStatus::Unhealthy => 2,
            })
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse {
            status,
            components,
            last_completed_run: *self.last_completed_run.read().await,
        }
    }

    /// Ready once started, until a component turns unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let reason = if !*self.ready.read().await {
            Some("Sentinel not yet initialized")
        } else if self.health().await.status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy")
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}
