//! Per-service health tracking.
//!
//! Every attempt, success and error updates the service's rolling counters;
//! status is recomputed from the success rate on each error/success and by
//! the periodic sweep, which is also the only place inactivity is detected.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::ErrorInfo;
use crate::config::HealthConfig;

/// Health classification for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    /// No activity for the configured window; only the sweep sets this.
    Inactive,
}

/// Rolling statistics for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub total_attempts: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub status: HealthStatus,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self {
            total_attempts: 0,
            success_count: 0,
            error_count: 0,
            status: HealthStatus::Healthy,
            last_attempt: None,
            last_success: None,
            last_error: None,
        }
    }
}

impl ServiceHealth {
    /// Success rate over all attempts; defined as 1.0 before any activity.
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            1.0
        } else {
            self.success_count as f64 / self.total_attempts as f64
        }
    }

    fn recompute_status(&mut self) {
        let rate = self.success_rate();
        if rate < 0.1 && self.total_attempts > 5 {
            self.status = HealthStatus::Critical;
        } else if rate < 0.5 && self.total_attempts > 10 {
            self.status = HealthStatus::Degraded;
        } else if rate > 0.8 {
            self.status = HealthStatus::Healthy;
        }
        // In between: keep the previous classification.
    }
}

/// Monitor tracking every service the engine has touched.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    services: Mutex<HashMap<String, ServiceHealth>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self, service: &str) {
        let mut services = self.services.lock().unwrap_or_else(|p| p.into_inner());
        let health = services.entry(service.to_string()).or_default();
        health.total_attempts = health.total_attempts.saturating_add(1);
        health.last_attempt = Some(Utc::now());
    }

    pub fn record_success(&self, service: &str) {
        let mut services = self.services.lock().unwrap_or_else(|p| p.into_inner());
        let health = services.entry(service.to_string()).or_default();
        health.success_count = health.success_count.saturating_add(1);
        health.last_success = Some(Utc::now());
        health.recompute_status();
    }

    pub fn record_error(&self, service: &str, error: &ErrorInfo) {
        let mut services = self.services.lock().unwrap_or_else(|p| p.into_inner());
        let health = services.entry(service.to_string()).or_default();
        health.error_count = health.error_count.saturating_add(1);
        health.last_error = Some(error.timestamp);
        health.recompute_status();
    }

    /// Health for one service; a default (healthy, untouched) record if the
    /// service has never been seen.
    pub fn health(&self, service: &str) -> ServiceHealth {
        let services = self.services.lock().unwrap_or_else(|p| p.into_inner());
        services.get(service).cloned().unwrap_or_default()
    }

    /// Snapshot of every tracked service.
    pub fn snapshot(&self) -> HashMap<String, ServiceHealth> {
        let services = self.services.lock().unwrap_or_else(|p| p.into_inner());
        services.clone()
    }

    /// Periodic sweep: recompute all statuses, mark inactive services, and
    /// return those currently degraded or critical.
    pub fn sweep(&self, config: &HealthConfig) -> Vec<(String, HealthStatus)> {
        self.sweep_at(config, Utc::now())
    }

    fn sweep_at(&self, config: &HealthConfig, now: DateTime<Utc>) -> Vec<(String, HealthStatus)> {
        let inactive_after = Duration::milliseconds(config.inactive_after_ms as i64);
        let mut services = self.services.lock().unwrap_or_else(|p| p.into_inner());
        let mut flagged = Vec::new();

        for (service, health) in services.iter_mut() {
            health.recompute_status();
            let idle = health
                .last_attempt
                .is_none_or(|last| now - last >= inactive_after);
            if idle {
                health.status = HealthStatus::Inactive;
            }
            if matches!(health.status, HealthStatus::Degraded | HealthStatus::Critical) {
                flagged.push((service.clone(), health.status));
            }
        }
        flagged
    }
}
