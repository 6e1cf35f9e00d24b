//! Per-service circuit breakers.
//!
//! Each service id owns an independent breaker. Repeated failures open the
//! circuit and admission is rejected until the reset timeout elapses; the
//! next admission check then flips the breaker to half-open and lets exactly
//! one trial call through. There is no timer: expiry is recomputed lazily on
//! every admission check.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::BreakerConfig;
use crate::types::DEFAULT_SERVICE;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; failures are counted.
    Closed,
    /// Failure threshold exceeded; admission is rejected.
    Open,
    /// Reset timeout elapsed; one trial call is permitted.
    HalfOpen,
}

/// Point-in-time view of a single breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
        }
    }
}

/// Registry of per-service breakers, lazily created on first reference.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    entries: Mutex<HashMap<String, BreakerEntry>>,
}

fn normalize(service: &str) -> &str {
    let trimmed = service.trim();
    if trimmed.is_empty() { DEFAULT_SERVICE } else { trimmed }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admission check. An open breaker past its reset timeout flips to
    /// half-open and admits the trial call.
    pub fn is_open(&self, config: &BreakerConfig, service: &str) -> bool {
        let service = normalize(service);
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let entry = entries.entry(service.to_string()).or_default();

        if entry.state != CircuitState::Open {
            return false;
        }

        let timeout = Duration::from_millis(config.reset_timeout_ms);
        let expired = entry
            .last_failure
            .is_none_or(|last| last.elapsed() >= timeout);
        if expired {
            entry.state = CircuitState::HalfOpen;
            tracing::info!(service, "circuit breaker half-open, admitting trial call");
            return false;
        }
        true
    }

    /// Record a failed attempt against the service's breaker.
    pub fn record_failure(&self, config: &BreakerConfig, service: &str) {
        let service = normalize(service);
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let entry = entries.entry(service.to_string()).or_default();

        entry.failure_count = entry.failure_count.saturating_add(1);
        entry.last_failure = Some(Instant::now());

        match entry.state {
            // A half-open trial failure reopens immediately.
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                tracing::info!(service, "circuit breaker reopened after failed trial");
            }
            CircuitState::Closed if entry.failure_count >= config.failure_threshold => {
                entry.state = CircuitState::Open;
                tracing::info!(
                    service,
                    failures = entry.failure_count,
                    "circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Record a success: the breaker closes and the failure count clears,
    /// whatever state it was in.
    pub fn record_success(&self, service: &str) {
        let service = normalize(service);
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let entry = entries.entry(service.to_string()).or_default();

        if entry.state != CircuitState::Closed {
            tracing::info!(service, "circuit breaker closed");
        }
        entry.state = CircuitState::Closed;
        entry.failure_count = 0;
        entry.last_failure = None;
    }

    /// Current state for one service.
    pub fn state(&self, service: &str) -> CircuitState {
        let service = normalize(service);
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.entry(service.to_string()).or_default().state
    }

    /// Snapshot of every tracked breaker.
    pub fn snapshot(&self) -> HashMap<String, BreakerSnapshot> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries
            .iter()
            .map(|(service, entry)| {
                (
                    service.clone(),
                    BreakerSnapshot {
                        state: entry.state,
                        failure_count: entry.failure_count,
                    },
                )
            })
            .collect()
    }

    #[cfg(test)]
    fn force_last_failure_age(&self, service: &str, age: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = entries.get_mut(normalize(service)) {
            entry.last_failure = Instant::now().checked_sub(age);
        }
    }
}
