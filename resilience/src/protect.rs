//! Resource protection and advisory graceful shutdown.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ShutdownConfig;

/// Counts in-flight retry-protected operations and rejects admissions past
/// the configured limit.
///
/// Accounting is symmetric by construction: admission hands out a
/// [`ResourcePermit`] whose `Drop` decrements the counter, so every exit
/// path — success, failure, or an unwound future — releases its slot.
#[derive(Debug)]
pub struct ResourceProtector {
    limit: AtomicUsize,
    in_flight: AtomicUsize,
}

impl ResourceProtector {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Update the admission limit. Already-admitted operations keep their
    /// slots.
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Relaxed);
    }

    /// Try to admit one operation.
    pub fn try_acquire(&self) -> Option<ResourcePermit<'_>> {
        let limit = self.limit.load(Ordering::Relaxed);
        let admitted = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < limit { Some(current + 1) } else { None }
            })
            .is_ok();
        if admitted {
            Some(ResourcePermit { owner: self })
        } else {
            None
        }
    }

    /// Operations currently admitted.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// RAII admission slot; dropping it releases the slot unconditionally.
#[derive(Debug)]
pub struct ResourcePermit<'a> {
    owner: &'a ResourceProtector,
}

impl Drop for ResourcePermit<'_> {
    fn drop(&mut self) {
        self.owner.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Reason string recorded when persistent errors engage the shutdown flag.
pub const SHUTDOWN_REASON_PERSISTENT_ERRORS: &str = "persistent_errors";

/// Snapshot of an engaged shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownState {
    pub reason: String,
    pub at: DateTime<Utc>,
    pub error_count: u64,
}

/// One-time advisory shutdown flag.
///
/// Engaging the flag does not stop processing; callers observe it via
/// [`ShutdownController::state`] (or the emitted event) and wind down on
/// their own terms.
#[derive(Debug, Default)]
pub struct ShutdownController {
    state: Mutex<Option<ShutdownState>>,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the cumulative error count against the threshold.
    ///
    /// Returns the freshly engaged state exactly once; later calls are
    /// no-ops regardless of the count.
    pub fn check(&self, config: &ShutdownConfig, total_errors: u64) -> Option<ShutdownState> {
        if !config.enabled || total_errors < config.persistent_error_threshold {
            return None;
        }
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.is_some() {
            return None;
        }
        let engaged = ShutdownState {
            reason: SHUTDOWN_REASON_PERSISTENT_ERRORS.to_string(),
            at: Utc::now(),
            error_count: total_errors,
        };
        *state = Some(engaged.clone());
        tracing::warn!(
            error_count = total_errors,
            "graceful shutdown engaged after persistent errors"
        );
        Some(engaged)
    }

    /// Current shutdown state, if engaged.
    pub fn state(&self) -> Option<ShutdownState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}
