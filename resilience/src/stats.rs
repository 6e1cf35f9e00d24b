//! Error statistics, spike alerting and trend analysis.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::classifier::{ErrorCategory, ErrorInfo};
use crate::config::AlertConfig;

/// Running error counters. Monotonically increasing except on explicit
/// reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub total_errors: u64,
    pub recovered_errors: u64,
    pub unrecoverable_errors: u64,
    pub errors_by_category: HashMap<ErrorCategory, u64>,
    pub errors_by_service: HashMap<String, u64>,
}

/// Thread-safe statistics registry; snapshots are immutable clones.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    inner: Mutex<ErrorStatistics>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self, info: &ErrorInfo) {
        let mut stats = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        stats.total_errors = stats.total_errors.saturating_add(1);
        *stats.errors_by_category.entry(info.category).or_insert(0) += 1;
        *stats
            .errors_by_service
            .entry(info.service.clone())
            .or_insert(0) += 1;
    }

    pub fn record_recovered(&self) {
        let mut stats = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        stats.recovered_errors = stats.recovered_errors.saturating_add(1);
    }

    pub fn record_unrecoverable(&self) {
        let mut stats = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        stats.unrecoverable_errors = stats.unrecoverable_errors.saturating_add(1);
    }

    pub fn total_errors(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).total_errors
    }

    /// Immutable point-in-time snapshot.
    pub fn snapshot(&self) -> ErrorStatistics {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn reset(&self) {
        *self.inner.lock().unwrap_or_else(|p| p.into_inner()) = ErrorStatistics::default();
    }
}

/// Payload of a fired error-rate spike alert.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeAlert {
    pub error_rate: f64,
    pub samples: usize,
    pub window_ms: u64,
}

/// Sliding-window error-rate spike detector.
///
/// Records one sample per attempt. When the in-window error ratio exceeds
/// the threshold with enough samples, the alert fires once; it re-arms when
/// the window drains or the ratio falls back to the threshold or below.
#[derive(Debug, Default)]
pub struct AlertWindow {
    samples: VecDeque<(Instant, bool)>,
    fired: bool,
}

impl AlertWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, config: &AlertConfig, is_error: bool) -> Option<SpikeAlert> {
        self.record_at(config, is_error, Instant::now())
    }

    fn record_at(
        &mut self,
        config: &AlertConfig,
        is_error: bool,
        now: Instant,
    ) -> Option<SpikeAlert> {
        let width = Duration::from_millis(config.window_ms);
        while let Some(&(at, _)) = self.samples.front() {
            if now.duration_since(at) > width {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        if self.samples.is_empty() {
            self.fired = false;
        }

        self.samples.push_back((now, is_error));

        let total = self.samples.len();
        let errors = self.samples.iter().filter(|(_, e)| *e).count();
        let rate = errors as f64 / total as f64;

        if rate > config.error_rate_threshold {
            if total >= config.min_samples && !self.fired {
                self.fired = true;
                return Some(SpikeAlert {
                    error_rate: rate,
                    samples: total,
                    window_ms: config.window_ms,
                });
            }
        } else {
            // Ratio back under control: re-arm for the next spike.
            self.fired = false;
        }
        None
    }
}

/// Error trend over sampled windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Stable,
}

/// Result of a trend analysis pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendReport {
    pub trend: Trend,
    /// Cumulative error count in the most recent window.
    pub current: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projected: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

const TREND_WINDOWS_KEPT: usize = 10;
const TREND_PROJECTION_FACTOR: f64 = 1.5;

/// Samples cumulative error counts into discrete windows on demand.
#[derive(Debug, Default)]
pub struct TrendAnalyzer {
    windows: VecDeque<u64>,
}

impl TrendAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the current window by sampling the cumulative error count.
    pub fn advance(&mut self, total_errors: u64) {
        self.windows.push_back(total_errors);
        while self.windows.len() > TREND_WINDOWS_KEPT {
            self.windows.pop_front();
        }
    }

    /// Compare the last three windows: monotone non-decreasing means the
    /// error rate is climbing.
    pub fn analyze(&self) -> TrendReport {
        let current = self.windows.back().copied().unwrap_or(0);
        let len = self.windows.len();
        let increasing = len >= 3 && {
            let recent: Vec<u64> = self.windows.iter().skip(len - 3).copied().collect();
            recent[0] <= recent[1] && recent[1] <= recent[2]
        };

        if increasing {
            TrendReport {
                trend: Trend::Increasing,
                current,
                projected: Some(current as f64 * TREND_PROJECTION_FACTOR),
                recommendation: Some(
                    "error volume is trending upward; investigate degraded services".to_string(),
                ),
            }
        } else {
            TrendReport {
                trend: Trend::Stable,
                current,
                projected: None,
                recommendation: None,
            }
        }
    }
}
