//! The resilience engine facade.
//!
//! `ResilienceEngine` owns every registry — breakers, health, statistics,
//! queues, fallbacks, events — as explicit state; there is no module-level
//! ambience. [`ResilienceEngine::execute`] wraps one AI-service call in the
//! full protection pipeline: resource admission, circuit breaker admission,
//! the retry loop, fallback degradation, and queue/dead-letter bookkeeping
//! on total failure. Callers always get a structured [`ExecutionReport`]
//! back, never an error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::breaker::{BreakerSnapshot, CircuitBreakerRegistry, CircuitState};
use crate::classifier::{Classifier, ErrorCategory, ErrorInfo};
use crate::config::{EngineConfig, EngineConfigPatch};
use crate::events::{EngineEvent, EventBus, EventCallback};
use crate::fallback::{FallbackFn, FallbackRegistry};
use crate::health::{HealthMonitor, HealthStatus, ServiceHealth};
use crate::protect::{ResourceProtector, ShutdownController, ShutdownState};
use crate::queue::{DeadLetterItem, QueuePersistState, QueuedItem, RecoveryQueue};
use crate::retry::{RateThrottle, backoff_delay};
use crate::stats::{AlertWindow, ErrorStatistics, StatsRegistry, TrendAnalyzer, TrendReport};
use crate::store::{KeyValueStore, MemoryStore};
use crate::types::{ExecutionContext, ExecutionReport};

/// Store key for the persisted recovery queue.
pub const KEY_RECOVERY_QUEUE: &str = "recovery_queue";
/// Store key for the persisted dead letter queue.
pub const KEY_DEAD_LETTER: &str = "dead_letter_queue";
/// Store key for persisted critical-error reports.
pub const KEY_ERROR_REPORTS: &str = "error_reports";
/// Store key for the persisted statistics snapshot.
pub const KEY_STATISTICS: &str = "error_statistics";

/// Critical-error reports kept in the persisted log.
const MAX_PERSISTED_REPORTS: usize = 50;

/// Error-handling engine instance. One per process is typical; everything
/// is keyed by service id internally.
pub struct ResilienceEngine {
    config: Mutex<EngineConfig>,
    classifier: Classifier,
    breakers: CircuitBreakerRegistry,
    fallbacks: FallbackRegistry,
    queue: RecoveryQueue,
    health: HealthMonitor,
    stats: StatsRegistry,
    alerts: Mutex<AlertWindow>,
    trend: Mutex<TrendAnalyzer>,
    protector: ResourceProtector,
    shutdown: ShutdownController,
    events: EventBus,
    throttle: RateThrottle,
    store: Arc<dyn KeyValueStore>,
    background: CancellationToken,
}

impl Default for ResilienceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilienceEngine {
    /// Engine with default configuration and an in-memory store.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Engine with the given configuration and an in-memory store.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Engine backed by an external persistent store.
    pub fn with_store(config: EngineConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let protector = ResourceProtector::new(config.resources.max_concurrent_retries);
        Self {
            config: Mutex::new(config),
            classifier: Classifier::new(),
            breakers: CircuitBreakerRegistry::new(),
            fallbacks: FallbackRegistry::new(),
            queue: RecoveryQueue::new(),
            health: HealthMonitor::new(),
            stats: StatsRegistry::new(),
            alerts: Mutex::new(AlertWindow::new()),
            trend: Mutex::new(TrendAnalyzer::new()),
            protector,
            shutdown: ShutdownController::new(),
            events: EventBus::new(),
            throttle: RateThrottle::new(),
            store,
            background: CancellationToken::new(),
        }
    }

    /// Replace the failure classifier (custom rule tables).
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Run one operation under full protection.
    ///
    /// `operation` is invoked up to `retry.max_attempts` times with
    /// exponential backoff between failures; non-retryable failures and an
    /// open circuit stop the loop early. Exhausted calls fall back to a
    /// degraded result when one is available, and otherwise land in the
    /// recovery queue.
    pub async fn execute<F, Fut>(
        &self,
        context: ExecutionContext,
        mut operation: F,
    ) -> ExecutionReport
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        let cfg = self.config_snapshot();

        let Some(_permit) = self.protector.try_acquire() else {
            tracing::warn!(
                service = context.service_id(),
                "rejected: concurrent retry limit reached"
            );
            return ExecutionReport::rejected(
                ErrorCategory::ResourceProtection,
                "concurrent retry limit reached",
            );
        };

        let service = context.service_id().to_string();

        if self.breakers.is_open(&cfg.breaker, &service) {
            tracing::warn!(service = %service, "rejected: circuit breaker open");
            return ExecutionReport::rejected(
                ErrorCategory::CircuitBreaker,
                format!("circuit breaker open for {service}"),
            );
        }

        let mut attempts: u32 = 0;
        let failure = loop {
            attempts += 1;
            self.health.record_attempt(&service);

            match operation().await {
                Ok(data) => {
                    self.health.record_success(&service);
                    self.breakers.record_success(&service);
                    self.throttle.reset();
                    self.note_sample(&cfg, false);
                    return ExecutionReport::success(attempts, data);
                }
                Err(error) => {
                    let info = self.classifier.classify(&error, &context);
                    tracing::debug!(
                        service = %service,
                        category = %info.category,
                        attempt = attempts,
                        "attempt failed: {}",
                        info.message
                    );
                    self.breakers.record_failure(&cfg.breaker, &service);
                    self.note_error(&cfg, &info);

                    let can_retry = attempts < cfg.retry.max_attempts
                        && info.retryable
                        && !self.breakers.is_open(&cfg.breaker, &service);
                    if !can_retry {
                        break info;
                    }

                    let delay = self
                        .throttle
                        .scale(&cfg.rate_limit, backoff_delay(&cfg.retry, attempts));
                    self.throttle.on_retry(&cfg.rate_limit);
                    tracing::debug!(
                        service = %service,
                        delay_ms = delay.as_millis() as u64,
                        "backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        if cfg.fallback.enabled
            && let Some(data) = self.fallbacks.attempt(&failure, &context)
        {
            self.stats.record_recovered();
            tracing::info!(service = %service, "fallback produced degraded result");
            return ExecutionReport::fallback(attempts, data, &failure);
        }

        self.stats.record_unrecoverable();
        let item_id = context
            .operation
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let payload = context.content.clone().unwrap_or(Value::Null);
        self.queue
            .enqueue(&cfg.dead_letter, &item_id, &service, payload, &failure.message);
        self.persist_queues().await;
        self.persist_statistics().await;
        self.persist_critical_report(&failure, attempts).await;

        ExecutionReport::failure(attempts, &failure)
    }

    /// Replay every queued item through the full error-handling path.
    ///
    /// `replay` rebuilds the operation for one item. Items that succeed are
    /// removed and returned; items that fail stay queued with their attempt
    /// counters advanced (and may be dead-lettered). Replaying an empty
    /// queue is a no-op.
    pub async fn retry_queued<F, Fut>(&self, mut replay: F) -> Vec<QueuedItem>
    where
        F: FnMut(QueuedItem) -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        let pending = self.queue.pending();
        if pending.is_empty() {
            return Vec::new();
        }

        let mut recovered = Vec::new();
        for item in pending {
            let context = ExecutionContext::for_service(item.service.as_str())
                .with_operation(item.id.as_str())
                .with_content(item.payload.clone());
            let report = self.execute(context, || replay(item.clone())).await;
            if report.success {
                self.queue.resolve(&item.id);
                recovered.push(item);
            }
        }
        self.persist_queues().await;
        recovered
    }

    /// Hydrate queues from the persistent store. Best-effort: unreadable or
    /// missing state leaves the in-memory queues untouched.
    pub async fn restore(&self) {
        match self.store.get(&[KEY_RECOVERY_QUEUE, KEY_DEAD_LETTER]).await {
            Ok(mut entries) => {
                let queue: Vec<QueuedItem> = entries
                    .remove(KEY_RECOVERY_QUEUE)
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                let dead: Vec<DeadLetterItem> = entries
                    .remove(KEY_DEAD_LETTER)
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                if !queue.is_empty() || !dead.is_empty() {
                    self.queue.restore(QueuePersistState { queue, dead });
                }
            }
            Err(error) => {
                tracing::warn!(%error, "failed to restore queues from store");
            }
        }
    }

    /// Merge a configuration patch into the live configuration.
    pub fn configure(&self, patch: EngineConfigPatch) {
        let mut config = self.config.lock().unwrap_or_else(|p| p.into_inner());
        config.merge(patch);
        self.protector
            .set_limit(config.resources.max_concurrent_retries);
    }

    /// Current configuration snapshot.
    pub fn config_snapshot(&self) -> EngineConfig {
        self.config.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Register (or replace) a fallback strategy for a service.
    pub fn register_fallback(&self, service: impl Into<String>, strategy: FallbackFn) {
        self.fallbacks.register(service, strategy);
    }

    /// Subscribe to a named engine event.
    pub fn subscribe(&self, event: impl Into<String>, callback: EventCallback) {
        self.events.subscribe(event, callback);
    }

    /// Immutable statistics snapshot.
    pub fn statistics(&self) -> ErrorStatistics {
        self.stats.snapshot()
    }

    /// Reset all statistics counters.
    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    /// Health for one service.
    pub fn health(&self, service: &str) -> ServiceHealth {
        self.health.health(service)
    }

    /// Health for every tracked service.
    pub fn health_snapshot(&self) -> HashMap<String, ServiceHealth> {
        self.health.snapshot()
    }

    /// Run one health sweep now; returns degraded/critical services.
    pub fn sweep_health(&self) -> Vec<(String, HealthStatus)> {
        let cfg = self.config_snapshot();
        self.health.sweep(&cfg.health)
    }

    /// Circuit breaker state for one service.
    pub fn breaker_state(&self, service: &str) -> CircuitState {
        self.breakers.state(service)
    }

    /// Snapshot of every tracked breaker.
    pub fn breaker_snapshot(&self) -> HashMap<String, BreakerSnapshot> {
        self.breakers.snapshot()
    }

    /// Items currently awaiting replay.
    pub fn queued_items(&self) -> Vec<QueuedItem> {
        self.queue.pending()
    }

    /// Items that exhausted their retry budget.
    pub fn dead_letter_items(&self) -> Vec<DeadLetterItem> {
        self.queue.dead_letter()
    }

    /// Items recovered by successful replays.
    pub fn recovered_items(&self) -> Vec<QueuedItem> {
        self.queue.recovered()
    }

    /// Advisory shutdown state, if engaged.
    pub fn shutdown_state(&self) -> Option<ShutdownState> {
        self.shutdown.state()
    }

    /// Operations currently admitted by the resource protector.
    pub fn in_flight(&self) -> usize {
        self.protector.in_flight()
    }

    /// Close the current trend window and report the resulting trend.
    pub fn advance_trend_window(&self) -> TrendReport {
        let mut trend = self.trend.lock().unwrap_or_else(|p| p.into_inner());
        trend.advance(self.stats.total_errors());
        trend.analyze()
    }

    /// Trend over the windows sampled so far, without closing a new one.
    pub fn trend_report(&self) -> TrendReport {
        self.trend.lock().unwrap_or_else(|p| p.into_inner()).analyze()
    }

    /// Spawn the periodic health sweeper. Stopped by
    /// [`ResilienceEngine::stop_background_tasks`].
    pub fn spawn_health_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let token = self.background.clone();
        tokio::spawn(async move {
            loop {
                let interval = {
                    let cfg = engine.config.lock().unwrap_or_else(|p| p.into_inner());
                    Duration::from_millis(cfg.health.sweep_interval_ms)
                };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let flagged = engine.sweep_health();
                        if !flagged.is_empty() {
                            tracing::warn!(flagged = ?flagged, "health sweep flagged services");
                        }
                    }
                }
            }
        })
    }

    /// Cancel background tasks spawned by this engine.
    pub fn stop_background_tasks(&self) {
        self.background.cancel();
    }

    /// Persist the current statistics snapshot. Best-effort.
    pub async fn persist_statistics(&self) {
        let snapshot = self.stats.snapshot();
        let value = match serde_json::to_value(&snapshot) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(%error, "failed to serialize statistics");
                return;
            }
        };
        if let Err(error) = self
            .store
            .set(HashMap::from([(KEY_STATISTICS.to_string(), value)]))
            .await
        {
            tracing::warn!(%error, "failed to persist statistics");
        }
    }

    // Record an error everywhere it counts, then run the alerting and
    // shutdown threshold checks. Synchronous on purpose: no lock is held
    // across a suspension point.
    fn note_error(&self, cfg: &EngineConfig, info: &ErrorInfo) {
        self.stats.record_error(info);
        self.health.record_error(&info.service, info);
        self.note_sample(cfg, true);

        if let Some(state) = self.shutdown.check(&cfg.shutdown, self.stats.total_errors()) {
            self.events.publish(&EngineEvent::GracefulShutdown {
                reason: state.reason,
                error_count: state.error_count,
                at: state.at,
            });
        }
    }

    fn note_sample(&self, cfg: &EngineConfig, is_error: bool) {
        let alert = {
            let mut alerts = self.alerts.lock().unwrap_or_else(|p| p.into_inner());
            alerts.record(&cfg.alerting, is_error)
        };
        if let Some(alert) = alert {
            tracing::warn!(
                error_rate = alert.error_rate,
                samples = alert.samples,
                "error rate spike detected"
            );
            self.events.publish(&EngineEvent::ErrorRateSpike {
                error_rate: alert.error_rate,
                samples: alert.samples,
                window_ms: alert.window_ms,
                at: Utc::now(),
            });
        }
    }

    async fn persist_queues(&self) {
        let state = self.queue.persist_state();
        let (queue, dead) = match (
            serde_json::to_value(&state.queue),
            serde_json::to_value(&state.dead),
        ) {
            (Ok(queue), Ok(dead)) => (queue, dead),
            _ => {
                tracing::warn!("failed to serialize queue state");
                return;
            }
        };
        let entries = HashMap::from([
            (KEY_RECOVERY_QUEUE.to_string(), queue),
            (KEY_DEAD_LETTER.to_string(), dead),
        ]);
        if let Err(error) = self.store.set(entries).await {
            tracing::warn!(%error, "failed to persist queues");
        }
    }

    async fn persist_critical_report(&self, info: &ErrorInfo, attempts: u32) {
        let report = json!({
            "service": info.service,
            "operation": info.operation,
            "category": info.category,
            "severity": info.severity,
            "message": info.message,
            "attempts": attempts,
            "timestamp": info.timestamp,
        });

        let mut reports = match self.store.get(&[KEY_ERROR_REPORTS]).await {
            Ok(mut entries) => entries
                .remove(KEY_ERROR_REPORTS)
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default(),
            Err(error) => {
                tracing::warn!(%error, "failed to read persisted error reports");
                Vec::new()
            }
        };
        reports.push(report);
        if reports.len() > MAX_PERSISTED_REPORTS {
            let excess = reports.len() - MAX_PERSISTED_REPORTS;
            reports.drain(..excess);
        }

        let entries = HashMap::from([(KEY_ERROR_REPORTS.to_string(), Value::Array(reports))]);
        if let Err(error) = self.store.set(entries).await {
            tracing::warn!(%error, "failed to persist error report");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeadLetterConfig, FallbackConfig, RetryConfig};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        config
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let engine = ResilienceEngine::with_config(fast_config());
        let report = engine
            .execute(ExecutionContext::for_service("summarizer"), || async {
                Ok(json!({"ok": true}))
            })
            .await;

        assert!(report.success);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.data, Some(json!({"ok": true})));
        assert!(!report.used_fallback);
        assert_eq!(engine.health("summarizer").success_count, 1);
    }

    #[tokio::test]
    async fn fails_twice_then_succeeds() {
        let engine = ResilienceEngine::with_config(fast_config());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let report = engine
            .execute(ExecutionContext::for_service("summarizer"), move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow!("network timeout"))
                    } else {
                        Ok(json!({"ok": true}))
                    }
                }
            })
            .await;

        assert!(report.success);
        assert_eq!(report.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Success wiped the breaker failures.
        assert_eq!(engine.breaker_state("summarizer"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn validation_errors_fail_fast() {
        let engine = ResilienceEngine::with_config(fast_config());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let report = engine
            .execute(ExecutionContext::for_service("summarizer"), move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<Value, _>(anyhow!("invalid input: too large"))
                }
            })
            .await;

        assert!(!report.success);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.error_category, Some(ErrorCategory::Validation));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_every_attempt() {
        let mut config = fast_config();
        config.retry.max_attempts = 5;
        config.fallback = FallbackConfig { enabled: false };
        let engine = ResilienceEngine::with_config(config);

        let report = engine
            .execute(ExecutionContext::for_service("summarizer"), || async {
                Err::<Value, _>(anyhow!("network timeout"))
            })
            .await;

        assert!(!report.success);
        assert_eq!(report.attempts, 5);
        assert_eq!(report.error_category, Some(ErrorCategory::Network));
    }

    #[tokio::test]
    async fn open_breaker_rejects_before_any_attempt() {
        let mut config = fast_config();
        config.retry.max_attempts = 1;
        config.breaker.failure_threshold = 2;
        config.fallback = FallbackConfig { enabled: false };
        let engine = ResilienceEngine::with_config(config);

        for _ in 0..2 {
            let report = engine
                .execute(ExecutionContext::for_service("categorizer"), || async {
                    Err::<Value, _>(anyhow!("network timeout"))
                })
                .await;
            assert_eq!(report.attempts, 1);
        }
        assert_eq!(engine.breaker_state("categorizer"), CircuitState::Open);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let report = engine
            .execute(ExecutionContext::for_service("categorizer"), move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(null))
                }
            })
            .await;

        assert!(!report.success);
        assert_eq!(report.attempts, 0);
        assert!(report.circuit_breaker_open);
        assert_eq!(report.error_category, Some(ErrorCategory::CircuitBreaker));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "operation never invoked");
    }

    #[tokio::test]
    async fn fallback_recovers_with_degraded_payload() {
        let mut config = fast_config();
        config.retry.max_attempts = 2;
        let engine = ResilienceEngine::with_config(config);

        let context = ExecutionContext::for_service("summarizer")
            .with_content(json!("One sentence. Another sentence. A third."));
        let report = engine
            .execute(context, || async {
                Err::<Value, _>(anyhow!("model overloaded"))
            })
            .await;

        assert!(report.success);
        assert!(report.used_fallback);
        let data = report.data.expect("data");
        assert_eq!(data["processingMode"], json!("degraded"));
        assert_eq!(engine.statistics().recovered_errors, 1);
        assert!(engine.queued_items().is_empty());
    }

    #[tokio::test]
    async fn total_failure_queues_the_item() {
        let mut config = fast_config();
        config.retry.max_attempts = 2;
        let engine = ResilienceEngine::with_config(config);

        // No content: no fallback is possible.
        let context = ExecutionContext::for_service("summarizer").with_operation("capture-7");
        let report = engine
            .execute(context, || async {
                Err::<Value, _>(anyhow!("network timeout"))
            })
            .await;

        assert!(!report.success);
        let queued = engine.queued_items();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, "capture-7");
        assert_eq!(queued[0].attempts, 1);
        assert_eq!(engine.statistics().unrecoverable_errors, 1);
    }

    #[tokio::test]
    async fn retry_queued_recovers_and_promotes() {
        let mut config = fast_config();
        config.retry.max_attempts = 1;
        config.dead_letter = DeadLetterConfig {
            max_retry_attempts: 3,
        };
        let engine = ResilienceEngine::with_config(config);

        let context = ExecutionContext::for_service("writer").with_operation("draft-1");
        engine
            .execute(context, || async {
                Err::<Value, _>(anyhow!("network timeout"))
            })
            .await;
        assert_eq!(engine.queued_items().len(), 1);

        // Two failing replays: attempts 2, then 3 -> dead letter.
        for _ in 0..2 {
            let recovered = engine
                .retry_queued(|_item| async { Err::<Value, _>(anyhow!("network timeout")) })
                .await;
            assert!(recovered.is_empty());
        }

        assert!(engine.queued_items().is_empty());
        let dead = engine.dead_letter_items();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, "draft-1");
        assert_eq!(dead[0].attempts, 3);

        // Further replays are no-ops: the queue is empty.
        let recovered = engine
            .retry_queued(|_item| async { Ok(json!(null)) })
            .await;
        assert!(recovered.is_empty());
        assert_eq!(engine.dead_letter_items().len(), 1);
    }

    #[tokio::test]
    async fn retry_queued_success_moves_to_recovered_log() {
        let mut config = fast_config();
        config.retry.max_attempts = 1;
        let engine = ResilienceEngine::with_config(config);

        let context = ExecutionContext::for_service("writer").with_operation("draft-2");
        engine
            .execute(context, || async {
                Err::<Value, _>(anyhow!("network timeout"))
            })
            .await;

        let recovered = engine
            .retry_queued(|_item| async { Ok(json!({"done": true})) })
            .await;

        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].id, "draft-2");
        assert!(engine.queued_items().is_empty());
        assert_eq!(engine.recovered_items().len(), 1);
    }

    #[tokio::test]
    async fn configure_merges_sections() {
        let engine = ResilienceEngine::with_config(fast_config());
        engine.configure(EngineConfigPatch {
            retry: Some(RetryConfig {
                max_attempts: 9,
                base_delay_ms: 2,
                max_delay_ms: 10,
            }),
            ..EngineConfigPatch::default()
        });

        let config = engine.config_snapshot();
        assert_eq!(config.retry.max_attempts, 9);
        // Unpatched sections survive.
        assert_eq!(config.breaker.failure_threshold, 5);
    }

    #[tokio::test]
    async fn trend_windows_track_cumulative_errors() {
        let mut config = fast_config();
        config.retry.max_attempts = 1;
        config.fallback = FallbackConfig { enabled: false };
        let engine = ResilienceEngine::with_config(config);

        for window in 1..=3u64 {
            engine
                .execute(ExecutionContext::for_service("summarizer"), || async {
                    Err::<Value, _>(anyhow!("network timeout"))
                })
                .await;
            let report = engine.advance_trend_window();
            assert_eq!(report.current, window);
        }

        let report = engine.trend_report();
        assert_eq!(report.trend, crate::stats::Trend::Increasing);
        assert_eq!(report.projected, Some(4.5));
    }
}
