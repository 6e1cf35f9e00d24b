//! Engine events.
//!
//! A small typed callback bus: subscribers register for a named event and
//! are invoked synchronously, in registration order, when it fires. Each
//! callback runs isolated — a panicking subscriber is logged and the rest
//! still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events the engine publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    #[serde(rename_all = "camelCase")]
    ErrorRateSpike {
        error_rate: f64,
        samples: usize,
        window_ms: u64,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    GracefulShutdown {
        reason: String,
        error_count: u64,
        at: DateTime<Utc>,
    },
}

/// Event name for [`EngineEvent::ErrorRateSpike`].
pub const EVENT_ERROR_RATE_SPIKE: &str = "errorRateSpike";
/// Event name for [`EngineEvent::GracefulShutdown`].
pub const EVENT_GRACEFUL_SHUTDOWN: &str = "gracefulShutdown";

impl EngineEvent {
    /// Name subscribers register under.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ErrorRateSpike { .. } => EVENT_ERROR_RATE_SPIKE,
            Self::GracefulShutdown { .. } => EVENT_GRACEFUL_SHUTDOWN,
        }
    }
}

/// Subscriber callback.
pub type EventCallback = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

struct Subscriber {
    event: String,
    callback: EventCallback,
}

/// Named-event callback registry.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for a named event.
    pub fn subscribe(&self, event: impl Into<String>, callback: EventCallback) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        subscribers.push(Subscriber {
            event: event.into(),
            callback,
        });
    }

    /// Publish an event to every matching subscriber, in registration
    /// order. Callbacks run outside the registry lock.
    pub fn publish(&self, event: &EngineEvent) {
        let callbacks: Vec<EventCallback> = {
            let subscribers = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
            subscribers
                .iter()
                .filter(|s| s.event == event.name())
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::warn!(event = event.name(), "event subscriber panicked");
            }
        }
    }
}
