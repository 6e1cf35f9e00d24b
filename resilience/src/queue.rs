//! Recovery queue and dead letter queue.
//!
//! Items land here after retries and fallback have both failed. Queued items
//! keep a cumulative attempt counter across replays; once it reaches the
//! configured ceiling the item moves to the dead letter queue, which is
//! terminal and keyed by item id (a re-promotion overwrites, it never
//! duplicates). Successful replays move the item to a recovered-items log.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DeadLetterConfig;

/// An item awaiting re-processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedItem {
    /// Stable item id; replays with the same id advance the same counter.
    pub id: String,
    /// Service the original call targeted.
    pub service: String,
    /// Original content payload.
    pub payload: Value,
    /// Most recent failure message.
    pub error: String,
    pub queued_at: DateTime<Utc>,
    /// Cumulative attempts, counting the original failed execution.
    pub attempts: u32,
    pub retry_scheduled: bool,
}

/// A queued item that exhausted its retry budget. Terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterItem {
    pub id: String,
    pub service: String,
    pub payload: Value,
    pub attempts: u32,
    pub last_error: String,
    pub queued_at: DateTime<Utc>,
    pub moved_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    queue: Vec<QueuedItem>,
    dead: HashMap<String, DeadLetterItem>,
    recovered: Vec<QueuedItem>,
}

/// Serializable snapshot of both queues for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePersistState {
    pub queue: Vec<QueuedItem>,
    pub dead: Vec<DeadLetterItem>,
}

/// Recovery queue with dead-letter promotion.
#[derive(Debug, Default)]
pub struct RecoveryQueue {
    state: Mutex<QueueState>,
}

impl RecoveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a total failure for `id`.
    ///
    /// A new id is appended with `attempts = 1`; an already-queued id has
    /// its counter advanced and its error refreshed. Items that reach the
    /// configured attempt ceiling are promoted to the dead letter queue.
    pub fn enqueue(
        &self,
        config: &DeadLetterConfig,
        id: &str,
        service: &str,
        payload: Value,
        error: &str,
    ) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        match state.queue.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                item.attempts = item.attempts.saturating_add(1);
                item.error = error.to_string();
                item.retry_scheduled = true;
            }
            None => {
                state.queue.push(QueuedItem {
                    id: id.to_string(),
                    service: service.to_string(),
                    payload,
                    error: error.to_string(),
                    queued_at: Utc::now(),
                    attempts: 1,
                    retry_scheduled: true,
                });
            }
        }

        promote_exhausted(&mut state, config);
    }

    /// Remove a successfully replayed item and log it as recovered.
    pub fn resolve(&self, id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(pos) = state.queue.iter().position(|item| item.id == id) {
            let item = state.queue.remove(pos);
            state.recovered.push(item);
        }
    }

    /// Snapshot of items eligible for replay.
    pub fn pending(&self) -> Vec<QueuedItem> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.queue.clone()
    }

    /// Snapshot of the dead letter queue.
    pub fn dead_letter(&self) -> Vec<DeadLetterItem> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.dead.values().cloned().collect()
    }

    /// Items recovered by successful replays, oldest first.
    pub fn recovered(&self) -> Vec<QueuedItem> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.recovered.clone()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.queue.is_empty()
    }

    /// Snapshot for best-effort persistence.
    pub fn persist_state(&self) -> QueuePersistState {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        QueuePersistState {
            queue: state.queue.clone(),
            dead: state.dead.values().cloned().collect(),
        }
    }

    /// Replace in-memory queues with a previously persisted snapshot.
    pub fn restore(&self, persisted: QueuePersistState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.queue = persisted.queue;
        state.dead = persisted
            .dead
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
    }
}

fn promote_exhausted(state: &mut QueueState, config: &DeadLetterConfig) {
    let threshold = config.max_retry_attempts;
    let mut index = 0;
    while index < state.queue.len() {
        if state.queue[index].attempts >= threshold {
            let item = state.queue.remove(index);
            tracing::warn!(
                id = %item.id,
                service = %item.service,
                attempts = item.attempts,
                "item moved to dead letter queue"
            );
            state.dead.insert(
                item.id.clone(),
                DeadLetterItem {
                    id: item.id,
                    service: item.service,
                    payload: item.payload,
                    attempts: item.attempts,
                    last_error: item.error,
                    queued_at: item.queued_at,
                    moved_at: Utc::now(),
                },
            );
        } else {
            index += 1;
        }
    }
}
