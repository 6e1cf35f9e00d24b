//! Shared request/response types for the resilience engine.
//!
//! `ExecutionContext` is the caller-supplied description of an AI-service
//! call; `ExecutionReport` is the structured outcome handed back for every
//! invocation, success or not. Both serialize with camelCase keys because
//! they cross the boundary to the extension's JavaScript side unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classifier::{ErrorCategory, ErrorInfo};

/// Service id used when the caller does not name one.
pub const DEFAULT_SERVICE: &str = "default";

/// Context for a protected operation.
///
/// `service`, `operation`, `content` and `critical` are the fields the
/// engine itself interprets; `extra` is an opaque slot for caller data that
/// travels with the context but is never inspected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionContext {
    /// Target service id (e.g. `summarizer`). Empty or missing ids are
    /// normalized to [`DEFAULT_SERVICE`].
    pub service: Option<String>,
    /// Stable operation id; also used as the recovery-queue item id.
    pub operation: Option<String>,
    /// Content the operation works on (page text, prompt, ...).
    pub content: Option<Value>,
    /// Marks the call as critical for severity assessment.
    pub critical: bool,
    /// Opaque caller payload, carried through untouched.
    pub extra: Option<Value>,
}

impl ExecutionContext {
    /// Context targeting a named service.
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
            ..Self::default()
        }
    }

    /// Attach a stable operation id.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Attach the content the operation works on.
    #[must_use]
    pub fn with_content(mut self, content: Value) -> Self {
        self.content = Some(content);
        self
    }

    /// Mark the call as critical.
    #[must_use]
    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Normalized service id: trimmed, never empty.
    pub fn service_id(&self) -> &str {
        match self.service.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => DEFAULT_SERVICE,
        }
    }

    /// Content rendered as plain text, if there is any.
    ///
    /// Accepts either a JSON string or an object carrying a `text` field,
    /// which covers both capture payload shapes the extension produces.
    pub fn content_text(&self) -> Option<&str> {
        match self.content.as_ref()? {
            Value::String(s) => Some(s),
            Value::Object(map) => map.get("text").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Structured outcome of [`ResilienceEngine::execute`].
///
/// [`ResilienceEngine::execute`]: crate::engine::ResilienceEngine::execute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub success: bool,
    /// Number of attempts actually made; 0 when admission was rejected.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(default)]
    pub circuit_breaker_open: bool,
    #[serde(default)]
    pub used_fallback: bool,
}

impl ExecutionReport {
    pub(crate) fn success(attempts: u32, data: Value) -> Self {
        Self {
            success: true,
            attempts,
            data: Some(data),
            error: None,
            error_category: None,
            circuit_breaker_open: false,
            used_fallback: false,
        }
    }

    pub(crate) fn fallback(attempts: u32, data: Value, info: &ErrorInfo) -> Self {
        Self {
            success: true,
            attempts,
            data: Some(data),
            error: Some(info.message.clone()),
            error_category: Some(info.category),
            circuit_breaker_open: false,
            used_fallback: true,
        }
    }

    pub(crate) fn failure(attempts: u32, info: &ErrorInfo) -> Self {
        Self {
            success: false,
            attempts,
            data: None,
            error: Some(info.message.clone()),
            error_category: Some(info.category),
            circuit_breaker_open: false,
            used_fallback: false,
        }
    }

    /// Rejected before the first attempt (circuit open or resource limit).
    pub(crate) fn rejected(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            success: false,
            attempts: 0,
            data: None,
            error: Some(message.into()),
            error_category: Some(category),
            circuit_breaker_open: category == ErrorCategory::CircuitBreaker,
            used_fallback: false,
        }
    }
}
