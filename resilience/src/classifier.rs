//! Failure classification.
//!
//! Raw operation failures arrive as opaque errors; the classifier turns them
//! into an [`ErrorInfo`] by running an ordered rule table of substring checks
//! against the lower-cased failure text. First match wins, and the table
//! order is part of the contract: network is checked before rate-limit,
//! rate-limit before authentication, and so on. The table is data, not
//! control flow, so deployments can swap in their own rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ExecutionContext;

/// Failure category, in the order the default rule table probes them.
///
/// `CircuitBreaker` and `ResourceProtection` are engine-internal admission
/// rejections; the rule table never produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    RateLimit,
    Authentication,
    Validation,
    AiService,
    Storage,
    Unknown,
    CircuitBreaker,
    ResourceProtection,
}

impl ErrorCategory {
    /// Wire name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::AiService => "ai_service",
            Self::Storage => "storage",
            Self::Unknown => "unknown",
            Self::CircuitBreaker => "circuit_breaker",
            Self::ResourceProtection => "resource_protection",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad a failure is, from an operator's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Classified failure. Derived once from the raw error and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Normalized service id from the originating context.
    pub service: String,
    pub operation: Option<String>,
}

/// One entry of the ordered rule table: the first needle found in the
/// lower-cased failure text selects the category.
#[derive(Debug, Clone)]
pub struct ClassifierRule {
    pub category: ErrorCategory,
    pub needles: Vec<String>,
}

impl ClassifierRule {
    fn new(category: ErrorCategory, needles: &[&str]) -> Self {
        Self {
            category,
            needles: needles.iter().map(|n| (*n).to_string()).collect(),
        }
    }

    fn matches(&self, haystack: &str) -> bool {
        self.needles.iter().any(|n| haystack.contains(n.as_str()))
    }
}

/// Default rule table. Order is the contract.
pub fn default_rules() -> Vec<ClassifierRule> {
    vec![
        ClassifierRule::new(ErrorCategory::Network, &["network", "timeout"]),
        ClassifierRule::new(
            ErrorCategory::RateLimit,
            &["quota", "rate limit", "rate-limit", "too many requests", "429"],
        ),
        ClassifierRule::new(
            ErrorCategory::Authentication,
            &["api key", "api-key", "auth", "unauthorized", "401", "403"],
        ),
        ClassifierRule::new(
            ErrorCategory::Validation,
            &["validation", "invalid", "too large", "too-large"],
        ),
        ClassifierRule::new(ErrorCategory::AiService, &["ai", "model", "prompt"]),
        ClassifierRule::new(ErrorCategory::Storage, &["storage"]),
    ]
}

/// Pure failure classifier; no side effects, no shared state.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassifierRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    /// Replace the rule table. Rules are probed in the given order.
    pub fn with_rules(rules: Vec<ClassifierRule>) -> Self {
        Self { rules }
    }

    /// Classify an opaque operation failure.
    ///
    /// The full error chain is rendered into the message so a wrapped
    /// `timeout` cause is still visible to the rule table.
    pub fn classify(&self, error: &anyhow::Error, context: &ExecutionContext) -> ErrorInfo {
        self.classify_message(&format!("{error:#}"), context)
    }

    /// Classify an already-rendered failure message.
    pub fn classify_message(&self, message: &str, context: &ExecutionContext) -> ErrorInfo {
        let lowered = message.to_lowercase();
        let category = self
            .rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map_or(ErrorCategory::Unknown, |rule| rule.category);

        ErrorInfo {
            category,
            severity: severity_for(category, context),
            retryable: is_retryable(category),
            message: message.to_string(),
            timestamp: Utc::now(),
            service: context.service_id().to_string(),
            operation: context.operation.clone(),
        }
    }
}

fn severity_for(category: ErrorCategory, context: &ExecutionContext) -> ErrorSeverity {
    match category {
        ErrorCategory::Storage => ErrorSeverity::Critical,
        ErrorCategory::AiService if context.critical => ErrorSeverity::High,
        ErrorCategory::Network => ErrorSeverity::Medium,
        _ => ErrorSeverity::Low,
    }
}

fn is_retryable(category: ErrorCategory) -> bool {
    !matches!(
        category,
        ErrorCategory::Validation | ErrorCategory::Authentication
    )
}
