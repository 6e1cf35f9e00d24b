//! Degraded-mode fallbacks.
//!
//! When retries are exhausted, the engine asks the fallback registry for a
//! locally-computable substitute result. Strategies are keyed by service id
//! and replaceable at runtime (last registration wins). Built-ins cover the
//! three canonical Curio services; anything else gets the generic keyword
//! fallback. Every degraded payload is tagged `processingMode: "degraded"`
//! so downstream consumers can tell it from a real AI result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::classifier::ErrorInfo;
use crate::types::ExecutionContext;

/// A fallback strategy: produce a degraded result for a failed call, or
/// `None` when no recovery is possible.
pub type FallbackFn = Arc<dyn Fn(&ErrorInfo, &ExecutionContext) -> Option<Value> + Send + Sync>;

/// Marker value for degraded payloads.
pub const DEGRADED_MODE: &str = "degraded";

const SUMMARY_MAX_CHARS: usize = 200;
const MIN_KEYWORD_LEN: usize = 5;
const MAX_KEYWORDS: usize = 5;

/// Category keyword rules shared by the categorizer built-in and the generic
/// fallback.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("technology", &["software", "code", "computer", "api", "programming", "developer"]),
    ("science", &["research", "study", "experiment", "physics", "biology"]),
    ("business", &["market", "startup", "company", "finance", "revenue"]),
    ("health", &["medical", "doctor", "disease", "fitness", "nutrition"]),
    ("news", &["breaking", "report", "announced", "today"]),
];

/// Registry of per-service fallback strategies.
pub struct FallbackRegistry {
    strategies: Mutex<HashMap<String, FallbackFn>>,
}

impl Default for FallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackRegistry {
    /// Registry with the built-in strategies for the canonical services.
    pub fn new() -> Self {
        let mut strategies: HashMap<String, FallbackFn> = HashMap::new();
        strategies.insert("summarizer".to_string(), Arc::new(summarizer_fallback));
        strategies.insert("categorizer".to_string(), Arc::new(categorizer_fallback));
        strategies.insert("writer".to_string(), Arc::new(writer_fallback));
        Self {
            strategies: Mutex::new(strategies),
        }
    }

    /// Register (or replace) the strategy for a service id.
    pub fn register(&self, service: impl Into<String>, strategy: FallbackFn) {
        let mut strategies = self.strategies.lock().unwrap_or_else(|p| p.into_inner());
        strategies.insert(service.into(), strategy);
    }

    /// Attempt recovery for a failed call.
    ///
    /// Looks up the strategy for `context`'s service; unknown services run
    /// the generic keyword fallback. The strategy runs outside the registry
    /// lock so a slow strategy cannot block registration.
    pub fn attempt(&self, error: &ErrorInfo, context: &ExecutionContext) -> Option<Value> {
        let strategy = {
            let strategies = self.strategies.lock().unwrap_or_else(|p| p.into_inner());
            strategies.get(context.service_id()).cloned()
        };
        match strategy {
            Some(strategy) => strategy(error, context),
            None => generic_fallback(error, context),
        }
    }
}

/// Truncate the captured text into a crude extractive summary.
fn summarizer_fallback(_error: &ErrorInfo, context: &ExecutionContext) -> Option<Value> {
    let text = context.content_text()?.trim();
    if text.is_empty() {
        return None;
    }

    // Prefer a sentence boundary inside the window; hard-cut otherwise.
    let summary = match first_sentences(text, 2) {
        Some(s) if s.chars().count() <= SUMMARY_MAX_CHARS => s.to_string(),
        _ => truncate_chars(text, SUMMARY_MAX_CHARS),
    };

    Some(json!({
        "summary": summary,
        "service": "summarizer",
        "processingMode": DEGRADED_MODE,
    }))
}

/// Pick a category from keyword hits in the captured text.
fn categorizer_fallback(_error: &ErrorInfo, context: &ExecutionContext) -> Option<Value> {
    let text = context.content_text()?.to_lowercase();
    if text.trim().is_empty() {
        return None;
    }

    let (category, hits) = best_category(&text);
    Some(json!({
        "category": category,
        "matches": hits,
        "service": "categorizer",
        "processingMode": DEGRADED_MODE,
    }))
}

/// Echo the prompt back as a template draft.
fn writer_fallback(_error: &ErrorInfo, context: &ExecutionContext) -> Option<Value> {
    let prompt = context.content_text()?.trim();
    if prompt.is_empty() {
        return None;
    }

    let draft = format!(
        "Draft (offline): {}",
        truncate_chars(prompt, SUMMARY_MAX_CHARS)
    );
    Some(json!({
        "draft": draft,
        "service": "writer",
        "processingMode": DEGRADED_MODE,
    }))
}

/// Generic degraded payload for services with no registered strategy:
/// keyword tokens, a rule-based category, and a truncated summary.
fn generic_fallback(_error: &ErrorInfo, context: &ExecutionContext) -> Option<Value> {
    let text = context.content_text()?.trim();
    if text.is_empty() {
        return None;
    }

    let lowered = text.to_lowercase();
    let keywords = keyword_tokens(&lowered);
    let (category, _) = best_category(&lowered);

    Some(json!({
        "summary": truncate_chars(text, SUMMARY_MAX_CHARS),
        "category": category,
        "keywords": keywords,
        "processingMode": DEGRADED_MODE,
    }))
}

fn first_sentences(text: &str, count: usize) -> Option<&str> {
    let mut seen = 0;
    for (idx, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            seen += 1;
            if seen == count {
                return Some(&text[..=idx]);
            }
        }
    }
    None
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

/// Length-filtered, deduplicated keyword tokens, most frequent first.
fn keyword_tokens(lowered: &str) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in lowered.split(|c: char| !c.is_alphanumeric()) {
        if token.len() >= MIN_KEYWORD_LEN && !is_stopword(token) {
            *counts.entry(token).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(token, _)| token.to_string())
        .collect()
}

fn is_stopword(token: &str) -> bool {
    matches!(
        token,
        "about" | "after" | "there" | "their" | "these" | "those" | "which" | "while"
            | "would" | "could" | "should" | "where" | "because" | "before" | "being"
    )
}

/// Count keyword hits per category; the best non-zero category wins,
/// otherwise `general`.
fn best_category(lowered: &str) -> (&'static str, usize) {
    let mut best = ("general", 0);
    for (category, keywords) in CATEGORY_KEYWORDS {
        let hits = keywords.iter().filter(|k| lowered.contains(**k)).count();
        if hits > best.1 {
            best = (category, hits);
        }
    }
    best
}
