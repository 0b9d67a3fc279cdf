//! Orchestrator configuration.
//!
//! Every empirically tuned threshold in the engine (routing complexity,
//! completion score, selection confidence, subtask cap, batching window,
//! cache TTLs) lives here rather than as a hard-coded constant, so callers
//! and tests can treat them as boundary values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default complexity score above which multi-agent coordination is used.
pub const DEFAULT_ROUTING_THRESHOLD: f64 = 0.7;

/// Default completion score at which a conversation loop terminates.
pub const DEFAULT_COMPLETION_THRESHOLD: f64 = 0.8;

/// Default selection confidence below which agent selection escalates to the
/// generative backend.
pub const DEFAULT_SELECTION_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Default upper bound on conversation turns per agent invocation.
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// Default upper bound on sub-tasks produced by decomposition.
pub const DEFAULT_MAX_SUBTASKS: usize = 5;

/// Default batching window for coalescing identical backend requests.
pub const DEFAULT_BATCH_WINDOW_MS: u64 = 100;

/// Configuration for the whole orchestration engine.
///
/// Constructed once at startup (typically via [`OrchestratorConfig::from_env`])
/// and passed by reference into every component; there is no process-wide
/// global.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Complexity score at or above which the coordinated (multi-agent) path
    /// is taken instead of the simple single-agent path.
    pub routing_threshold: f64,

    /// Completion score at which the conversation loop stops.
    pub completion_threshold: f64,

    /// Agent-selection confidence below which selection escalates to a
    /// backend-assisted choice.
    pub selection_confidence_threshold: f64,

    /// Maximum conversation turns per agent invocation.
    pub max_turns: u32,

    /// Maximum number of sub-tasks a decomposition may produce.
    pub max_subtasks: usize,

    /// Window during which identical backend requests are coalesced.
    #[serde(with = "duration_ms")]
    pub batch_window: Duration,

    /// TTL for cached classification results.
    #[serde(with = "duration_ms")]
    pub classification_cache_ttl: Duration,

    /// TTL for cached backend responses.
    #[serde(with = "duration_ms")]
    pub response_cache_ttl: Duration,

    /// Per-call timeout for classifier and backend requests.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,

    /// Base URL of the text-classification service.
    pub classifier_url: String,

    /// Base URL of the generative text backend.
    pub backend_url: String,

    /// Credential pool for the generative backend. At least two keys are
    /// expected so quota failures can rotate.
    pub credentials: Vec<String>,

    /// Optional model hint forwarded to the backend.
    pub model_hint: Option<String>,

    /// Maximum rendered prompt length in characters before the length
    /// optimization pass truncates to essential sections.
    pub max_prompt_chars: usize,

    /// Number of most recent turns included in continuation prompts.
    pub history_turns: usize,

    /// Character cap on the condensed history block.
    pub history_char_cap: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            routing_threshold: DEFAULT_ROUTING_THRESHOLD,
            completion_threshold: DEFAULT_COMPLETION_THRESHOLD,
            selection_confidence_threshold: DEFAULT_SELECTION_CONFIDENCE_THRESHOLD,
            max_turns: DEFAULT_MAX_TURNS,
            max_subtasks: DEFAULT_MAX_SUBTASKS,
            batch_window: Duration::from_millis(DEFAULT_BATCH_WINDOW_MS),
            classification_cache_ttl: Duration::from_secs(10 * 60),
            response_cache_ttl: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(30),
            classifier_url: "http://localhost:8000".to_string(),
            backend_url: "http://localhost:8080".to_string(),
            credentials: Vec::new(),
            model_hint: None,
            max_prompt_chars: 8000,
            history_turns: 3,
            history_char_cap: 2000,
        }
    }
}

impl OrchestratorConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized variables:
    /// `ATELIER_CLASSIFIER_URL`, `ATELIER_BACKEND_URL`,
    /// `ATELIER_BACKEND_KEY` / `ATELIER_BACKEND_KEY_2`,
    /// `ATELIER_ROUTING_THRESHOLD`, `ATELIER_COMPLETION_THRESHOLD`,
    /// `ATELIER_MAX_TURNS`, `ATELIER_MAX_SUBTASKS`, `ATELIER_MODEL_HINT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("ATELIER_CLASSIFIER_URL") {
            config.classifier_url = url;
        }
        if let Ok(url) = std::env::var("ATELIER_BACKEND_URL") {
            config.backend_url = url;
        }
        if let Ok(key) = std::env::var("ATELIER_BACKEND_KEY") {
            config.credentials.push(key);
        }
        if let Ok(key) = std::env::var("ATELIER_BACKEND_KEY_2") {
            config.credentials.push(key);
        }
        if let Some(v) = parse_env("ATELIER_ROUTING_THRESHOLD") {
            config.routing_threshold = v;
        }
        if let Some(v) = parse_env("ATELIER_COMPLETION_THRESHOLD") {
            config.completion_threshold = v;
        }
        if let Some(v) = parse_env("ATELIER_MAX_TURNS") {
            config.max_turns = v;
        }
        if let Some(v) = parse_env("ATELIER_MAX_SUBTASKS") {
            config.max_subtasks = v;
        }
        if let Ok(hint) = std::env::var("ATELIER_MODEL_HINT") {
            config.model_hint = Some(hint);
        }

        config
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.routing_threshold, 0.7);
        assert_eq!(config.completion_threshold, 0.8);
        assert_eq!(config.max_turns, 10);
        assert_eq!(config.max_subtasks, 5);
        assert_eq!(config.batch_window, Duration::from_millis(100));
        assert_eq!(config.response_cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_serde_round_trip() {
        let config = OrchestratorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_turns, config.max_turns);
        assert_eq!(back.batch_window, config.batch_window);
    }
}
