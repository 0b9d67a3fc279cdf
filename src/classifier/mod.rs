//! Classifier adapter.
//!
//! Wraps an external lightweight text-classification service that estimates
//! task complexity, intent, and technical domains. The adapter is a total
//! function: when the service is unreachable or answers outside its
//! contract, a deterministic local heuristic takes over and the result is
//! tagged [`ClassificationSource::Fallback`] with confidence capped at 0.6
//! so downstream consumers can tell degraded signal apart from model output.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::cache::{cache_key, TtlCache};
use crate::heuristics;

/// Confidence ceiling applied to every fallback classification.
pub const FALLBACK_CONFIDENCE_CAP: f64 = 0.6;

/// Broad intent of a task request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Small talk and greetings; short-circuits orchestration.
    Casual,
    /// Building something new.
    Creation,
    /// Reviewing or analyzing existing material.
    Analysis,
    /// Diagnosing and fixing.
    Debugging,
    /// Anything else.
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Casual => "casual",
            Self::Creation => "creation",
            Self::Analysis => "analysis",
            Self::Debugging => "debugging",
            Self::General => "general",
        }
    }

    /// Parse a service-provided intent label; unknown labels degrade to
    /// `General` rather than failing the classification.
    pub fn parse_lenient(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "casual" | "conversational" | "chat" => Self::Casual,
            "creation" | "create" | "technical" | "generation" => Self::Creation,
            "analysis" | "analyze" | "review" => Self::Analysis,
            "debugging" | "debug" | "fix" | "validation" => Self::Debugging,
            _ => Self::General,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// The remote classification model answered within contract.
    Model,
    /// Local keyword heuristics; confidence is capped.
    Fallback,
}

/// Result of classifying one task request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Estimated complexity in `[0, 1]`.
    pub complexity: f64,
    /// Confidence in the estimate, `[0, 1]`; at most 0.6 for fallbacks.
    pub confidence: f64,
    /// Broad intent.
    pub intent: Intent,
    /// Technical domains detected in the text.
    pub domains: Vec<String>,
    /// Model or fallback.
    pub source: ClassificationSource,
}

/// Wire shape of the remote `POST /classify` response.
#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    complexity: f64,
    confidence: f64,
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    domains: Vec<String>,
}

/// Wire shape of `GET /health`.
#[derive(Debug, Deserialize)]
pub struct ClassifierHealth {
    #[serde(default)]
    pub models: serde_json::Map<String, serde_json::Value>,
}

/// Adapter over the remote classification service with a local fallback and
/// a TTL cache keyed by the normalized input text.
pub struct ClassifierAdapter {
    client: reqwest::Client,
    endpoint: String,
    cache: TtlCache<Classification>,
}

impl ClassifierAdapter {
    /// Create an adapter for the service at `endpoint`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration, cache_ttl: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            cache: TtlCache::new(cache_ttl),
        }
    }

    /// Classify a task request.
    ///
    /// Never fails: remote errors, non-2xx statuses, and malformed payloads
    /// all degrade to the local heuristic result.
    pub async fn classify(&self, text: &str) -> Classification {
        let key = cache_key("classify", &[&normalize(text)]);
        if let Some(hit) = self.cache.get(&key) {
            debug!(cache = "hit", "classification served from cache");
            return hit;
        }

        let classification = match self.classify_remote(text).await {
            Ok(c) => c,
            Err(reason) => {
                warn!(%reason, "classifier unavailable, using fallback heuristics");
                heuristics::fallback_classification(text)
            }
        };

        self.cache.insert(key, classification.clone());
        classification
    }

    /// Probe the remote service.
    pub async fn health(&self) -> Option<ClassifierHealth> {
        let url = format!("{}/health", self.endpoint);
        let response = self.client.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }

    async fn classify_remote(&self, text: &str) -> Result<Classification, String> {
        let url = format!("{}/classify", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("classifier returned {}", status));
        }

        let body: ClassifyResponse = response.json().await.map_err(|e| e.to_string())?;

        let intent = body
            .intent
            .as_deref()
            .map(Intent::parse_lenient)
            .unwrap_or(Intent::General);

        Ok(Classification {
            complexity: body.complexity.clamp(0.0, 1.0),
            confidence: body.confidence.clamp(0.0, 1.0),
            intent,
            domains: body.domains,
            source: ClassificationSource::Model,
        })
    }
}

/// Normalize input text for cache keying: lowercase, collapsed whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
