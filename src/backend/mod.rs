//! Generative backend client.
//!
//! [`BackendClient`] is the single gateway to the hosted generative-text
//! service. It layers, in order: a TTL response cache keyed by
//! (prompt, options), a coalescing batcher that guarantees at most one
//! outstanding upstream call per distinct key, and credential rotation that
//! retries a quota/auth failure once on an alternate credential before
//! surfacing it.

pub mod batch;
pub mod cache;
pub mod credentials;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::error::BackendError;
use batch::Batcher;
use cache::{cache_key, TtlCache};
use credentials::CredentialPool;

/// Options accompanying one generation request. Part of the cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Optional model hint forwarded to the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,
    /// Ask the backend for a JSON-only answer.
    #[serde(default)]
    pub json: bool,
}

/// One prompt submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub options: GenerateOptions,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            options: GenerateOptions::default(),
        }
    }

    pub fn with_options(prompt: impl Into<String>, options: GenerateOptions) -> Self {
        Self {
            prompt: prompt.into(),
            options,
        }
    }

    /// Deterministic cache/batch key for this request.
    pub fn key(&self) -> String {
        let options = serde_json::to_string(&self.options).unwrap_or_default();
        cache_key("generate", &[&self.prompt, &options])
    }
}

/// Structured text returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
}

/// Transport to the generative service, parameterized over the credential
/// used for one call. The HTTP implementation is [`HttpBackend`]; tests
/// inject scripted implementations.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate(
        &self,
        credential: &str,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, BackendError>;
}

/// HTTP transport speaking the backend contract:
/// `POST {base}/generate {prompt, modelHint?} → {text}`.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_hint: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GenerateWireResponse {
    text: String,
}

#[async_trait]
impl GenerativeBackend for HttpBackend {
    async fn generate(
        &self,
        credential: &str,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, BackendError> {
        let url = format!("{}/generate", self.endpoint);
        let body = GenerateBody {
            prompt: &request.prompt,
            model_hint: request.options.model_hint.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.timeout.as_secs())
                } else {
                    BackendError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        match status.as_u16() {
            429 => return Err(BackendError::QuotaExceeded),
            401 | 403 => return Err(BackendError::AuthRejected),
            s if status.is_client_error() || status.is_server_error() => {
                return Err(BackendError::Unavailable(format!("backend returned {}", s)))
            }
            _ => {}
        }

        let wire: GenerateWireResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        Ok(GenerateResponse { text: wire.text })
    }
}

/// The credential-rotating, cached, coalescing client.
pub struct BackendClient {
    backend: Arc<dyn GenerativeBackend>,
    pool: Arc<CredentialPool>,
    cache: TtlCache<GenerateResponse>,
    batcher: Batcher<GenerateResponse>,
}

impl BackendClient {
    /// Build a client over the HTTP transport described by `config`.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let backend = HttpBackend::new(config.backend_url.clone(), config.request_timeout);
        Self::new(Arc::new(backend), config.credentials.clone(), config)
    }

    /// Build a client over an arbitrary transport (used by tests).
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        credentials: Vec<String>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            backend,
            pool: Arc::new(CredentialPool::new(credentials)),
            cache: TtlCache::new(config.response_cache_ttl),
            batcher: Batcher::new(config.batch_window),
        }
    }

    /// Submit a prompt and await its text.
    ///
    /// Identical concurrent requests resolve from a single upstream call;
    /// repeated requests within the cache TTL never reach the backend.
    pub async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<GenerateResponse, BackendError> {
        let key = request.key();

        if let Some(hit) = self.cache.get(&key) {
            debug!(cache = "hit", "backend response served from cache");
            return Ok(hit);
        }

        let backend = Arc::clone(&self.backend);
        let pool = Arc::clone(&self.pool);
        let result = self
            .batcher
            .submit(key.clone(), move || async move {
                call_with_rotation(backend, pool, request).await
            })
            .await;

        if let Ok(response) = &result {
            self.cache.insert(key, response.clone());
        }
        result
    }

    /// Convenience wrapper for plain prompts.
    pub async fn generate_text(&self, prompt: &str) -> Result<String, BackendError> {
        self.generate(GenerateRequest::new(prompt))
            .await
            .map(|r| r.text)
    }

    /// Slots currently usable in the credential pool.
    pub fn usable_credentials(&self) -> usize {
        self.pool.usable_slots()
    }
}

/// One call with at most one rotation: on a quota/auth failure the failing
/// slot is put on cooldown and the request retried once with the next
/// usable credential.
async fn call_with_rotation(
    backend: Arc<dyn GenerativeBackend>,
    pool: Arc<CredentialPool>,
    request: GenerateRequest,
) -> Result<GenerateResponse, BackendError> {
    let lease = pool.lease()?;
    match backend.generate(&lease.key, &request).await {
        Ok(response) => Ok(response),
        Err(err) if err.is_credential_error() => {
            warn!(slot = lease.slot_id, %err, "credential failed, rotating");
            pool.mark_cooldown(lease.slot_id);
            let retry = pool.lease()?;
            backend.generate(&retry.key, &request).await
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend used across the crate's tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Backend that pops pre-programmed results per call and counts calls.
    pub struct ScriptedBackend {
        script: Mutex<VecDeque<Result<GenerateResponse, BackendError>>>,
        pub calls: AtomicUsize,
        /// Result returned when the script runs dry.
        fallback_text: String,
    }

    impl ScriptedBackend {
        pub fn new(script: Vec<Result<GenerateResponse, BackendError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                fallback_text: "scripted response".to_string(),
            }
        }

        pub fn always(text: &str) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                fallback_text: text.to_string(),
            }
        }

        pub fn ok(text: &str) -> Result<GenerateResponse, BackendError> {
            Ok(GenerateResponse { text: text.into() })
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerativeBackend for ScriptedBackend {
        async fn generate(
            &self,
            _credential: &str,
            _request: &GenerateRequest,
        ) -> Result<GenerateResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().pop_front().unwrap_or_else(|| {
                Ok(GenerateResponse {
                    text: self.fallback_text.clone(),
                })
            })
        }
    }

    /// Backend that answers by prompt content rather than call order, for
    /// tests whose requests run concurrently.
    pub struct RoutedBackend {
        routes: Vec<(String, Result<GenerateResponse, BackendError>)>,
        fallback_text: String,
    }

    impl RoutedBackend {
        /// Each route is a substring matched against the prompt; the first
        /// match wins. Unmatched prompts get the standard fallback text.
        pub fn new(routes: Vec<(&str, Result<GenerateResponse, BackendError>)>) -> Self {
            Self {
                routes: routes
                    .into_iter()
                    .map(|(needle, result)| (needle.to_string(), result))
                    .collect(),
                fallback_text: "scripted response".to_string(),
            }
        }
    }

    #[async_trait]
    impl GenerativeBackend for RoutedBackend {
        async fn generate(
            &self,
            _credential: &str,
            request: &GenerateRequest,
        ) -> Result<GenerateResponse, BackendError> {
            for (needle, result) in &self.routes {
                if request.prompt.contains(needle.as_str()) {
                    return result.clone();
                }
            }
            Ok(GenerateResponse {
                text: self.fallback_text.clone(),
            })
        }
    }

    /// A client with two credentials, a short batch window, and the given
    /// scripted transport.
    pub fn client_with(backend: ScriptedBackend) -> BackendClient {
        client_with_shared(Arc::new(backend))
    }

    /// Same as [`client_with`] but keeps the transport shared so tests can
    /// inspect call counts.
    pub fn client_with_shared(backend: Arc<ScriptedBackend>) -> BackendClient {
        let mut config = OrchestratorConfig::default();
        config.batch_window = Duration::from_millis(5);
        BackendClient::new(backend, vec!["key-1".into(), "key-2".into()], &config)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{client_with, ScriptedBackend};
    use super::*;

    #[tokio::test]
    async fn test_quota_error_rotates_and_retries_once() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::QuotaExceeded),
            ScriptedBackend::ok("recovered"),
        ]);
        let client = client_with(backend);

        let response = client
            .generate(GenerateRequest::new("design a cache layer"))
            .await
            .unwrap();
        assert_eq!(response.text, "recovered");
        // One slot burned, one remaining.
        assert_eq!(client.usable_credentials(), 1);
    }

    #[tokio::test]
    async fn test_second_credential_failure_surfaces() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::QuotaExceeded),
            Err(BackendError::QuotaExceeded),
        ]);
        let client = client_with(backend);

        let err = client
            .generate(GenerateRequest::new("p"))
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::QuotaExceeded);
    }

    #[tokio::test]
    async fn test_non_credential_errors_do_not_rotate() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Timeout(30))]);
        let client = client_with(backend);

        let err = client
            .generate(GenerateRequest::new("p"))
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Timeout(30));
        assert_eq!(client.usable_credentials(), 2);
    }

    #[tokio::test]
    async fn test_cache_prevents_repeat_upstream_calls() {
        let backend = Arc::new(ScriptedBackend::always("cached"));
        let client = super::testing::client_with_shared(Arc::clone(&backend));

        let first = client.generate_text("same prompt").await.unwrap();
        let second = client.generate_text("same prompt").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_coalesce() {
        let backend = Arc::new(ScriptedBackend::always("one"));
        let client = Arc::new(super::testing::client_with_shared(Arc::clone(&backend)));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                client.generate_text("identical").await.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "one");
        }
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_options_participate_in_the_key() {
        let a = GenerateRequest::new("p");
        let b = GenerateRequest::with_options(
            "p",
            GenerateOptions {
                model_hint: Some("fast".into()),
                json: false,
            },
        );
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), GenerateRequest::new("p").key());
    }
}
