//! Resilient backend API client
//!
//! Every call to the chat and TTS backend goes through [`ResilientClient`],
//! which layers three behaviours over a [`Transport`]:
//!
//! - a per-attempt timeout (a late response is abandoned, not aborted)
//! - bounded retry with exponential backoff
//! - a TTL cache for read-shaped (`GET`) responses

pub mod cache;
pub mod retry;
pub mod transport;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use cache::{CacheEntry, ResponseCache};
pub use retry::{IDEMPOTENCY_KEY_HEADER, RetryPolicy, delay_for_attempt};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};

use crate::config::ApiConfig;
use crate::{Error, Result};

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables for a [`ResilientClient`]
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Per-attempt deadline
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            cache_ttl: cache::DEFAULT_TTL,
            cache_max_entries: cache::DEFAULT_MAX_ENTRIES,
        }
    }
}

impl ClientSettings {
    #[must_use]
    pub fn from_config(api: &ApiConfig, retry: &RetryPolicy) -> Self {
        Self {
            timeout: api.timeout,
            retry: retry.clone(),
            cache_ttl: api.cache_ttl,
            cache_max_entries: api.cache_max_entries,
        }
    }
}

/// Request executor with timeout, retry and response caching
///
/// The cache is owned by the instance; two clients never share entries.
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    retry: RetryPolicy,
    cache: Mutex<ResponseCache>,
}

impl ResilientClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, settings: ClientSettings) -> Self {
        Self {
            transport,
            timeout: settings.timeout,
            retry: settings.retry,
            cache: Mutex::new(ResponseCache::new(
                settings.cache_ttl,
                settings.cache_max_entries,
            )),
        }
    }

    /// Create a client talking HTTP to `api.base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is invalid
    pub fn from_config(api: &ApiConfig, retry: &RetryPolicy) -> Result<Self> {
        let transport = ReqwestTransport::new(&api.base_url)?;
        Ok(Self::new(
            Arc::new(transport),
            ClientSettings::from_config(api, retry),
        ))
    }

    /// Execute a request with caching, timeout and retry.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a POST with an empty body (never retried)
    /// - [`Error::Timeout`] if the final attempt exceeded the deadline
    /// - [`Error::Api`] for a final 5xx, [`Error::Network`] for any other
    ///   final non-2xx status or connectivity failure
    /// - [`Error::Serialization`] if the final response was not JSON
    pub async fn request(&self, request: HttpRequest) -> Result<Value> {
        validate(&request)?;

        let key = cache_key(&request);
        let attempts = self.retry.attempts_for(&request);
        let mut attempt = 1;

        loop {
            match self.attempt(&request, &key).await {
                Ok(data) => return Ok(data),
                Err(e) if !e.is_retryable() || attempt >= attempts => {
                    if attempts > 1 {
                        tracing::warn!(
                            method = %request.method,
                            url = %request.url,
                            attempts = attempt,
                            error = %e,
                            "request failed"
                        );
                    }
                    return Err(e);
                }
                Err(e) => {
                    let delay = delay_for_attempt(&self.retry, attempt);
                    tracing::warn!(
                        method = %request.method,
                        url = %request.url,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// `GET url`
    ///
    /// # Errors
    ///
    /// See [`Self::request`]
    pub async fn get(&self, url: &str) -> Result<Value> {
        self.request(HttpRequest::get(url)).await
    }

    /// `POST url` with a JSON body
    ///
    /// # Errors
    ///
    /// See [`Self::request`]
    pub async fn post<B: Serialize + Sync>(&self, url: &str, body: &B) -> Result<Value> {
        let body = serde_json::to_value(body)?;
        self.request(HttpRequest::post(url, body)).await
    }

    /// `GET url` decoded into `T`
    ///
    /// # Errors
    ///
    /// See [`Self::request`]; also fails if the payload does not match `T`
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let value = self.get(url).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `POST url` decoded into `T`
    ///
    /// # Errors
    ///
    /// See [`Self::request`]; also fails if the payload does not match `T`
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let value = self.post(url, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Execute an arbitrary request and decode into `T`
    ///
    /// # Errors
    ///
    /// See [`Self::request`]
    pub async fn request_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T> {
        let value = self.request(request).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Drop every cached response
    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    /// Number of cached responses (including not-yet-evicted stale ones)
    #[must_use]
    pub fn cached_entries(&self) -> usize {
        self.lock_cache().len()
    }

    async fn attempt(&self, request: &HttpRequest, key: &str) -> Result<Value> {
        // Checked on every attempt: a previous attempt may have populated or
        // outlived the entry while we were sleeping
        if request.is_read() {
            if let Some(data) = self.lock_cache().get(key) {
                tracing::debug!(url = %request.url, "serving response from cache");
                return Ok(data);
            }
        }

        let response = tokio::time::timeout(self.timeout, self.transport.send(request.clone()))
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;

        if !response.is_success() {
            return Err(classify_status(&response));
        }

        let data: Value = if response.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&response.body)?
        };

        if request.is_read() {
            self.lock_cache().insert(key.to_string(), data.clone());
        }

        Ok(data)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, ResponseCache> {
        self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Cache key: method, URL and serialized body
#[must_use]
pub fn cache_key(request: &HttpRequest) -> String {
    let body = request
        .body
        .as_ref()
        .map(Value::to_string)
        .unwrap_or_default();

    format!("{}:{}:{}", request.method, request.url, body)
}

/// Map a failed status onto the error taxonomy.
///
/// 5xx is an [`Error::Api`]; every other failure, 4xx included, is reported
/// as [`Error::Network`].
// TODO: classify 4xx as validation/API once the backend returns structured error bodies
#[must_use]
pub fn classify_status(response: &HttpResponse) -> Error {
    let body = response.text();
    let message = if body.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        format!("HTTP {}: {}", response.status, truncate(&body, 200))
    };

    if response.status >= 500 {
        Error::Api {
            status: response.status,
            message,
        }
    } else {
        Error::Network(message)
    }
}

fn validate(request: &HttpRequest) -> Result<()> {
    if request.url.trim().is_empty() {
        return Err(Error::Validation("request URL is empty".to_string()));
    }

    if request.method == Method::Post {
        let empty = match &request.body {
            None | Some(Value::Null) => true,
            Some(Value::Object(map)) => map.is_empty(),
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if empty {
            return Err(Error::Validation(format!(
                "POST {} requires a non-empty body",
                request.url
            )));
        }
    }

    Ok(())
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(idx, _)| &text[..idx])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cache_key_includes_method_url_body() {
        let get = HttpRequest::get("/api/welcome");
        let post = HttpRequest::post("/api/tts", json!({"text": "hi"}));

        assert_eq!(cache_key(&get), "GET:/api/welcome:");
        assert_eq!(cache_key(&post), r#"POST:/api/tts:{"text":"hi"}"#);
    }

    #[test]
    fn status_classification() {
        let server = classify_status(&HttpResponse {
            status: 503,
            body: Vec::new(),
        });
        assert!(matches!(server, Error::Api { status: 503, .. }));

        let client = classify_status(&HttpResponse {
            status: 404,
            body: b"not found".to_vec(),
        });
        match client {
            Error::Network(msg) => assert_eq!(msg, "HTTP 404: not found"),
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[test]
    fn empty_post_bodies_rejected() {
        for body in [json!(null), json!({}), json!("  ")] {
            let err = validate(&HttpRequest::post("/api/respond", body)).unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
        assert!(validate(&HttpRequest::post("/api/respond", json!({"text": "x"}))).is_ok());
        assert!(validate(&HttpRequest::get("")).is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
