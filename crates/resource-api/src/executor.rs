//! Resilient request executor
//!
//! One entry point, `request::<T>()`. Each attempt fetches a token, sends the
//! request with the bearer and `Api-Version` headers under a per-attempt
//! timeout, and reports an `AttemptOutcome`. Timeouts and retryable statuses
//! are retried within the policy budget; everything else stops the loop.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::TokenSource;
use crate::envelope;
use crate::error::{ClientError, Result};
use crate::retry::{AttemptOutcome, Failure, RetryPolicy, classify};

pub const API_VERSION_HEADER: &str = "Api-Version";
pub const API_VERSION: &str = "2.0";

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// A downstream operation: method, path segments relative to the base URL,
/// query pairs and an optional JSON body.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestSpec {
    pub fn new(method: Method, segments: &[&str]) -> Self {
        Self {
            method,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(segments: &[&str]) -> Self {
        Self::new(Method::GET, segments)
    }

    pub fn put(segments: &[&str], body: Value) -> Self {
        Self::new(Method::PUT, segments).with_body(body)
    }

    pub fn post(segments: &[&str], body: Value) -> Self {
        Self::new(Method::POST, segments).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Short label for logs, e.g. `GET devices/d1/status`.
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.segments.join("/"))
    }
}

pub struct RequestExecutor {
    client: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RequestExecutor {
    /// Fails with `InvalidBaseUrl` when `base_url` cannot take path segments
    /// (`mailto:`, `data:` and the like).
    pub fn new(client: reqwest::Client, base_url: Url, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl(format!(
                "{base_url} cannot take a path"
            )));
        }
        Ok(Self {
            client,
            base_url,
            tokens,
            policy: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Perform the operation and decode the envelope body into `T`.
    #[instrument(skip_all, fields(request = %spec.label()))]
    pub async fn request<T: DeserializeOwned>(&self, spec: &RequestSpec) -> Result<T> {
        let url = self.url_for(spec)?;

        let mut attempt = 0u32;
        let failure = loop {
            let token = self.tokens.access_token().await?;
            match self.attempt(&url, spec, &token).await {
                AttemptOutcome::Completed(body) => {
                    let result = envelope::decode(&body);
                    record(if result.is_ok() { "success" } else { "error" });
                    return result;
                }
                AttemptOutcome::Retryable(failure) if attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        failure = %failure,
                        "retrying resource request"
                    );
                    metrics::counter!("resource_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                AttemptOutcome::Retryable(failure) | AttemptOutcome::Terminal(failure) => {
                    break failure;
                }
            }
        };

        warn!(attempts = attempt + 1, failure = %failure, "resource request failed");
        record("error");
        Err(classify(failure))
    }

    async fn attempt(&self, url: &Url, spec: &RequestSpec, token: &str) -> AttemptOutcome {
        let mut request = self
            .client
            .request(spec.method.clone(), url.clone())
            .bearer_auth(token)
            .header(API_VERSION_HEADER, API_VERSION)
            .header(ACCEPT, "application/json")
            .timeout(self.timeout);
        if let Some(body) = &spec.body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return AttemptOutcome::Retryable(Failure::Timeout(e.to_string())),
            Err(e) => return AttemptOutcome::Terminal(Failure::Transport(e.to_string())),
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) if e.is_timeout() => return AttemptOutcome::Retryable(Failure::Timeout(e.to_string())),
            Err(e) => return AttemptOutcome::Terminal(Failure::Transport(e.to_string())),
        };
        debug!(%status, bytes = body.len(), "resource response");
        AttemptOutcome::from_status(status, body)
    }

    fn url_for(&self, spec: &RequestSpec) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidBaseUrl(format!("{} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(&spec.segments);
        if !spec.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&spec.query);
        }
        Ok(url)
    }
}

fn record(outcome: &'static str) {
    metrics::counter!("resource_requests_total", "outcome" => outcome).increment(1);
}
