//! Retry policy and attempt outcomes
//!
//! The executor loop only schedules: each attempt reports an
//! `AttemptOutcome`, the loop either sleeps and tries again or stops, and
//! `classify` turns the last failure into a `ClientError`.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use crate::envelope::ApiEnvelope;
use crate::error::ClientError;

/// Bounded linear backoff, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: `base × (attempt + 1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * (attempt + 1)
    }

    /// 408, 429 and the gateway-ish 5xx statuses.
    pub fn is_retryable(status: StatusCode) -> bool {
        matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
    }
}

/// Why an attempt did not complete.
#[derive(Debug, Clone)]
pub enum Failure {
    Timeout(String),
    Transport(String),
    Status { status: StatusCode, body: Vec<u8> },
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Timeout(msg) => write!(f, "timeout: {msg}"),
            Failure::Transport(msg) => write!(f, "transport: {msg}"),
            Failure::Status { status, .. } => write!(f, "status {status}"),
        }
    }
}

/// Result of one attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// 2xx with the raw body, still enveloped.
    Completed(Vec<u8>),
    Retryable(Failure),
    Terminal(Failure),
}

impl AttemptOutcome {
    /// Outcome for a response that arrived.
    pub fn from_status(status: StatusCode, body: Vec<u8>) -> Self {
        if status.is_success() {
            AttemptOutcome::Completed(body)
        } else if RetryPolicy::is_retryable(status) {
            AttemptOutcome::Retryable(Failure::Status { status, body })
        } else {
            AttemptOutcome::Terminal(Failure::Status { status, body })
        }
    }
}

/// Map the final failure to a caller-facing error.
///
/// No response → `Network`. A response whose body is an envelope with a
/// message → `Api`. Anything else → `Http` with the status description.
pub fn classify(failure: Failure) -> ClientError {
    match failure {
        Failure::Timeout(msg) => ClientError::Network(format!("request timed out: {msg}")),
        Failure::Transport(msg) => ClientError::Network(msg),
        Failure::Status { status, body } => {
            if let Ok(envelope) = serde_json::from_slice::<ApiEnvelope<Value>>(&body) {
                if let Some(message) = envelope.message() {
                    return ClientError::Api {
                        code: envelope.error_number,
                        message: message.to_string(),
                    };
                }
            }
            ClientError::Http {
                status: status.as_u16(),
                status_text: status
                    .canonical_reason()
                    .unwrap_or("Unknown Status")
                    .to_string(),
            }
        }
    }
}
