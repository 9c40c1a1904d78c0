//! OAuth token exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (last stage of the headless login)
//! 2. Token refresh (request-time and background refresh)
//!
//! Both POST form bodies to the policy's token endpoint with different grant
//! types. The provider reports `expires_on` as an absolute epoch second and
//! sometimes encodes numbers as strings, so numeric fields accept both.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::config::IdpConfig;
use crate::constants::{DEFAULT_ACCESS_TOKEN_LIFETIME_SECS, DEFAULT_REFRESH_TOKEN_LIFETIME_SECS};
use crate::error::{Error, Result};
use crate::store::StoredTokens;

/// Response from the token endpoint for both exchange and refresh.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Absent on some refresh responses; the previous token stays valid then.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Absolute access token expiry, epoch seconds
    #[serde(default, deserialize_with = "lenient_u64")]
    pub expires_on: Option<u64>,
    /// Access token lifetime in seconds (delta)
    #[serde(default, deserialize_with = "lenient_u64")]
    pub expires_in: Option<u64>,
    /// Refresh token lifetime in seconds (delta)
    #[serde(default, deserialize_with = "lenient_u64")]
    pub refresh_token_expires_in: Option<u64>,
}

impl TokenResponse {
    /// Absolute access token expiry, preferring the provider's `expires_on`.
    pub fn access_expires_at(&self, now: u64) -> u64 {
        self.expires_on.unwrap_or_else(|| {
            now + self
                .expires_in
                .unwrap_or(DEFAULT_ACCESS_TOKEN_LIFETIME_SECS)
        })
    }

    /// Build the record for a fresh login. A login must yield a refresh token.
    pub fn into_stored(self, now: u64) -> Result<StoredTokens> {
        let expires_at = self.access_expires_at(now);
        let refresh_lifetime = self
            .refresh_token_expires_in
            .unwrap_or(DEFAULT_REFRESH_TOKEN_LIFETIME_SECS);
        let refresh_token = self.refresh_token.ok_or_else(|| {
            Error::TokenExchange("token response carried no refresh_token".into())
        })?;
        Ok(StoredTokens {
            access_token: self.access_token,
            refresh_token,
            expires_at,
            refresh_token_expires_at: now + refresh_lifetime,
        })
    }

    /// Build the record after a refresh.
    ///
    /// A returned refresh token replaces the previous one (rotation); when the
    /// response omits it, the previous token and its expiry are kept verbatim.
    pub fn rotate(self, previous: &StoredTokens, now: u64) -> StoredTokens {
        let expires_at = self.access_expires_at(now);
        let (refresh_token, refresh_token_expires_at) = match self.refresh_token {
            Some(rotated) => (
                rotated,
                now + self
                    .refresh_token_expires_in
                    .unwrap_or(DEFAULT_REFRESH_TOKEN_LIFETIME_SECS),
            ),
            None => (
                previous.refresh_token.clone(),
                previous.refresh_token_expires_at,
            ),
        };
        StoredTokens {
            access_token: self.access_token,
            refresh_token,
            expires_at,
            refresh_token_expires_at,
        }
    }
}

/// Error body returned by the token endpoint on failure.
#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Exchange an authorization code for tokens (last login stage).
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &IdpConfig,
    code: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(config.token_url())
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("scope", config.scope.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("code_verifier", verifier),
            ("client_info", "1"),
        ])
        .send()
        .await
        .map_err(|e| Error::Network(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {}",
            provider_message(&body)
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Refresh an access token using a refresh token.
///
/// Transport failures surface as `Network` (try again later); any rejection
/// by the provider surfaces as `Refresh` (run a full login).
pub async fn refresh_token(
    client: &reqwest::Client,
    config: &IdpConfig,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(config.token_url())
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("scope", config.scope.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("client_info", "1"),
        ])
        .send()
        .await
        .map_err(|e| Error::Network(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        debug!(%status, "refresh rejected by token endpoint");
        return Err(Error::Refresh(format!(
            "token endpoint returned {status}: {}",
            provider_message(&body)
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::Refresh(format!("invalid refresh response: {e}")))
}

/// Current time as epoch seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Prefer the provider's `error_description`, then `error`, then the raw body.
fn provider_message(body: &str) -> String {
    match serde_json::from_str::<TokenErrorBody>(body) {
        Ok(TokenErrorBody {
            error_description: Some(description),
            ..
        }) => description,
        Ok(TokenErrorBody {
            error: Some(error), ..
        }) => error,
        _ if body.is_empty() => String::from("<no body>"),
        _ => body.to_string(),
    }
}

/// Accept `123`, `"123"` or `null`.
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
