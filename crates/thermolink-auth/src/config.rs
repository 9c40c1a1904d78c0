//! Identity provider endpoint configuration
//!
//! Endpoints are derived from a base URL, tenant and policy. The defaults
//! point at the hosted tenant; the agent overrides them for regional hosts
//! and tests point them at a local server.

use crate::constants::{CLIENT_ID, IDP_BASE_URL, POLICY, REDIRECT_URI, SCOPES, TENANT};

#[derive(Debug, Clone)]
pub struct IdpConfig {
    pub base_url: String,
    pub tenant: String,
    pub policy: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            base_url: IDP_BASE_URL.to_string(),
            tenant: TENANT.to_string(),
            policy: POLICY.to_string(),
            client_id: CLIENT_ID.to_string(),
            redirect_uri: REDIRECT_URI.to_string(),
            scope: SCOPES.to_string(),
        }
    }
}

impl IdpConfig {
    /// Hosted client settings against a different provider host.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Authorize endpoint (login page).
    pub fn authorize_url(&self) -> String {
        self.endpoint("oauth2/v2.0/authorize")
    }

    /// Form endpoint that accepts `signInName` + `password`.
    pub fn self_asserted_url(&self) -> String {
        self.endpoint("SelfAsserted")
    }

    /// Confirmation endpoint that answers with the redirect carrying the code.
    pub fn confirm_url(&self) -> String {
        self.endpoint("api/CombinedSigninAndSignup/confirmed")
    }

    /// Token endpoint for both code exchange and refresh.
    pub fn token_url(&self) -> String {
        self.endpoint("oauth2/v2.0/token")
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.tenant,
            self.policy,
            suffix
        )
    }
}
