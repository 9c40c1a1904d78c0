//! Headless login against the provider's web sign-in form
//!
//! The provider has no password grant, so the login replays what the mobile
//! app's embedded browser does:
//!
//! 1. `FetchLoginPage`: GET the authorize endpoint, scrape CSRF + transaction id
//! 2. `SubmitCredentials`: POST the form to the self-asserted endpoint
//! 3. `FollowRedirect`: GET the confirmation endpoint, intercept the redirect
//!    to the app's custom scheme and pull out the authorization code
//! 4. `ExchangeCode`: trade the code + PKCE verifier for tokens
//!
//! Each state carries the typed output of the stage before it, so stages can
//! only run in order. Any failure ends the attempt; a new attempt starts over
//! with a fresh PKCE pair, `state` value and cookie jar.

use std::time::Duration;

use reqwest::header::{COOKIE, LOCATION};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::config::IdpConfig;
use crate::cookies::CookieJar;
use crate::error::{Error, Result};
use crate::page::LoginPage;
use crate::pkce::{PkcePair, generate_state};
use crate::store::StoredTokens;
use crate::token::{exchange_code, now_secs};

/// Stage that was running when an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    FetchLoginPage,
    SubmitCredentials,
    FollowRedirect,
    ExchangeCode,
}

impl LoginStage {
    pub fn label(&self) -> &'static str {
        match self {
            LoginStage::FetchLoginPage => "fetch_login_page",
            LoginStage::SubmitCredentials => "submit_credentials",
            LoginStage::FollowRedirect => "follow_redirect",
            LoginStage::ExchangeCode => "exchange_code",
        }
    }
}

/// Login state machine.
///
/// Transitions:
/// - Start → PageLoaded (login page fetched and parsed)
/// - PageLoaded → CredentialsAccepted (provider answered status "200")
/// - CredentialsAccepted → CodeReceived (redirect intercepted)
/// - CodeReceived → Done (code exchanged)
/// - any → Failed
#[derive(Debug)]
pub enum LoginState {
    Start,
    PageLoaded(LoginPage),
    CredentialsAccepted(LoginPage),
    CodeReceived(String),
    Done(StoredTokens),
    Failed { stage: LoginStage, error: Error },
}

impl LoginState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoginState::Done(_) | LoginState::Failed { .. })
    }
}

/// Per-attempt material. Dropped when the attempt ends, whatever the outcome.
#[derive(Debug)]
pub struct LoginSession {
    pub cookies: CookieJar,
    pub pkce: PkcePair,
    pub state: String,
}

impl LoginSession {
    pub fn new() -> Self {
        Self {
            cookies: CookieJar::new(),
            pkce: PkcePair::generate(),
            state: generate_state(),
        }
    }
}

impl Default for LoginSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Body returned by the self-asserted endpoint. `status` is a string on
/// success (`"200"`) and on rejection (`"400"`).
#[derive(Debug, Deserialize)]
struct SelfAssertedResponse {
    status: Option<serde_json::Value>,
    message: Option<String>,
}

impl SelfAssertedResponse {
    fn accepted(&self) -> bool {
        matches!(&self.status, Some(serde_json::Value::String(s)) if s == "200")
    }
}

/// Drives the login stages over one HTTP client.
#[derive(Debug, Clone)]
pub struct LoginFlow {
    client: reqwest::Client,
    config: IdpConfig,
}

impl LoginFlow {
    /// Build a flow with its own client. Redirects are never followed: the
    /// confirmation redirect targets the app's custom scheme and is read,
    /// not fetched.
    pub fn new(config: IdpConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Use a caller-built client. It must not follow redirects.
    pub fn with_client(client: reqwest::Client, config: IdpConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn config(&self) -> &IdpConfig {
        &self.config
    }

    /// Run a complete login attempt.
    pub async fn login(&self, username: &str, password: &str) -> Result<StoredTokens> {
        let mut session = LoginSession::new();
        let mut state = LoginState::Start;
        while !state.is_terminal() {
            state = self.advance(&mut session, state, username, password).await;
        }
        match state {
            LoginState::Done(tokens) => {
                info!(expires_at = tokens.expires_at, "login succeeded");
                Ok(tokens)
            }
            LoginState::Failed { stage, error } => {
                warn!(stage = stage.label(), error = %error, "login failed");
                Err(error)
            }
            _ => Err(Error::Config("login ended in a non-terminal state".into())),
        }
    }

    /// Run the stage for `state` and return the next state.
    /// Terminal states are returned unchanged.
    pub async fn advance(
        &self,
        session: &mut LoginSession,
        state: LoginState,
        username: &str,
        password: &str,
    ) -> LoginState {
        match state {
            LoginState::Start => match self.fetch_login_page(session).await {
                Ok(page) => LoginState::PageLoaded(page),
                Err(error) => failed(LoginStage::FetchLoginPage, error),
            },
            LoginState::PageLoaded(page) => {
                match self
                    .submit_credentials(session, &page, username, password)
                    .await
                {
                    Ok(()) => LoginState::CredentialsAccepted(page),
                    Err(error) => failed(LoginStage::SubmitCredentials, error),
                }
            }
            LoginState::CredentialsAccepted(page) => {
                match self.follow_redirect(session, &page).await {
                    Ok(code) => LoginState::CodeReceived(code),
                    Err(error) => failed(LoginStage::FollowRedirect, error),
                }
            }
            LoginState::CodeReceived(code) => match self.exchange(session, &code).await {
                Ok(tokens) => LoginState::Done(tokens),
                Err(error) => failed(LoginStage::ExchangeCode, error),
            },
            terminal => terminal,
        }
    }

    #[instrument(skip_all)]
    async fn fetch_login_page(&self, session: &mut LoginSession) -> Result<LoginPage> {
        let url = Url::parse_with_params(
            &self.config.authorize_url(),
            &[
                ("scope", self.config.scope.as_str()),
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("code_challenge", session.pkce.challenge()),
                ("code_challenge_method", "S256"),
                ("prompt", "login"),
                ("state", session.state.as_str()),
            ],
        )
        .map_err(|e| Error::Config(format!("authorize URL: {e}")))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("login page request failed: {e}")))?;
        session.cookies.merge_from(response.headers());

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::PageParse(format!("login page returned {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("reading login page: {e}")))?;

        let page = LoginPage::parse(&body)?;
        debug!(cookies = session.cookies.len(), "login page loaded");
        Ok(page)
    }

    #[instrument(skip_all)]
    async fn submit_credentials(
        &self,
        session: &mut LoginSession,
        page: &LoginPage,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let url = Url::parse_with_params(
            &self.config.self_asserted_url(),
            &[
                ("tx", page.transaction_id.as_str()),
                ("p", self.config.policy.as_str()),
            ],
        )
        .map_err(|e| Error::Config(format!("self-asserted URL: {e}")))?;

        let mut request = self
            .client
            .post(url)
            .header("x-csrf-token", page.csrf_token.as_str())
            .form(&[
                ("request_type", "RESPONSE"),
                ("signInName", username),
                ("password", password),
            ]);
        if let Some(cookie) = session.cookies.header_value() {
            request = request.header(COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("credential submission failed: {e}")))?;
        session.cookies.merge_from(response.headers());

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("reading sign-in response: {e}")))?;

        match serde_json::from_str::<SelfAssertedResponse>(&body) {
            Ok(parsed) if parsed.accepted() => {
                debug!(cookies = session.cookies.len(), "credentials accepted");
                Ok(())
            }
            Ok(parsed) => Err(Error::InvalidCredentials(parsed.message.unwrap_or_else(
                || match parsed.status {
                    Some(code) => format!("sign-in rejected with status {code}"),
                    None => format!("sign-in rejected ({status})"),
                },
            ))),
            Err(_) => Err(Error::InvalidCredentials(format!(
                "unrecognised sign-in response ({status})"
            ))),
        }
    }

    #[instrument(skip_all)]
    async fn follow_redirect(&self, session: &mut LoginSession, page: &LoginPage) -> Result<String> {
        let confirm = Url::parse_with_params(
            &self.config.confirm_url(),
            &[
                ("rememberMe", "false"),
                ("csrf_token", page.csrf_token.as_str()),
                ("tx", page.transaction_id.as_str()),
                ("p", self.config.policy.as_str()),
            ],
        )
        .map_err(|e| Error::Config(format!("confirmation URL: {e}")))?;

        let mut request = self.client.get(confirm.clone());
        if let Some(cookie) = session.cookies.header_value() {
            request = request.header(COOKIE, cookie);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("confirmation request failed: {e}")))?;
        session.cookies.merge_from(response.headers());

        let status = response.status();
        if !status.is_redirection() {
            return Err(Error::Redirect(format!(
                "expected a redirect from the confirmation endpoint, got {status}"
            )));
        }
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::Redirect("redirect has no Location header".into()))?;

        let target = confirm
            .join(location)
            .map_err(|e| Error::Redirect(format!("unparsable redirect location: {e}")))?;
        extract_code(&target, &session.state)
    }

    #[instrument(skip_all)]
    async fn exchange(&self, session: &LoginSession, code: &str) -> Result<StoredTokens> {
        let response = exchange_code(&self.client, &self.config, code, session.pkce.verifier()).await?;
        response.into_stored(now_secs())
    }
}

fn failed(stage: LoginStage, error: Error) -> LoginState {
    LoginState::Failed { stage, error }
}

/// Pull the authorization code out of the redirect target.
///
/// The provider reports failures on the redirect itself (`error`,
/// `error_description`); `state` must echo the value sent on authorize.
pub fn extract_code(target: &Url, expected_state: &str) -> Result<String> {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in target.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(Error::Redirect(error_description.unwrap_or(error)));
    }
    if state.as_deref() != Some(expected_state) {
        return Err(Error::Redirect(
            "state on redirect does not match this login attempt".into(),
        ));
    }
    code.filter(|c| !c.is_empty())
        .ok_or_else(|| Error::Redirect("redirect location carries no authorization code".into()))
}
