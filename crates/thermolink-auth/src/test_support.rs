//! Local stand-in for the identity provider's sign-in endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{AppendHeaders, Html, IntoResponse, Response};
use axum::routing::{get, post};
use tokio::net::TcpListener;

use crate::config::IdpConfig;
use crate::pkce::compute_challenge;
use crate::token::now_secs;

pub const USERNAME: &str = "user@example.com";
pub const PASSWORD: &str = "correct-horse";

const TENANT: &str = "test-tenant";
const POLICY: &str = "B2C_1A_test";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Happy,
    /// Login page renders without the CSRF token
    BrokenPage,
    /// Confirmation redirect echoes a different `state`
    TamperedState,
    /// Confirmation redirect carries `error` instead of a code
    ErrorRedirect,
    /// Token endpoint rejects the authorization code
    RejectCode,
}

#[derive(Default)]
struct Recorded {
    challenge: Option<String>,
    state: Option<String>,
}

struct MockState {
    scenario: Scenario,
    redirect_uri: String,
    recorded: Mutex<Recorded>,
    token_hits: AtomicU64,
}

pub struct MockIdp {
    pub config: IdpConfig,
    state: Arc<MockState>,
}

impl MockIdp {
    pub async fn start(scenario: Scenario) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = IdpConfig {
            base_url: format!("http://{addr}"),
            tenant: TENANT.into(),
            policy: POLICY.into(),
            ..IdpConfig::default()
        };

        let state = Arc::new(MockState {
            scenario,
            redirect_uri: config.redirect_uri.clone(),
            recorded: Mutex::new(Recorded::default()),
            token_hits: AtomicU64::new(0),
        });

        let prefix = format!("/{TENANT}/{POLICY}");
        let app = Router::new()
            .route(&format!("{prefix}/oauth2/v2.0/authorize"), get(authorize))
            .route(&format!("{prefix}/SelfAsserted"), post(self_asserted))
            .route(
                &format!("{prefix}/api/CombinedSigninAndSignup/confirmed"),
                get(confirmed),
            )
            .route(&format!("{prefix}/oauth2/v2.0/token"), post(token))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { config, state }
    }

    pub fn token_hits(&self) -> u64 {
        self.state.token_hits.load(Ordering::SeqCst)
    }
}

fn cookie_header(headers: &HeaderMap) -> String {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn authorize(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    assert_eq!(params.get("code_challenge_method").map(String::as_str), Some("S256"));
    assert_eq!(params.get("response_type").map(String::as_str), Some("code"));
    assert_eq!(params.get("prompt").map(String::as_str), Some("login"));
    {
        let mut recorded = state.recorded.lock().unwrap();
        recorded.challenge = params.get("code_challenge").cloned();
        recorded.state = params.get("state").cloned();
    }

    let body = if state.scenario == Scenario::BrokenPage {
        r#"<html><script>var SETTINGS = {"transId":"t1"};</script></html>"#
    } else {
        r#"<html><script>var SETTINGS = {"api":"CombinedSigninAndSignup","csrf":"abc","transId":"t1"};</script></html>"#
    };

    (
        AppendHeaders([
            (header::SET_COOKIE, "x-ms-cpim-csrf=abc-cookie; path=/; HttpOnly"),
            (header::SET_COOKIE, "x-ms-cpim-trans=t1-cookie; path=/"),
        ]),
        Html(body),
    )
        .into_response()
}

async fn self_asserted(
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let cookies = cookie_header(&headers);
    let csrf_ok = headers.get("x-csrf-token").and_then(|v| v.to_str().ok()) == Some("abc");
    let session_ok = cookies.contains("x-ms-cpim-csrf=abc-cookie")
        && cookies.contains("x-ms-cpim-trans=t1-cookie")
        && params.get("tx").map(String::as_str) == Some("t1")
        && params.get("p").map(String::as_str) == Some(POLICY)
        && form.get("request_type").map(String::as_str) == Some("RESPONSE");
    if !csrf_ok || !session_ok {
        return (StatusCode::BAD_REQUEST, r#"{"status":"400","message":"session lost"}"#)
            .into_response();
    }

    let credentials_ok = form.get("signInName").map(String::as_str) == Some(USERNAME)
        && form.get("password").map(String::as_str) == Some(PASSWORD);
    let body = if credentials_ok {
        r#"{"status":"200"}"#
    } else {
        r#"{"status":"400","errorCode":"AADB2C90225","message":"The username or password provided in the request are invalid."}"#
    };

    (
        AppendHeaders([(header::SET_COOKIE, "x-ms-cpim-cache=c1; path=/")]),
        body,
    )
        .into_response()
}

async fn confirmed(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let cookies = cookie_header(&headers);
    if !cookies.contains("x-ms-cpim-cache=c1")
        || params.get("csrf_token").map(String::as_str) != Some("abc")
        || params.get("tx").map(String::as_str) != Some("t1")
        || params.get("rememberMe").map(String::as_str) != Some("false")
    {
        return (StatusCode::BAD_REQUEST, "confirmation without session").into_response();
    }

    let sent_state = state.recorded.lock().unwrap().state.clone().unwrap_or_default();
    let location = match state.scenario {
        Scenario::TamperedState => format!("{}?code=XYZ&state=forged", state.redirect_uri),
        Scenario::ErrorRedirect => format!(
            "{}?error=server_error&error_description=AADB2C90273%3A+An+invalid+response+was+received&state={sent_state}",
            state.redirect_uri
        ),
        _ => format!("{}?code=XYZ&state={sent_state}", state.redirect_uri),
    };

    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

async fn token(
    State(state): State<Arc<MockState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.token_hits.fetch_add(1, Ordering::SeqCst);

    let challenge = state.recorded.lock().unwrap().challenge.clone();
    let verifier = form.get("code_verifier").cloned().unwrap_or_default();
    let pkce_ok = challenge.as_deref() == Some(compute_challenge(&verifier).as_str());
    let code_ok = form.get("code").map(String::as_str) == Some("XYZ")
        && form.get("grant_type").map(String::as_str) == Some("authorization_code")
        && form.get("client_info").map(String::as_str) == Some("1");

    if state.scenario == Scenario::RejectCode || !pkce_ok || !code_ok {
        return (
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"AADB2C90090: The provided JWE is not valid."}"#,
        )
            .into_response();
    }

    // expires_on as a string, like the provider sends it
    let body = serde_json::json!({
        "access_token": "A",
        "refresh_token": "R",
        "token_type": "Bearer",
        "expires_on": (now_secs() + 900).to_string(),
        "refresh_token_expires_in": 7_776_000,
    });
    (StatusCode::OK, axum::Json(body)).into_response()
}
