//! Thermolink identity provider authentication
//!
//! Headless OAuth2 PKCE login against the provider's web sign-in form, token
//! exchange and refresh, and durable storage of the resulting token pair.
//! The lifecycle (when to refresh, coalescing, persistence order) lives in
//! `thermolink-session`; this crate only performs the individual operations.
//!
//! Login flow:
//! 1. `LoginFlow::login()` creates a `LoginSession` (PKCE pair, `state`, cookie jar)
//! 2. The login page is fetched and `LoginPage::parse()` scrapes CSRF + transaction id
//! 3. Credentials are posted, the confirmation redirect is intercepted for the code
//! 4. `token::exchange_code()` trades the code for a `StoredTokens` record
//! 5. Later, `token::refresh_token()` renews it and `TokenResponse::rotate()` applies rotation

pub mod config;
pub mod constants;
pub mod cookies;
pub mod error;
pub mod login;
pub mod page;
pub mod pkce;
pub mod store;
pub mod token;

#[cfg(test)]
mod test_support;

pub use config::IdpConfig;
pub use constants::*;
pub use cookies::CookieJar;
pub use error::{Error, Result};
pub use login::{LoginFlow, LoginSession, LoginStage, LoginState};
pub use page::LoginPage;
pub use pkce::{PkcePair, compute_challenge, generate_verifier};
pub use store::{StoredTokens, TokenStore};
pub use token::{TokenResponse, exchange_code, now_secs, refresh_token};
