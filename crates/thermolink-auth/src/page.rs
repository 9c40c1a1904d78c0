//! Login page scraping
//!
//! The provider renders the sign-in form with a `var SETTINGS = {...}` blob
//! that embeds the CSRF token and the transaction id the later form posts
//! must echo back. Everything that depends on that markup lives here so a
//! provider-side template change surfaces as `Error::PageParse`.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Matches `"csrf":"..."` and `"transId":"..."` inside the settings blob.
static FIELD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(csrf|transId)"\s*:\s*"([^"]+)""#).expect("field pattern is a valid regex")
});

/// Fields scraped from the rendered login page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPage {
    pub csrf_token: String,
    pub transaction_id: String,
}

impl LoginPage {
    /// Extract the CSRF token and transaction id from the page body.
    ///
    /// The first occurrence of each key wins.
    pub fn parse(body: &str) -> Result<Self> {
        let mut csrf_token = None;
        let mut transaction_id = None;
        for captures in FIELD_PATTERN.captures_iter(body) {
            let value = captures[2].to_string();
            match &captures[1] {
                "csrf" => {
                    csrf_token.get_or_insert(value);
                }
                _ => {
                    transaction_id.get_or_insert(value);
                }
            }
        }

        match (csrf_token, transaction_id) {
            (Some(csrf_token), Some(transaction_id)) => Ok(Self {
                csrf_token,
                transaction_id,
            }),
            (None, None) => Err(Error::PageParse(
                "login page has neither csrf token nor transaction id".into(),
            )),
            (None, _) => Err(Error::PageParse("login page has no csrf token".into())),
            (_, None) => Err(Error::PageParse(
                "login page has no transaction id".into(),
            )),
        }
    }
}
