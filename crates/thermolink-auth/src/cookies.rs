//! Session cookie jar for the multi-step login flow
//!
//! The provider ties the CSRF token and transaction to cookies it sets on
//! the login page and updates on every later step, so each response's
//! `Set-Cookie` headers are merged into the jar and the whole jar is replayed
//! as one `Cookie` header on the next request. Attributes (path, expiry,
//! flags) are ignored: the jar lives only as long as one login attempt.

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, SET_COOKIE};

#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge every `Set-Cookie` header from a response.
    ///
    /// Existing cookies with the same name are overwritten, others are kept.
    /// An empty value is the provider clearing a cookie and removes it.
    /// Returns the number of headers applied.
    pub fn merge_from(&mut self, headers: &HeaderMap) -> usize {
        let mut applied = 0;
        for value in headers.get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            if let Some((name, value)) = parse_set_cookie(raw) {
                self.set(name, value);
                applied += 1;
            }
        }
        applied
    }

    pub fn set(&mut self, name: &str, value: &str) {
        if value.is_empty() {
            self.cookies.remove(name);
        } else {
            self.cookies.insert(name.to_string(), value.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Render as a `Cookie` request header value, or `None` when empty.
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        Some(pairs.join("; "))
    }
}

/// Extract `name=value` from a raw `Set-Cookie` value.
fn parse_set_cookie(raw: &str) -> Option<(&str, &str)> {
    let pair = raw.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim().trim_matches('"')))
}
