//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! Generates the code verifier and S256 challenge for one login attempt. The
//! verifier stays in memory for the duration of the attempt and is sent on
//! the token exchange; the challenge goes on the authorize request.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Random bytes behind each verifier. 32 bytes encode to 43 characters,
/// the RFC 7636 minimum length.
const VERIFIER_BYTES: usize = 32;

/// Verifier/challenge pair for a single login attempt. Never persisted.
#[derive(Debug, Clone)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    /// Generate a fresh pair from the thread-local CSPRNG.
    pub fn generate() -> Self {
        Self::from_verifier(generate_verifier())
    }

    /// Build a pair around an existing verifier.
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

/// Generate a cryptographically random PKCE code verifier.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Opaque anti-replay `state` value for the authorize request.
pub fn generate_state() -> String {
    uuid::Uuid::new_v4().as_simple().to_string()
}
