//! Shared types for the thermolink workspace
//!
//! Holds the redacting `Secret` wrapper used for account passwords and the
//! configuration-level error type used by the agent's config loader.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
