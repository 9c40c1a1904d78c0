//! Token lifecycle for the Thermolink account
//!
//! Wraps `thermolink-auth` with the policy around it: when a token is too
//! close to expiry to hand out, how refresh-token rotation is applied, how
//! concurrent refresh/login attempts collapse into one provider call, and
//! when the durable record is written.
//!
//! Token lifecycle:
//! 1. Composition root builds a `TokenManager` from a `LoginFlow` and `TokenStore`
//! 2. First `get_valid_token()` loads the durable record
//! 3. No record → `NotAuthenticated`; caller runs `login()`
//! 4. Token within 300s of expiry → coalesced refresh, rotated pair persisted
//! 5. Refresh rejected → `Refresh` error; caller runs `login()` again
//! 6. Background task calls `refresh_if_expiring()` on an interval

pub mod manager;
pub mod refresh;

pub use manager::{REFRESH_BUFFER_SECS, TokenManager, needs_refresh};
pub use refresh::spawn_refresh_task;
