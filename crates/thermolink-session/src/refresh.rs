//! Proactive background token refresh
//!
//! Spawns a periodic task that renews the access token before it enters the
//! request path's refresh buffer, so most callers never wait on the provider.
//! It goes through the manager's coalesced refresh, so it never races a
//! request-time refresh.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::manager::TokenManager;

/// Spawn a background task that refreshes the token when it is expiring.
///
/// Runs every `interval`. A rejected refresh token is logged as needing a
/// full login; transient failures are retried on the next tick.
///
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_refresh_task(
    manager: Arc<TokenManager>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick, the caller has just loaded or logged in
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&manager).await;
        }
    })
}

/// One check: refresh if the current token is inside the buffer.
async fn refresh_cycle(manager: &TokenManager) {
    match manager.refresh_if_expiring().await {
        Ok(true) => info!("background token refresh succeeded"),
        Ok(false) => debug!("token not expiring, nothing to refresh"),
        Err(e) if e.requires_login() => {
            warn!(error = %e, "background refresh rejected, full login required");
        }
        Err(e) => {
            warn!(error = %e, "background refresh failed (transient), will retry next cycle");
        }
    }
}
