//! Token lifecycle: expiry buffer, refresh with rotation, login, coalescing
//!
//! The manager is the only owner of the live `StoredTokens` and the only
//! writer of the durable record. Callers ask for a token; the manager hands
//! out the in-memory one while it is outside the refresh buffer, loads the
//! durable record on first use, and refreshes when the token is about to
//! expire.
//!
//! Refresh and login share one async mutex. A caller that had to wait for it
//! checks whether another attempt finished in the meantime and, if so, takes
//! that outcome instead of calling the provider again. Two concurrent callers
//! holding a stale token therefore cause exactly one refresh request.
//!
//! Each attempt runs in its own task that owns the mutex guard. A caller
//! that gives up (timeout, cancellation) stops waiting but the attempt still
//! runs to the end, so the provider call, the durable write and the
//! in-memory publish always happen together.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thermolink_auth::{Error, LoginFlow, Result, StoredTokens, TokenStore, now_secs};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Refresh when the access token expires within this many seconds.
pub const REFRESH_BUFFER_SECS: u64 = 300;

/// Whether a token expiring at `expires_at` must be refreshed at `now`.
///
/// True exactly when `now >= expires_at - 300`.
pub fn needs_refresh(expires_at: u64, now: u64) -> bool {
    now.saturating_add(REFRESH_BUFFER_SECS) >= expires_at
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptKind {
    Refresh,
    Login,
}

impl AttemptKind {
    fn label(&self) -> &'static str {
        match self {
            AttemptKind::Refresh => "refresh",
            AttemptKind::Login => "login",
        }
    }
}

/// Work handed to the attempt task.
enum Attempt {
    Refresh,
    Login { username: String, password: String },
}

impl Attempt {
    fn kind(&self) -> AttemptKind {
        match self {
            Attempt::Refresh => AttemptKind::Refresh,
            Attempt::Login { .. } => AttemptKind::Login,
        }
    }
}

/// Outcome of the most recent refresh/login.
type LastAttempt = Option<(AttemptKind, Result<StoredTokens>)>;

#[derive(Debug, Default)]
struct TokenState {
    tokens: Option<StoredTokens>,
    /// Durable record has been read (or superseded by a login).
    loaded: bool,
}

/// State the attempt task needs after the caller has gone.
struct Shared {
    flow: LoginFlow,
    store: TokenStore,
    state: RwLock<TokenState>,
    /// Bumped every time an attempt completes.
    completed: AtomicU64,
}

pub struct TokenManager {
    shared: Arc<Shared>,
    /// The lock itself serialises attempts; the value is the last outcome.
    attempt: Arc<Mutex<LastAttempt>>,
}

impl TokenManager {
    pub fn new(flow: LoginFlow, store: TokenStore) -> Self {
        info!(path = %store.path().display(), "token manager initialized");
        Self {
            shared: Arc::new(Shared {
                flow,
                store,
                state: RwLock::new(TokenState::default()),
                completed: AtomicU64::new(0),
            }),
            attempt: Arc::new(Mutex::new(None)),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.shared.store
    }

    /// Return an access token that is valid for at least the refresh buffer.
    ///
    /// `NotAuthenticated` when there is no usable record; `Refresh` when the
    /// provider rejected the refresh token. Both mean a full login is
    /// required. `Network` means the provider could not be reached and the
    /// call can be repeated.
    pub async fn get_valid_token(&self) -> Result<String> {
        let seen = self.shared.completed.load(Ordering::SeqCst);
        let tokens = self.tokens().await?.ok_or(Error::NotAuthenticated)?;

        if !needs_refresh(tokens.expires_at, now_secs()) {
            return Ok(tokens.access_token);
        }

        debug!(expires_at = tokens.expires_at, "access token inside refresh buffer");
        let refreshed = self.run(seen, Attempt::Refresh).await?;
        Ok(refreshed.access_token)
    }

    /// Refresh the current token pair, joining an attempt already in flight.
    pub async fn refresh(&self) -> Result<StoredTokens> {
        let seen = self.shared.completed.load(Ordering::SeqCst);
        self.run(seen, Attempt::Refresh).await
    }

    /// Refresh only if the current token is inside the refresh buffer.
    ///
    /// Returns `Ok(false)` when nothing was needed (including no record at all).
    pub async fn refresh_if_expiring(&self) -> Result<bool> {
        let seen = self.shared.completed.load(Ordering::SeqCst);
        let Some(tokens) = self.tokens().await? else {
            return Ok(false);
        };
        if !needs_refresh(tokens.expires_at, now_secs()) {
            return Ok(false);
        }
        self.run(seen, Attempt::Refresh).await?;
        Ok(true)
    }

    /// Run a full interactive login and persist the result.
    pub async fn login(&self, username: &str, password: &str) -> Result<StoredTokens> {
        let seen = self.shared.completed.load(Ordering::SeqCst);
        let attempt = Attempt::Login {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.run(seen, attempt).await
    }

    /// Forget the current tokens and delete the durable record.
    pub async fn logout(&self) -> Result<()> {
        let mut last = self.attempt.lock().await;
        // Waiters queued behind us must not be handed pre-logout credentials
        *last = None;
        {
            let mut state = self.shared.state.write().await;
            state.tokens = None;
            state.loaded = true;
        }
        self.shared.store.clear().await?;
        info!("logged out");
        Ok(())
    }

    /// Snapshot of the current pair, loading the durable record on first use.
    pub async fn tokens(&self) -> Result<Option<StoredTokens>> {
        self.shared.tokens().await
    }

    /// Take the attempt lock, reuse a result that landed while waiting, or
    /// start the attempt in its own task and wait for it.
    async fn run(&self, seen: u64, attempt: Attempt) -> Result<StoredTokens> {
        let kind = attempt.kind();
        let last = self.attempt.clone().lock_owned().await;
        if let Some(reused) = reusable(&last, seen, self.shared.completed.load(Ordering::SeqCst), kind) {
            return reused;
        }

        let shared = self.shared.clone();
        let task = tokio::spawn(async move { shared.execute(last, attempt).await });
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::Network(format!("{} attempt did not complete: {e}", kind.label()))),
        }
    }
}

impl Shared {
    async fn tokens(&self) -> Result<Option<StoredTokens>> {
        {
            let state = self.state.read().await;
            if state.loaded {
                return Ok(state.tokens.clone());
            }
        }

        let mut state = self.state.write().await;
        if !state.loaded {
            state.tokens = match self.store.load().await {
                Ok(tokens) => tokens,
                Err(e) => {
                    // An unreadable record holds no usable credential; the next login replaces it
                    warn!(error = %e, "ignoring unreadable token record, login required");
                    None
                }
            };
            state.loaded = true;
        }
        Ok(state.tokens.clone())
    }

    /// Body of the attempt task. Holds the attempt lock until the outcome is
    /// recorded.
    async fn execute(
        &self,
        mut last: OwnedMutexGuard<LastAttempt>,
        attempt: Attempt,
    ) -> Result<StoredTokens> {
        let kind = attempt.kind();
        let outcome = match attempt {
            Attempt::Refresh => self.refresh_locked().await,
            Attempt::Login { username, password } => match self.flow.login(&username, &password).await {
                Ok(tokens) => {
                    self.publish(&tokens).await;
                    Ok(tokens)
                }
                Err(e) => Err(e),
            },
        };
        record(kind, &outcome);
        *last = Some((kind, outcome.clone()));
        self.completed.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    /// Refresh grant against the provider. Caller holds the attempt lock.
    async fn refresh_locked(&self) -> Result<StoredTokens> {
        let previous = self.tokens().await?.ok_or(Error::NotAuthenticated)?;
        let now = now_secs();

        if previous.refresh_token_expires_at > 0 && previous.refresh_token_expires_at <= now {
            warn!(
                refresh_token_expires_at = previous.refresh_token_expires_at,
                "refresh token expired, full login required"
            );
            return Err(Error::Refresh("refresh token has expired".into()));
        }

        let response =
            thermolink_auth::refresh_token(self.flow.client(), self.flow.config(), &previous.refresh_token)
                .await?;
        let rotated = response.refresh_token.is_some();
        let updated = response.rotate(&previous, now);
        self.publish(&updated).await;
        info!(rotated, expires_at = updated.expires_at, "token refresh succeeded");
        Ok(updated)
    }

    /// Persist, then replace the in-memory pair.
    async fn publish(&self, tokens: &StoredTokens) {
        if let Err(e) = self.store.save(tokens).await {
            warn!(error = %e, "failed to persist tokens, keeping them in memory only");
        }
        let mut state = self.state.write().await;
        state.tokens = Some(tokens.clone());
        state.loaded = true;
    }
}

/// Outcome of an attempt that completed while this caller waited for the lock.
///
/// A success of either kind is fresh credentials for everyone. A failure is
/// only shared with callers asking for the same kind of attempt.
fn reusable(
    last: &LastAttempt,
    seen: u64,
    completed: u64,
    kind: AttemptKind,
) -> Option<Result<StoredTokens>> {
    if completed == seen {
        return None;
    }
    let (last_kind, outcome) = last.as_ref()?;
    if outcome.is_ok() || *last_kind == kind {
        debug!(attempt = kind.label(), joined = last_kind.label(), "joining concurrent attempt");
        return Some(outcome.clone());
    }
    None
}

fn record(kind: AttemptKind, outcome: &Result<StoredTokens>) {
    let result = match outcome {
        Ok(_) => "success",
        Err(e) if e.requires_login() => "rejected",
        Err(_) => "error",
    };
    match kind {
        AttemptKind::Refresh => metrics::counter!("auth_refresh_total", "result" => result).increment(1),
        AttemptKind::Login => metrics::counter!("auth_login_total", "result" => result).increment(1),
    }
}
