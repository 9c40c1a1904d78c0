//! Agent lifecycle
//!
//! Pure state machine: receives events, returns (new_state, action).
//! `Agent` performs the I/O implied by each action and main.rs drives the
//! loop.

use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use resource_api::{ClientError, DeviceClient, DeviceStatus};
use thermolink_auth::Error as AuthError;
use thermolink_session::TokenManager;
use tracing::{error, info, warn};

use crate::metrics;

/// Agent states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentState {
    /// Config loaded, session not yet checked
    Starting,
    /// Running the interactive login
    Authenticating { retries: u32 },
    /// Polling devices with a live session
    Running,
    /// Waiting out a transient login failure
    Error { error: String, retries: u32 },
    /// Terminal state
    Stopped { exit_code: i32 },
}

/// Events that drive state transitions.
#[derive(Debug)]
pub enum AgentEvent {
    /// Stored tokens are usable
    SessionRestored,
    /// No usable session; a full login is required
    LoginRequired,
    LoggedIn,
    /// Login failed. `fatal` means retrying cannot help (bad credentials,
    /// no password configured).
    LoginFailed { error: String, fatal: bool },
    /// Retry backoff expired
    RetryTimer,
    /// A poll found the session revoked or the refresh token expired
    SessionLost,
    /// SIGTERM/SIGINT received
    ShutdownSignal,
}

/// Actions the caller should execute after a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum AgentAction {
    Login,
    StartPolling,
    ScheduleRetry { delay: Duration },
    Shutdown { exit_code: i32 },
    None,
}

/// Maximum transient login failures before giving up
pub const MAX_LOGIN_RETRIES: u32 = 5;

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: AgentState, event: AgentEvent) -> (AgentState, AgentAction) {
    match (state, event) {
        (_, AgentEvent::ShutdownSignal) => (
            AgentState::Stopped { exit_code: 0 },
            AgentAction::Shutdown { exit_code: 0 },
        ),

        // --- Starting ---
        (AgentState::Starting, AgentEvent::SessionRestored) => {
            (AgentState::Running, AgentAction::StartPolling)
        }
        (AgentState::Starting, AgentEvent::LoginRequired) => (
            AgentState::Authenticating { retries: 0 },
            AgentAction::Login,
        ),

        // --- Authenticating ---
        (AgentState::Authenticating { .. }, AgentEvent::LoggedIn) => {
            (AgentState::Running, AgentAction::StartPolling)
        }
        (AgentState::Authenticating { .. }, AgentEvent::LoginFailed { fatal: true, .. }) => (
            AgentState::Stopped { exit_code: 1 },
            AgentAction::Shutdown { exit_code: 1 },
        ),
        (AgentState::Authenticating { retries }, AgentEvent::LoginFailed { error, .. })
            if retries < MAX_LOGIN_RETRIES =>
        {
            let delay = Duration::from_secs(2u64.pow(retries));
            (
                AgentState::Error { error, retries },
                AgentAction::ScheduleRetry { delay },
            )
        }
        (AgentState::Authenticating { .. }, AgentEvent::LoginFailed { .. }) => (
            AgentState::Stopped { exit_code: 1 },
            AgentAction::Shutdown { exit_code: 1 },
        ),

        // --- Error recovery ---
        (AgentState::Error { retries, .. }, AgentEvent::RetryTimer) => (
            AgentState::Authenticating {
                retries: retries + 1,
            },
            AgentAction::Login,
        ),

        // --- Running ---
        (AgentState::Running, AgentEvent::SessionLost) => (
            AgentState::Authenticating { retries: 0 },
            AgentAction::Login,
        ),

        // --- Invalid/unhandled transition: stay in current state ---
        (state, _event) => (state, AgentAction::None),
    }
}

/// Result of one polling round.
#[derive(Debug, Default)]
pub struct PollReport {
    pub statuses: Vec<DeviceStatus>,
    pub failures: usize,
    /// The session is gone; polling stopped early.
    pub session_lost: bool,
}

pub struct Agent {
    manager: Arc<TokenManager>,
    devices: DeviceClient,
    username: String,
    password: Option<Secret<String>>,
    /// Device ids to poll; empty means all devices on the account.
    device_ids: Vec<String>,
}

impl Agent {
    pub fn new(
        manager: Arc<TokenManager>,
        devices: DeviceClient,
        username: String,
        password: Option<Secret<String>>,
        device_ids: Vec<String>,
    ) -> Self {
        Self {
            manager,
            devices,
            username,
            password,
            device_ids,
        }
    }

    /// Check the stored session without contacting the identity provider
    /// unless the access token needs a refresh.
    pub async fn restore_session(&self) -> AgentEvent {
        match self.manager.get_valid_token().await {
            Ok(_) => {
                info!("stored session is valid");
                metrics::set_authenticated(true);
                AgentEvent::SessionRestored
            }
            Err(e) if e.requires_login() => {
                info!(reason = %e, "no usable session, login required");
                AgentEvent::LoginRequired
            }
            Err(e) => {
                // Refresh hit a transient error; a login attempt will retry the network
                warn!(error = %e, "could not restore session");
                AgentEvent::LoginRequired
            }
        }
    }

    /// Run the interactive login with the configured credentials.
    pub async fn login(&self) -> AgentEvent {
        let Some(ref password) = self.password else {
            error!("login required but no password is configured");
            return AgentEvent::LoginFailed {
                error: "no password configured (set THERMOLINK_PASSWORD or account.password_file)"
                    .into(),
                fatal: true,
            };
        };

        match self.manager.login(&self.username, password.expose()).await {
            Ok(_) => {
                metrics::set_authenticated(true);
                AgentEvent::LoggedIn
            }
            Err(e) => {
                warn!(username = %self.username, error = %e, "login failed");
                metrics::set_authenticated(false);
                AgentEvent::LoginFailed {
                    error: e.to_string(),
                    fatal: matches!(e, AuthError::InvalidCredentials(_)),
                }
            }
        }
    }

    /// Read the status of every configured device.
    ///
    /// A failing device does not stop the round; a lost session does.
    pub async fn poll_once(&self) -> PollReport {
        let mut report = PollReport::default();

        let ids = if self.device_ids.is_empty() {
            match self.devices.list_devices().await {
                Ok(devices) => devices.into_iter().map(|d| d.device_id).collect(),
                Err(e) => {
                    report.session_lost = e.requires_login();
                    report.failures += 1;
                    warn!(error = %e, "listing devices failed");
                    finish_poll(&report);
                    return report;
                }
            }
        } else {
            self.device_ids.clone()
        };

        for id in &ids {
            match self.devices.status(id).await {
                Ok(status) => {
                    metrics::record_device_read(true);
                    info!(
                        device_id = %status.device_id,
                        online = status.online,
                        mode = ?status.mode,
                        temperature = ?status.current_temperature,
                        "device status"
                    );
                    report.statuses.push(status);
                }
                Err(e) => {
                    metrics::record_device_read(false);
                    report.failures += 1;
                    if e.requires_login() {
                        report.session_lost = true;
                        warn!(device_id = %id, error = %e, "session lost while polling");
                        break;
                    }
                    log_device_error(id, &e);
                }
            }
        }

        finish_poll(&report);
        report
    }
}

fn log_device_error(id: &str, e: &ClientError) {
    match e {
        ClientError::Api { code, message } => {
            warn!(device_id = %id, code, message = %message, "device status rejected")
        }
        other => warn!(device_id = %id, error = %other, "device status failed"),
    }
}

fn finish_poll(report: &PollReport) {
    let result = if report.session_lost {
        metrics::set_authenticated(false);
        "session_lost"
    } else if report.failures > 0 {
        "partial"
    } else {
        "success"
    };
    metrics::record_poll(result);
}
