//! Thermolink Agent
//!
//! Headless service that:
//! 1. Restores or establishes a session with the identity provider
//! 2. Keeps the access token fresh in the background
//! 3. Polls thermostat status through the resilient executor and cache
//! 4. Logs in again when the refresh token is rejected

mod agent;
mod config;
mod metrics;
mod token_source;

use anyhow::{Context, Result};
use reqwest::Url;
use resource_api::{DeviceClient, RequestExecutor};
use std::sync::Arc;
use std::time::Duration;
use thermolink_auth::{LoginFlow, TokenStore};
use thermolink_session::{TokenManager, spawn_refresh_task};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::agent::{Agent, AgentAction, AgentEvent, AgentState, handle_event};
use crate::config::Config;
use crate::token_source::ManagedTokenSource;

/// How often the background task checks the access token expiry
const REFRESH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting thermolink-agent");

    // CLI: --config <path>, --logout
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());
    let logout = args.iter().any(|a| a == "--logout");

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let token_path = config.token_path()?;

    info!(
        base_url = %config.client.base_url,
        username = %config.account.username,
        token_path = %token_path.display(),
        devices = config.poll.devices.len(),
        poll_interval_secs = config.poll.interval_secs,
        "configuration loaded"
    );

    if let Some(addr) = config.metrics.listen_addr {
        metrics::install_recorder(addr)
            .with_context(|| format!("failed to start metrics exporter on {addr}"))?;
        info!(%addr, "metrics exporter listening");
    }

    let timeout = Duration::from_secs(config.client.timeout_secs);
    let flow = LoginFlow::new(config.idp(), timeout).context("failed to build login client")?;
    let manager = Arc::new(TokenManager::new(flow, TokenStore::new(token_path)));

    if logout {
        manager.logout().await.context("failed to clear stored tokens")?;
        return Ok(());
    }

    let base_url = Url::parse(&config.client.base_url)
        .with_context(|| format!("invalid client.base_url {}", config.client.base_url))?;
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build resource API client")?;
    let executor = RequestExecutor::new(
        http,
        base_url,
        Arc::new(ManagedTokenSource::new(manager.clone())),
    )
    .with_context(|| format!("unusable client.base_url {}", config.client.base_url))?
    .with_timeout(timeout);
    let devices = DeviceClient::new(
        executor,
        Duration::from_millis(config.client.cache_ttl_ms),
    );

    let agent = Agent::new(
        manager.clone(),
        devices,
        config.account.username.clone(),
        config.account.password.take(),
        config.poll.devices.clone(),
    );
    let poll_interval = Duration::from_secs(config.poll.interval_secs);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut refresh_task = None;
    let mut state = AgentState::Starting;
    let mut event = agent.restore_session().await;

    loop {
        let (new_state, action) = handle_event(state, event);
        state = new_state;

        event = match action {
            AgentAction::Login => {
                info!(?state, "logging in");
                tokio::select! {
                    event = agent.login() => event,
                    _ = &mut shutdown => AgentEvent::ShutdownSignal,
                }
            }
            AgentAction::ScheduleRetry { delay } => {
                if let AgentState::Error { ref error, retries } = state {
                    warn!(
                        error = %error,
                        retries,
                        retry_in_secs = delay.as_secs(),
                        "login failed, retrying"
                    );
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => AgentEvent::RetryTimer,
                    _ = &mut shutdown => AgentEvent::ShutdownSignal,
                }
            }
            AgentAction::StartPolling => {
                if refresh_task.is_none() {
                    refresh_task = Some(spawn_refresh_task(manager.clone(), REFRESH_CHECK_INTERVAL));
                }
                info!("state: Running, polling devices");

                let mut ticker = tokio::time::interval(poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let report = agent.poll_once().await;
                            info!(
                                devices = report.statuses.len(),
                                failures = report.failures,
                                "poll complete"
                            );
                            if report.session_lost {
                                break AgentEvent::SessionLost;
                            }
                        }
                        _ = &mut shutdown => break AgentEvent::ShutdownSignal,
                    }
                }
            }
            AgentAction::Shutdown { exit_code } => {
                if let Some(task) = refresh_task.take() {
                    task.abort();
                }
                if exit_code != 0 {
                    error!(exit_code, "agent stopped after unrecoverable login failure");
                    std::process::exit(exit_code);
                }
                break;
            }
            AgentAction::None => {
                anyhow::bail!("unexpected transition in state {state:?}");
            }
        };
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
///
/// A handler that cannot be installed never fires; the other one still does.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
