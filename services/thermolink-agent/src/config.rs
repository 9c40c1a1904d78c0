//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The account password is loaded from THERMOLINK_PASSWORD or password_file,
//! never stored in the TOML directly.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thermolink_auth::{IdpConfig, TokenStore};

/// Env var holding the account password.
pub const PASSWORD_ENV: &str = "THERMOLINK_PASSWORD";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    pub client: ClientConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Account credentials
#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    /// Path to a file containing the password (alternative to THERMOLINK_PASSWORD)
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

/// Token record location
#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub token_path: Option<PathBuf>,
}

/// Resource API settings
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_ms: u64,
}

/// Overrides for the identity provider endpoints. Unset fields keep the
/// hosted defaults.
#[derive(Debug, Default, Deserialize)]
pub struct IdentityConfig {
    pub base_url: Option<String>,
    pub tenant: Option<String>,
    pub policy: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Device ids to poll. Empty means every device on the account.
    #[serde(default)]
    pub devices: Vec<String>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            devices: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus scrape address. No exporter when unset.
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
}

fn default_timeout() -> u64 {
    15
}

fn default_cache_ttl() -> u64 {
    5_000
}

fn default_poll_interval() -> u64 {
    60
}

fn require_http(field: &str, url: &str) -> common::Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )));
    }
    Ok(())
}

fn require_nonzero(field: &str, value: u64) -> common::Result<()> {
    if value == 0 {
        return Err(common::Error::Config(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Password resolution order:
    /// 1. THERMOLINK_PASSWORD env var
    /// 2. password_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.account.username.trim().is_empty() {
            return Err(common::Error::Config(
                "account.username must not be empty".into(),
            ));
        }
        require_http("client.base_url", &config.client.base_url)?;
        if let Some(ref base_url) = config.identity.base_url {
            require_http("identity.base_url", base_url)?;
        }
        require_nonzero("client.timeout_secs", config.client.timeout_secs)?;
        require_nonzero("client.cache_ttl_ms", config.client.cache_ttl_ms)?;
        require_nonzero("poll.interval_secs", config.poll.interval_secs)?;

        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.account.password = Some(Secret::new(password));
        } else if let Some(ref password_file) = config.account.password_file {
            let password = std::fs::read_to_string(password_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    password_file.display()
                ))
            })?;
            // Only the trailing newline an editor adds is stripped
            let password = password.trim_end_matches(['\r', '\n']).to_owned();
            if !password.is_empty() {
                config.account.password = Some(Secret::new(password));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("thermolink-agent.toml")
    }

    /// Identity provider endpoints with the configured overrides applied.
    pub fn idp(&self) -> IdpConfig {
        let mut idp = IdpConfig::default();
        let id = &self.identity;
        if let Some(ref v) = id.base_url {
            idp.base_url = v.clone();
        }
        if let Some(ref v) = id.tenant {
            idp.tenant = v.clone();
        }
        if let Some(ref v) = id.policy {
            idp.policy = v.clone();
        }
        if let Some(ref v) = id.client_id {
            idp.client_id = v.clone();
        }
        if let Some(ref v) = id.redirect_uri {
            idp.redirect_uri = v.clone();
        }
        idp
    }

    /// Configured token path, else the per-user data directory.
    pub fn token_path(&self) -> common::Result<PathBuf> {
        self.storage
            .token_path
            .clone()
            .or_else(TokenStore::default_path)
            .ok_or_else(|| {
                common::Error::Config(
                    "no home directory found, set storage.token_path".into(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
[account]
username = "user@example.com"

[client]
base_url = "https://api.thermolink.example/v1/"

[poll]
devices = ["d1", "d2"]
"#
    }

    fn write_config(name: &str, contents: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (dir, path) = write_config("thermolink-agent-test-valid", valid_toml());
        unsafe { remove_env(PASSWORD_ENV) };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.account.username, "user@example.com");
        assert_eq!(config.client.base_url, "https://api.thermolink.example/v1/");
        assert_eq!(config.client.timeout_secs, 15);
        assert_eq!(config.client.cache_ttl_ms, 5_000);
        assert_eq!(config.poll.interval_secs, 60);
        assert_eq!(config.poll.devices, vec!["d1", "d2"]);
        assert!(config.metrics.listen_addr.is_none());
        assert!(config.storage.token_path.is_none());
        assert!(config.account.password.is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let (dir, path) = write_config("thermolink-agent-test-invalid", "not valid {{{{ toml");
        let result = Config::load(&path);
        assert!(matches!(result, Err(common::Error::Toml(_))));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_password_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (dir, path) = write_config("thermolink-agent-test-env", valid_toml());

        unsafe { set_env(PASSWORD_ENV, "correct-horse") };
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.account.password.as_ref().unwrap().expose(),
            "correct-horse"
        );
        unsafe { remove_env(PASSWORD_ENV) };

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_password_from_file_keeps_inner_whitespace() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = std::env::temp_dir().join("thermolink-agent-test-pwfile");
        std::fs::create_dir_all(&dir).unwrap();
        let pw_path = dir.join("password");
        std::fs::write(&pw_path, " battery staple\n").unwrap();

        let toml_content = format!(
            r#"
[account]
username = "user@example.com"
password_file = "{}"

[client]
base_url = "https://api.thermolink.example/v1/"
"#,
            pw_path.display()
        );
        let config_path = dir.join("config.toml");
        std::fs::write(&config_path, &toml_content).unwrap();

        unsafe { remove_env(PASSWORD_ENV) };
        let config = Config::load(&config_path).unwrap();
        assert_eq!(
            config.account.password.as_ref().unwrap().expose(),
            " battery staple"
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_password_env_overrides_missing_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (dir, path) = write_config(
            "thermolink-agent-test-env-over-missing",
            r#"
[account]
username = "user@example.com"
password_file = "/nonexistent/path/password"

[client]
base_url = "https://api.thermolink.example/v1/"
"#,
        );

        unsafe { set_env(PASSWORD_ENV, "from-env") };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.account.password.as_ref().unwrap().expose(), "from-env");
        unsafe { remove_env(PASSWORD_ENV) };

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_password_file_is_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (dir, path) = write_config(
            "thermolink-agent-test-missing-pwfile",
            r#"
[account]
username = "user@example.com"
password_file = "/nonexistent/path/password"

[client]
base_url = "https://api.thermolink.example/v1/"
"#,
        );

        unsafe { remove_env(PASSWORD_ENV) };
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("password_file"), "got: {err}");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (dir, path) = write_config(
            "thermolink-agent-test-bad-url",
            r#"
[account]
username = "user@example.com"

[client]
base_url = "api.thermolink.example"
"#,
        );
        unsafe { remove_env(PASSWORD_ENV) };

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(
            err.contains("client.base_url must start with http"),
            "error message should explain the issue, got: {err}"
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_zero_durations_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(PASSWORD_ENV) };

        for (name, extra) in [
            ("thermolink-agent-test-zero-timeout", "timeout_secs = 0"),
            ("thermolink-agent-test-zero-ttl", "cache_ttl_ms = 0"),
        ] {
            let (dir, path) = write_config(
                name,
                &format!(
                    "[account]\nusername = \"u\"\n\n[client]\nbase_url = \"https://h/\"\n{extra}\n"
                ),
            );
            assert!(Config::load(&path).is_err(), "{extra} must be rejected");
            std::fs::remove_dir_all(&dir).unwrap();
        }

        let (dir, path) = write_config(
            "thermolink-agent-test-zero-poll",
            "[account]\nusername = \"u\"\n\n[client]\nbase_url = \"https://h/\"\n\n[poll]\ninterval_secs = 0\n",
        );
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("poll.interval_secs"), "got: {err}");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_identity_overrides_apply() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (dir, path) = write_config(
            "thermolink-agent-test-identity",
            r#"
[account]
username = "user@example.com"

[client]
base_url = "https://api.thermolink.example/v1/"

[identity]
base_url = "https://login.eu.thermolink.example"
policy = "B2C_1A_eu_signin"

[storage]
token_path = "/var/lib/thermolink/tokens.json"

[metrics]
listen_addr = "127.0.0.1:9464"
"#,
        );
        unsafe { remove_env(PASSWORD_ENV) };

        let config = Config::load(&path).unwrap();
        let idp = config.idp();
        let defaults = IdpConfig::default();
        assert_eq!(idp.base_url, "https://login.eu.thermolink.example");
        assert_eq!(idp.policy, "B2C_1A_eu_signin");
        assert_eq!(idp.tenant, defaults.tenant);
        assert_eq!(idp.client_id, defaults.client_id);
        assert_eq!(
            config.token_path().unwrap(),
            PathBuf::from("/var/lib/thermolink/tokens.json")
        );
        assert_eq!(
            config.metrics.listen_addr,
            Some("127.0.0.1:9464".parse().unwrap())
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_invalid_identity_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (dir, path) = write_config(
            "thermolink-agent-test-bad-idp",
            "[account]\nusername = \"u\"\n\n[client]\nbase_url = \"https://h/\"\n\n[identity]\nbase_url = \"ftp://login\"\n",
        );
        unsafe { remove_env(PASSWORD_ENV) };
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("identity.base_url"), "got: {err}");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_username_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (dir, path) = write_config(
            "thermolink-agent-test-empty-user",
            "[account]\nusername = \"  \"\n\n[client]\nbase_url = \"https://h/\"\n",
        );
        unsafe { remove_env(PASSWORD_ENV) };
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("thermolink-agent.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }
}
