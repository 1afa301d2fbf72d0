use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "concierge.toml",
    "config/concierge.toml",
    "crates/config/concierge.toml",
    "../concierge.toml",
    "../config/concierge.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub call: CallConfig,
}

impl AppConfig {
    /// Reject combinations the hub cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.hub.validate()?;
        if self.call.token_attempts == 0 {
            bail!("call.token_attempts must be at least 1");
        }
        if self.call.token_length < 8 {
            bail!("call.token_length must be at least 8");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://concierge.db".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "AuthConfig::default_session_ttl")]
    pub session_ttl_seconds: u64,
    /// Shared secret for server-to-server notification pushes. Pushes are
    /// refused while unset.
    #[serde(default)]
    pub system_token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: 86_400,
            system_token: None,
        }
    }
}

impl AuthConfig {
    fn default_session_ttl() -> u64 {
        86_400
    }
}

/// Tuning for the in-memory message hub and its socket sessions.
///
/// ```
/// use concierge_config::HubConfig;
///
/// let hub = HubConfig::default();
/// assert_eq!(hub.outbound_capacity, 256);
/// assert!(hub.heartbeat_interval() < hub.idle_timeout());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "HubConfig::default_outbound_capacity")]
    pub outbound_capacity: usize,
    #[serde(default = "HubConfig::default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "HubConfig::default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "HubConfig::default_write_timeout")]
    pub write_timeout_seconds: u64,
    #[serde(default = "HubConfig::default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl HubConfig {
    const fn default_outbound_capacity() -> usize {
        256
    }

    const fn default_heartbeat_interval() -> u64 {
        54
    }

    const fn default_idle_timeout() -> u64 {
        60
    }

    const fn default_write_timeout() -> u64 {
        10
    }

    const fn default_sweep_interval() -> u64 {
        60
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.outbound_capacity == 0 {
            bail!("hub.outbound_capacity must be greater than zero");
        }
        if self.heartbeat_interval_seconds == 0 || self.sweep_interval_seconds == 0 {
            bail!("hub intervals must be greater than zero");
        }
        if self.heartbeat_interval_seconds >= self.idle_timeout_seconds {
            bail!(
                "hub.heartbeat_interval_seconds ({}) must be shorter than hub.idle_timeout_seconds ({})",
                self.heartbeat_interval_seconds,
                self.idle_timeout_seconds
            );
        }
        Ok(())
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: Self::default_outbound_capacity(),
            heartbeat_interval_seconds: Self::default_heartbeat_interval(),
            idle_timeout_seconds: Self::default_idle_timeout(),
            write_timeout_seconds: Self::default_write_timeout(),
            sweep_interval_seconds: Self::default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    #[serde(default = "CallConfig::default_token_attempts")]
    pub token_attempts: u32,
    #[serde(default = "CallConfig::default_token_length")]
    pub token_length: usize,
}

impl CallConfig {
    const fn default_token_attempts() -> u32 {
        5
    }

    const fn default_token_length() -> usize {
        16
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            token_attempts: Self::default_token_attempts(),
            token_length: Self::default_token_length(),
        }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use concierge_config::load;
///
/// std::env::remove_var("CONCIERGE_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder()
        .set_default("http.address", defaults.http.address.clone())?
        .set_default("http.port", i64::from(defaults.http.port))?
        .set_default("database.url", defaults.database.url.clone())?
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )?
        .set_default(
            "auth.session_ttl_seconds",
            to_i64(defaults.auth.session_ttl_seconds),
        )?;

    let environment_overrides = config::Environment::with_prefix("CONCIERGE").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("CONCIERGE_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via CONCIERGE_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    if config.auth.session_ttl_seconds > i64::MAX as u64 {
        config.auth.session_ttl_seconds = i64::MAX as u64;
    }

    config.validate().context("invalid configuration")?;

    debug!(?config, "loaded backend configuration");
    Ok(config)
}
