//! Client configuration.
//!
//! Loaded from `~/.lms-realtime/config.toml` when present, otherwise from
//! built-in defaults. A handful of environment variables override the file
//! so the binary can be pointed at another backend without editing it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SyncError;

/// Directory under the user's home that holds config and session files.
pub const CONFIG_DIR_NAME: &str = ".lms-realtime";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/lms";
const DEFAULT_BROKER_URL: &str = "ws://localhost:8080/ws-lms/websocket";

/// Reconnect backoff and polling cadence share the same 5 s figure.
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
const DEFAULT_HEARTBEAT_MS: u64 = 10_000;
/// Lower bound for `reconnect_delay_ms`.
const MIN_RECONNECT_DELAY_MS: u64 = 500;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

// ── Schema ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// REST base URL, e.g. `http://localhost:8080/lms`.
    pub api_base_url: String,
    /// Raw `Cookie` header value sent on REST and WebSocket requests.
    pub session_cookie: Option<String>,
    pub push: PushConfig,
    pub polling: PollingConfig,
    pub http: HttpConfig,
    /// Directory the config was loaded from (not serialized).
    #[serde(skip)]
    pub config_dir: PathBuf,
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub broker_url: String,
    pub reconnect_delay_ms: u64,
    /// Client heart-beat offer (`cx`), 0 disables.
    pub heartbeat_outgoing_ms: u64,
    /// Client heart-beat expectation (`cy`), 0 disables.
    pub heartbeat_incoming_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            session_cookie: None,
            push: PushConfig::default(),
            polling: PollingConfig::default(),
            http: HttpConfig::default(),
            config_dir: PathBuf::new(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.into(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            heartbeat_outgoing_ms: DEFAULT_HEARTBEAT_MS,
            heartbeat_incoming_ms: DEFAULT_HEARTBEAT_MS,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl PushConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.max(MIN_RECONNECT_DELAY_MS))
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl Config {
    /// Default config directory: `~/.lms-realtime`.
    pub fn default_dir() -> Result<PathBuf, SyncError> {
        let home = directories::UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .ok_or_else(|| SyncError::Config("could not find home directory".into()))?;
        Ok(home.join(CONFIG_DIR_NAME))
    }

    /// Load from an explicit file, or from the default location.
    ///
    /// A missing file yields defaults; a present but invalid file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_dir()?.join("config.toml"),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(|e| {
                SyncError::Config(format!("failed to read {}: {e}", config_path.display()))
            })?;
            Self::from_toml(&contents)?
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };

        config.config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, SyncError> {
        toml::from_str(contents)
            .map_err(|e| SyncError::Config(format!("failed to parse config: {e}")))
    }

    /// Apply `LMS_API_BASE_URL`, `LMS_BROKER_URL` and `LMS_SESSION_COOKIE`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("LMS_API_BASE_URL").filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(url) = lookup("LMS_BROKER_URL").filter(|v| !v.is_empty()) {
            self.push.broker_url = url;
        }
        if let Some(cookie) = lookup("LMS_SESSION_COOKIE").filter(|v| !v.is_empty()) {
            self.session_cookie = Some(cookie);
        }
    }
}
