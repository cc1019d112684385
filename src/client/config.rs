//! Client configuration
//!
//! Wraps the shared [`AppConfig`] with the timing knobs of the sync core.
//! Values come from defaults, an optional TOML file named by
//! `KINSYNC_CONFIG`, and environment variables, in that order of precedence
//! (environment wins).

use crate::client::offline::retry::BackoffStrategy;
use crate::shared::config::{AppConfig, AppConfigBuilder, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default server URL
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

/// Key-value file name of the persisted offline queue
pub const QUEUE_STORAGE_KEY: &str = "kinsync.offline_queue";

/// Timing and bounds of the sync core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Delay policy between reconnect attempts
    pub backoff: BackoffStrategy,
    /// Consecutive failed connection attempts before a channel gives up
    /// (`None` retries forever)
    pub max_reconnect_attempts: Option<u32>,
    /// Consecutive failed polls tolerated while connected
    pub poll_failure_threshold: u32,
    /// Silence on an open event stream (keepalives included) after which
    /// the connection is treated as dropped; zero disables the check
    #[serde(rename = "stream_idle_timeout_ms", with = "duration_ms")]
    pub stream_idle_timeout: Duration,
    /// Upper bound for a single collection fetch
    #[serde(rename = "fetch_timeout_ms", with = "duration_ms")]
    pub fetch_timeout: Duration,
    /// Poll interval for primary data
    #[serde(rename = "primary_poll_interval_ms", with = "duration_ms")]
    pub primary_poll_interval: Duration,
    /// Poll interval for administrative listings
    #[serde(rename = "admin_poll_interval_ms", with = "duration_ms")]
    pub admin_poll_interval: Duration,
    /// Wait after connectivity returns before replaying the queue
    #[serde(rename = "replay_settle_delay_ms", with = "duration_ms")]
    pub replay_settle_delay: Duration,
    /// Wait after startup before replaying a non-empty queue
    #[serde(rename = "replay_startup_delay_ms", with = "duration_ms")]
    pub replay_startup_delay: Duration,
    /// Failed replays before a queued action is dropped
    pub max_replay_retries: u32,
    /// Capacity of the sync event bus
    pub event_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffStrategy::default(),
            max_reconnect_attempts: Some(10),
            poll_failure_threshold: 3,
            stream_idle_timeout: Duration::from_secs(90),
            fetch_timeout: Duration::from_secs(30),
            primary_poll_interval: Duration::from_secs(5),
            admin_poll_interval: Duration::from_secs(30),
            replay_settle_delay: Duration::from_secs(2),
            replay_startup_delay: Duration::from_secs(3),
            max_replay_retries: 3,
            event_capacity: 256,
        }
    }
}

/// Serde helper storing a `Duration` as integer milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    server_url: Option<String>,
    token: Option<String>,
    data_dir: Option<PathBuf>,
    start_online: Option<bool>,
    sync: SyncSettings,
}

/// Client configuration wrapper.
#[derive(Debug, Clone)]
pub struct Config {
    app: AppConfig,
    sync: SyncSettings,
    start_online: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig {
                server_url: Some(DEFAULT_SERVER_URL.to_string()),
                token: None,
                data_dir: None,
            },
            sync: SyncSettings::default(),
            start_online: true,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builder(builder: AppConfigBuilder) -> Result<Self, ConfigError> {
        let app = builder.build()?;
        Ok(Self {
            app,
            ..Self::default()
        })
    }

    /// Load from the environment, layering `KINSYNC_CONFIG` (TOML) underneath
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut file = match std::env::var("KINSYNC_CONFIG") {
            Ok(path) => FileConfig::load(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };

        if let Ok(url) = std::env::var("CLIENT_API_URL") {
            file.server_url = Some(url);
        }
        if let Ok(token) = std::env::var("KINSYNC_TOKEN") {
            file.token = Some(token);
        }
        if let Ok(dir) = std::env::var("KINSYNC_DATA_DIR") {
            file.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(flag) = std::env::var("KINSYNC_START_OFFLINE") {
            file.start_online = Some(flag != "1" && !flag.eq_ignore_ascii_case("true"));
        }

        Self::from_file_config(file)
    }

    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: FileConfig =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_file_config(file)
    }

    fn from_file_config(file: FileConfig) -> Result<Self, ConfigError> {
        let mut builder = AppConfig::builder()
            .server_url(file.server_url.unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()));
        if let Some(token) = file.token {
            builder = builder.token(token);
        }
        if let Some(dir) = file.data_dir {
            builder = builder.data_dir(dir);
        }

        Ok(Self {
            app: builder.build()?,
            sync: file.sync,
            start_online: file.start_online.unwrap_or(true),
        })
    }

    /// Replace the sync settings
    pub fn with_sync(mut self, sync: SyncSettings) -> Self {
        self.sync = sync;
        self
    }

    /// Set the bearer token
    pub fn set_token(&mut self, token: Option<String>) {
        self.app.token = token;
    }

    /// Get the bearer token
    pub fn get_token(&self) -> Option<&str> {
        self.app.token.as_deref()
    }

    /// Get the full URL for an API endpoint
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.server_url(), path)
    }

    pub fn server_url(&self) -> &str {
        self.app.server_url.as_deref().unwrap_or(DEFAULT_SERVER_URL)
    }

    /// Directory for persisted client state
    pub fn data_dir(&self) -> PathBuf {
        self.app
            .data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("kinsync")))
            .unwrap_or_else(|| PathBuf::from(".kinsync"))
    }

    pub fn sync(&self) -> &SyncSettings {
        &self.sync
    }

    /// Initial value of the connectivity signal
    pub fn start_online(&self) -> bool {
        self.start_online
    }
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&source).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
