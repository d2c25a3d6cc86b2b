//! Configuration loading and management

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use edit_core::{
    DigestScanIndex, DuplicateIndex, EngineHandle, NoDuplicates, StaticRegistry, WorkerConfig,
};

use crate::nuxeo::{Credentials, NuxeoClient};

/// Name of the application directory under the platform config/data dirs.
pub const APP_DIR: &str = "nuxeo-edit";

/// Main configuration for the edit daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the staging tree (wiped at every start)
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Sidecar index holding the tags of staged files
    #[serde(default = "default_tags_file")]
    pub tags_file: PathBuf,

    /// Delay between two upload queue drains
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Timeout of a single HTTP request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Identifies this installation to the server
    #[serde(default = "new_device_id")]
    pub device_id: String,

    /// Bound server accounts
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
}

/// One server account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub server_url: String,
    pub user: String,
    /// Basic authentication password
    pub password: Option<String>,
    /// Device token (preferred over the password)
    pub token: Option<String>,
    /// Local synchronized tree searched for duplicates before downloading
    pub local_folder: Option<PathBuf>,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_staging_dir() -> PathBuf {
    data_dir().join("edit")
}

fn default_tags_file() -> PathBuf {
    data_dir().join("tags.json")
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn new_device_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Default location of `config.json`.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            tags_file: default_tags_file(),
            tick_interval_ms: default_tick_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            device_id: new_device_id(),
            engines: Vec::new(),
        }
    }
}

impl EngineConfig {
    fn credentials(&self) -> Result<Credentials> {
        match (&self.token, &self.password) {
            (Some(token), _) => Ok(Credentials::Token(token.clone())),
            (None, Some(password)) => Ok(Credentials::Password(password.clone())),
            (None, None) => bail!(
                "No token or password for {} on {}",
                self.user,
                self.server_url
            ),
        }
    }
}

impl Config {
    /// Load configuration from the config directory
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_file = config_dir.join("config.json");

        if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {:?}", config_file))?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            Ok(config)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_file);
            let config = Config::default();

            std::fs::create_dir_all(config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;

            // Written so the device id stays stable and engines can be added
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            Ok(config)
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::new(&self.staging_dir)
            .with_tick_interval(Duration::from_millis(self.tick_interval_ms))
    }

    /// Bind every configured account to a Nuxeo client.
    pub fn build_registry(&self) -> Result<StaticRegistry> {
        let timeout = Duration::from_secs(self.request_timeout_secs);
        let mut registry = StaticRegistry::default();

        for engine in &self.engines {
            let client = NuxeoClient::new(
                &engine.server_url,
                &engine.user,
                engine.credentials()?,
                &self.device_id,
                timeout,
            )
            .with_context(|| format!("Failed to set up client for {}", engine.server_url))?;

            let duplicates: Arc<dyn DuplicateIndex> = match &engine.local_folder {
                Some(folder) => {
                    Arc::new(DigestScanIndex::new(folder).excluding(&self.staging_dir))
                }
                None => Arc::new(NoDuplicates),
            };

            registry.push(EngineHandle {
                server_url: engine.server_url.clone(),
                user: engine.user.clone(),
                remote: Arc::new(client),
                duplicates,
            });
        }
        Ok(registry)
    }
}
