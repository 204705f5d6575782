use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::ConfigError;

/// Settings written on first run when no local config file exists.
pub const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub green_api: GreenApiConfig,
    #[serde(default = "default_vault_config")]
    pub vault: VaultConfig,
    #[serde(default = "default_web_config")]
    pub web: WebConfig,
    /// Keyed by recipient; BTreeMap keeps lookups in a stable order.
    #[serde(default, alias = "kids", alias = "chats")]
    pub recipients: BTreeMap<String, RecipientConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GreenApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_receive_timeout_secs")]
    pub receive_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for GreenApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            instance_id: String::new(),
            api_token: String::new(),
            receive_timeout_secs: default_receive_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl GreenApiConfig {
    /// Both credentials are required to talk to the chat API.
    pub fn is_configured(&self) -> bool {
        !self.instance_id.is_empty() && !self.api_token.is_empty()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    #[serde(default = "default_vault_root")]
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_contacts_cache_secs")]
    pub contacts_cache_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecipientConfig {
    #[serde(default)]
    pub chat_ids: Vec<String>,
    pub media_path: PathBuf,
}

fn default_base_url() -> String {
    "https://api.greenapi.com".to_string()
}

fn default_receive_timeout_secs() -> u64 {
    5
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_vault_root() -> PathBuf {
    PathBuf::from("vault")
}

fn default_bind() -> String {
    "0.0.0.0:7021".to_string()
}

fn default_contacts_cache_secs() -> u64 {
    60
}

fn default_vault_config() -> VaultConfig {
    VaultConfig {
        root: default_vault_root(),
    }
}

fn default_web_config() -> WebConfig {
    WebConfig {
        bind: default_bind(),
        contacts_cache_secs: default_contacts_cache_secs(),
    }
}

/// Write `default` to `path` unless a file is already there.
///
/// Returns `true` when the file was created. An existing file, including one
/// that appears between the check and the write, is left untouched.
pub fn bootstrap(path: &Path, default: &str) -> std::io::Result<bool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };
    file.write_all(default.as_bytes())?;

    info!("Wrote default config to {}", path.display());
    Ok(true)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configs where one chat id belongs to more than one recipient.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
        for (key, recipient) in &self.recipients {
            for chat_id in &recipient.chat_ids {
                if let Some(first) = owners.insert(chat_id.as_str(), key.as_str()) {
                    if first != key.as_str() {
                        return Err(ConfigError::DuplicateChatId {
                            chat_id: chat_id.clone(),
                            first: first.to_string(),
                            second: key.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Override chat API credentials from GREEN_API_INSTANCE / GREEN_API_TOKEN.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(instance) = std::env::var("GREEN_API_INSTANCE") {
            if !instance.is_empty() {
                self.green_api.instance_id = instance;
            }
        }
        if let Ok(token) = std::env::var("GREEN_API_TOKEN") {
            if !token.is_empty() {
                self.green_api.api_token = token;
            }
        }
    }

    /// Destination folder of the first recipient (in key order) owning `chat_id`.
    pub fn resolve_destination(&self, chat_id: &str) -> Option<&Path> {
        self.recipients
            .values()
            .find(|r| r.chat_ids.iter().any(|id| id == chat_id))
            .map(|r| r.media_path.as_path())
    }
}
