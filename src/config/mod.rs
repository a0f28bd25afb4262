mod prompt;

pub use prompt::Prompter;

use crate::{
    source,
    storage::{self, BackendKind},
    utils::TimeZonePolicy,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_ALBUM_ID: &str = "profile";
pub const DEFAULT_PHOTO_COUNT: u32 = 5;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// "text" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct VkConfig {
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    pub album_id: Option<String>,
    pub count: Option<u32>,
    pub api_version: String,
    pub api_url: String,
}

impl Default for VkConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            access_token: None,
            album_id: None,
            count: None,
            api_version: source::DEFAULT_API_VERSION.to_string(),
            api_url: source::DEFAULT_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct YandexConfig {
    pub token: Option<String>,
    pub folder: String,
    /// Re-check the destination folder before every upload instead of once per run
    pub ensure_folder_each_upload: bool,
    pub api_url: String,
}

impl Default for YandexConfig {
    fn default() -> Self {
        Self {
            token: None,
            folder: storage::yandex::DEFAULT_FOLDER.to_string(),
            ensure_folder_each_upload: false,
            api_url: storage::yandex::DEFAULT_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GoogleDriveConfig {
    pub client_secrets_path: PathBuf,
    pub token_cache_path: PathBuf,
    pub upload_url: String,
    pub auth_timeout_secs: u64,
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            client_secrets_path: PathBuf::from(storage::gdrive::DEFAULT_CLIENT_SECRETS_PATH),
            token_cache_path: PathBuf::from(storage::gdrive::DEFAULT_TOKEN_CACHE_PATH),
            upload_url: storage::gdrive::DEFAULT_UPLOAD_URL.to_string(),
            auth_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransferConfig {
    /// Upload destinations in order; the first one feeds the manifest
    pub backends: Vec<BackendKind>,
    pub temp_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub timezone: TimeZonePolicy,
    pub progress: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            backends: vec![BackendKind::YandexDisk],
            temp_dir: PathBuf::from("temp"),
            manifest_path: PathBuf::from(crate::manifest::DEFAULT_MANIFEST_PATH),
            timezone: TimeZonePolicy::default(),
            progress: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub vk: VkConfig,
    pub yandex: YandexConfig,
    pub google_drive: GoogleDriveConfig,
    pub transfer: TransferConfig,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path))
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging.format
    }

    pub fn uses_backend(&self, kind: BackendKind) -> bool {
        self.transfer.backends.contains(&kind)
    }

    /// Fills tokens that are still unset from the environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.vk.access_token.is_none() {
            self.vk.access_token = lookup("VK_TOKEN");
        }
        if self.yandex.token.is_none() {
            self.yandex.token = lookup("YANDEX_DISK_TOKEN");
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer.backends.is_empty() {
            anyhow::bail!("At least one storage backend must be configured");
        }
        if self.vk.user_id.as_deref().unwrap_or_default().is_empty() {
            anyhow::bail!("VK user id is required");
        }
        if self.vk.access_token.as_deref().unwrap_or_default().is_empty() {
            anyhow::bail!("VK access token is required");
        }
        if self.uses_backend(BackendKind::YandexDisk)
            && self.yandex.token.as_deref().unwrap_or_default().is_empty()
        {
            anyhow::bail!("Yandex Disk token is required");
        }
        if self.vk.count == Some(0) {
            anyhow::bail!("Photo count must be positive");
        }
        Ok(())
    }

    pub fn album_id(&self) -> &str {
        self.vk.album_id.as_deref().unwrap_or(DEFAULT_ALBUM_ID)
    }

    pub fn count(&self) -> u32 {
        self.vk.count.unwrap_or(DEFAULT_PHOTO_COUNT)
    }
}
