mod auth;
pub mod gdrive;
pub mod yandex;

pub use gdrive::GoogleDriveStorage;
pub use yandex::YandexDiskStorage;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Backends a photo can be uploaded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    YandexDisk,
    GoogleDrive,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Human-readable name of the backend
    fn name(&self) -> &'static str;

    /// One-time setup before the first upload
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Upload a local file under `remote_name`.
    ///
    /// `Ok(false)` means the backend answered but did not accept the file.
    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<bool>;
}
