use crate::{
    config::Config,
    manifest::{self, ManifestEntry},
    source::{Photo, PhotoSource},
    storage::{BackendKind, GoogleDriveStorage, Storage, YandexDiskStorage},
    utils::{derive_file_name, TimeZonePolicy},
};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

/// Outcome of one run.
#[derive(Debug, Default)]
pub struct TransferReport {
    pub fetched: usize,
    pub transferred: usize,
    pub failed: usize,
    pub skipped: usize,
    pub entries: Vec<ManifestEntry>,
}

pub fn build_storages(config: &Config, http: &reqwest::Client) -> Vec<Box<dyn Storage>> {
    config
        .transfer
        .backends
        .iter()
        .map(|kind| -> Box<dyn Storage> {
            match kind {
                BackendKind::YandexDisk => Box::new(YandexDiskStorage::new(
                    http.clone(),
                    &config.yandex.api_url,
                    config.yandex.token.as_deref().unwrap_or_default(),
                    &config.yandex.folder,
                    config.yandex.ensure_folder_each_upload,
                )),
                BackendKind::GoogleDrive => Box::new(GoogleDriveStorage::new(
                    http.clone(),
                    &config.google_drive.upload_url,
                    config.google_drive.client_secrets_path.clone(),
                    config.google_drive.token_cache_path.clone(),
                    Duration::from_secs(config.google_drive.auth_timeout_secs),
                )),
            }
        })
        .collect()
}

/// Transfer loop: fetches photo descriptors, stages each original in a temp
/// file, pushes it to every configured backend, then writes the manifest.
pub struct BackupJob {
    http: reqwest::Client,
    source: PhotoSource,
    storages: Vec<Box<dyn Storage>>,
    owner_id: String,
    album_id: String,
    count: u32,
    access_token: String,
    temp_dir: PathBuf,
    manifest_path: PathBuf,
    timezone: TimeZonePolicy,
    progress: bool,
}

impl BackupJob {
    pub fn from_config(config: &Config, http: reqwest::Client) -> Result<Self> {
        let storages = build_storages(config, &http);
        Self::new(config, http, storages)
    }

    /// The first storage is the primary one: only its successes are recorded.
    pub fn new(
        config: &Config,
        http: reqwest::Client,
        storages: Vec<Box<dyn Storage>>,
    ) -> Result<Self> {
        if storages.is_empty() {
            anyhow::bail!("At least one storage backend must be configured");
        }

        Ok(Self {
            source: PhotoSource::new(http.clone(), &config.vk.api_url, &config.vk.api_version),
            http,
            storages,
            owner_id: config.vk.user_id.clone().context("VK user id is required")?,
            album_id: config.album_id().to_string(),
            count: config.count(),
            access_token: config
                .vk
                .access_token
                .clone()
                .context("VK access token is required")?,
            temp_dir: config.transfer.temp_dir.clone(),
            manifest_path: config.transfer.manifest_path.clone(),
            timezone: config.transfer.timezone,
            progress: config.transfer.progress,
        })
    }

    pub async fn run(&self) -> Result<TransferReport> {
        std::fs::create_dir_all(&self.temp_dir).with_context(|| {
            format!("Failed to create temp directory {}", self.temp_dir.display())
        })?;

        for storage in &self.storages {
            if let Err(e) = storage.prepare().await {
                warn!("Failed to prepare {}: {:#}", storage.name(), e);
            }
        }

        let photos = match self
            .source
            .fetch(&self.owner_id, &self.album_id, self.count, &self.access_token)
            .await
        {
            Ok(photos) => photos,
            Err(e) => {
                error!("Failed to fetch photos: {:#}", e);
                Vec::new()
            }
        };

        let mut report = TransferReport {
            fetched: photos.len(),
            ..Default::default()
        };

        let progress = self.progress_bar(photos.len() as u64)?;
        for photo in &photos {
            self.transfer_photo(photo, &progress, &mut report).await;
            progress.inc(1);
        }
        progress.finish_and_clear();

        if let Ok(previous) = std::fs::metadata(&self.manifest_path) {
            debug!("Replacing previous manifest of {} bytes", previous.len());
        }
        manifest::write(&report.entries, &self.manifest_path)?;
        info!(
            "Transferred {} of {} photos ({} failed, {} skipped), manifest saved to {}",
            report.transferred,
            report.fetched,
            report.failed,
            report.skipped,
            self.manifest_path.display()
        );

        Ok(report)
    }

    fn progress_bar(&self, len: u64) -> Result<ProgressBar> {
        if !self.progress {
            return Ok(ProgressBar::hidden());
        }
        let bar = ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")?
                .progress_chars("#>-"),
        );
        Ok(bar)
    }

    async fn transfer_photo(
        &self,
        photo: &Photo,
        progress: &ProgressBar,
        report: &mut TransferReport,
    ) {
        let Some(size) = photo.largest_size() else {
            warn!("Photo {:?} has no sizes, skipping", photo.id);
            report.skipped += 1;
            return;
        };

        let file_name = derive_file_name(photo, self.timezone);
        progress.set_message(file_name.clone());

        let staged = match self.download(&size.url).await {
            Ok(staged) => staged,
            Err(e) => {
                error!("Failed to download {}: {:#}", file_name, e);
                report.skipped += 1;
                return;
            }
        };

        for (index, storage) in self.storages.iter().enumerate() {
            let primary = index == 0;
            match storage.upload(staged.path(), &file_name).await {
                Ok(true) => {
                    info!("Uploaded to {}: {}", storage.name(), file_name);
                    if primary {
                        report.transferred += 1;
                        report.entries.push(ManifestEntry {
                            file_name: file_name.clone(),
                            size: size.kind.clone(),
                        });
                    }
                }
                Ok(false) => {
                    warn!("Failed to upload to {}: {}", storage.name(), file_name);
                    if primary {
                        report.failed += 1;
                    }
                }
                Err(e) => {
                    error!("Failed to upload to {}: {}: {:#}", storage.name(), file_name, e);
                    if primary {
                        report.failed += 1;
                    }
                }
            }
        }

        if let Err(e) = staged.close() {
            warn!("Failed to remove temp file for {}: {}", file_name, e);
        }
    }

    /// Downloads `url` into a new file inside the temp directory. The file is
    /// removed when the returned handle is dropped or closed.
    async fn download(&self, url: &str) -> Result<NamedTempFile> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("Failed to fetch photo")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to download photo: HTTP {}", response.status());
        }

        let data = response
            .bytes()
            .await
            .context("Failed to read photo data")?;

        let mut staged = tempfile::Builder::new()
            .prefix("photo-")
            .suffix(".jpg")
            .tempfile_in(&self.temp_dir)
            .context("Failed to create temp file")?;
        staged
            .write_all(&data)
            .context("Failed to write temp file")?;
        staged.flush()?;

        debug!("Staged {} bytes at {}", data.len(), staged.path().display());
        Ok(staged)
    }
}
