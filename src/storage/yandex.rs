use super::Storage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, StatusCode};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_API_URL: &str = "https://cloud-api.yandex.net/v1/disk/resources";
pub const DEFAULT_FOLDER: &str = "backup_photos";

#[derive(Debug, Deserialize)]
struct UploadLink {
    href: Option<String>,
}

pub struct YandexDiskStorage {
    http: reqwest::Client,
    api_url: String,
    token: String,
    folder: String,
    ensure_folder_each_upload: bool,
}

impl YandexDiskStorage {
    pub fn new(
        http: reqwest::Client,
        api_url: &str,
        token: &str,
        folder: &str,
        ensure_folder_each_upload: bool,
    ) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            folder: folder.trim_matches('/').to_string(),
            ensure_folder_each_upload,
        }
    }

    fn auth_header(&self) -> String {
        format!("OAuth {}", self.token)
    }

    fn resource_url(&self, path: &str) -> Result<Url> {
        Url::parse_with_params(&self.api_url, &[("path", path)])
            .context("Invalid Yandex Disk API URL")
    }

    /// Creates the destination folder when it does not exist yet.
    ///
    /// Unexpected statuses are logged and otherwise ignored, uploads are
    /// attempted regardless.
    pub async fn ensure_folder(&self) -> Result<()> {
        let url = self.resource_url(&self.folder)?;

        let response = self
            .http
            .get(url.clone())
            .header(AUTHORIZATION, self.auth_header())
            .send()
            .await
            .context("Failed to check Yandex Disk folder")?;

        match response.status() {
            StatusCode::OK => {
                debug!("Folder {} already exists", self.folder);
            }
            StatusCode::NOT_FOUND => {
                let created = self
                    .http
                    .put(url)
                    .header(AUTHORIZATION, self.auth_header())
                    .send()
                    .await
                    .context("Failed to create Yandex Disk folder")?;

                let status = created.status();
                if status == StatusCode::CREATED {
                    info!("Created folder {} on Yandex Disk", self.folder);
                } else {
                    let body = created.text().await.unwrap_or_default();
                    warn!("Failed to create folder: {} - {}", status, body);
                }
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!("Failed to check folder existence: {} - {}", status, body);
            }
        }

        Ok(())
    }

    async fn upload_link(&self, remote_path: &str) -> Result<Option<String>> {
        let url = Url::parse_with_params(
            &format!("{}/upload", self.api_url),
            &[("path", remote_path), ("overwrite", "true")],
        )
        .context("Invalid Yandex Disk upload URL")?;

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header())
            .send()
            .await
            .context("Failed to request upload link")?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!("Failed to get upload link: {} - {}", status, body);
            return Ok(None);
        }

        let link: UploadLink = response
            .json()
            .await
            .context("Failed to parse upload link")?;

        Ok(link.href)
    }
}

#[async_trait]
impl Storage for YandexDiskStorage {
    fn name(&self) -> &'static str {
        "Yandex Disk"
    }

    async fn prepare(&self) -> Result<()> {
        if self.ensure_folder_each_upload {
            return Ok(());
        }
        self.ensure_folder().await
    }

    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<bool> {
        if self.ensure_folder_each_upload {
            self.ensure_folder().await?;
        }

        let remote_path = format!("{}/{}", self.folder, remote_name);
        let Some(href) = self.upload_link(&remote_path).await? else {
            return Ok(false);
        };

        let data = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("Failed to read {}", local_path.display()))?;

        debug!("Uploading {} bytes to {}", data.len(), remote_path);

        let response = self
            .http
            .put(&href)
            .body(data)
            .send()
            .await
            .context("Failed to upload file to Yandex Disk")?;

        let status = response.status();
        if status != StatusCode::CREATED {
            debug!("Upload of {} answered {}", remote_path, status);
        }

        Ok(status == StatusCode::CREATED)
    }
}
