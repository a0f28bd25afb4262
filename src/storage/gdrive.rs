use super::{
    auth::{Credential, OAuthClient},
    Storage,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
pub const DEFAULT_CLIENT_SECRETS_PATH: &str = "credentials.json";
pub const DEFAULT_TOKEN_CACHE_PATH: &str = "token.json";

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

/// Authorization outcome, kept for the rest of the run.
enum AuthState {
    Pending,
    Ready(Credential),
    Failed,
}

pub struct GoogleDriveStorage {
    http: reqwest::Client,
    upload_url: String,
    oauth: OAuthClient,
    auth: Mutex<AuthState>,
}

impl GoogleDriveStorage {
    pub fn new(
        http: reqwest::Client,
        upload_url: &str,
        client_secrets_path: impl Into<PathBuf>,
        token_cache_path: impl Into<PathBuf>,
        auth_timeout: Duration,
    ) -> Self {
        let oauth = OAuthClient::new(
            http.clone(),
            client_secrets_path,
            token_cache_path,
            auth_timeout,
        );
        Self::with_oauth(http, upload_url, oauth)
    }

    pub fn with_oauth(http: reqwest::Client, upload_url: &str, oauth: OAuthClient) -> Self {
        Self {
            http,
            upload_url: upload_url.to_string(),
            oauth,
            auth: Mutex::new(AuthState::Pending),
        }
    }

    /// Authorizes on first use and reuses the outcome for the rest of the run.
    /// A failed authorization is not retried.
    async fn access_token(&self) -> Result<String> {
        let mut state = self.auth.lock().await;
        match &*state {
            AuthState::Ready(credential) if credential.is_valid() => {
                return Ok(credential.access_token.clone());
            }
            AuthState::Failed => {
                anyhow::bail!("Google Drive authorization failed earlier in this run");
            }
            _ => {}
        }

        match self.oauth.credential().await {
            Ok(credential) => {
                let token = credential.access_token.clone();
                *state = AuthState::Ready(credential);
                Ok(token)
            }
            Err(e) => {
                *state = AuthState::Failed;
                Err(e.context("Failed to authorize Google Drive access"))
            }
        }
    }
}

/// Builds a `multipart/related` body holding the JSON metadata followed by
/// the media bytes.
fn related_body(boundary: &str, file_name: &str, media: &[u8]) -> Result<Vec<u8>> {
    let metadata = serde_json::to_string(&serde_json::json!({ "name": file_name }))
        .context("Failed to serialize file metadata")?;

    let mut body = Vec::with_capacity(media.len() + metadata.len() + 256);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: image/jpeg\r\n\r\n").as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    Ok(body)
}

#[async_trait]
impl Storage for GoogleDriveStorage {
    fn name(&self) -> &'static str {
        "Google Drive"
    }

    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<bool> {
        let token = self.access_token().await?;

        let media = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("Failed to read {}", local_path.display()))?;
        let boundary = format!("photo-backup-{:016x}", rand::random::<u64>());
        let body = related_body(&boundary, remote_name, &media)?;

        debug!("Uploading {} bytes to Google Drive as {}", media.len(), remote_name);

        let url = Url::parse_with_params(
            &self.upload_url,
            &[("uploadType", "multipart"), ("fields", "id")],
        )
        .context("Invalid Google Drive upload URL")?;

        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .body(body)
            .send()
            .await
            .context("Failed to upload file to Google Drive")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Google Drive rejected {}: {} - {}", remote_name, status, body);
            return Ok(false);
        }

        let created: CreatedFile = response
            .json()
            .await
            .context("Failed to parse Google Drive response")?;
        info!("Uploaded {} to Google Drive with ID: {}", remote_name, created.id);

        Ok(true)
    }
}
