mod types;

pub use types::Photo;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use types::ApiResponse;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.vk.com/method";
pub const DEFAULT_API_VERSION: &str = "5.131";

/// Client for the VK `photos.get` method.
pub struct PhotoSource {
    http: reqwest::Client,
    api_url: String,
    api_version: String,
}

impl PhotoSource {
    pub fn new(http: reqwest::Client, api_url: &str, api_version: &str) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
        }
    }

    /// Fetches one page of photos.
    ///
    /// Upstream failures (non-success status or a VK error object) are logged
    /// and produce an empty list. Transport and decoding faults are returned
    /// as errors.
    pub async fn fetch(
        &self,
        owner_id: &str,
        album_id: &str,
        count: u32,
        access_token: &str,
    ) -> Result<Vec<Photo>> {
        let count = count.to_string();
        let url = Url::parse_with_params(
            &format!("{}/photos.get", self.api_url),
            &[
                ("owner_id", owner_id),
                ("album_id", album_id),
                ("count", count.as_str()),
                ("extended", "1"),
                ("photo_sizes", "1"),
                ("access_token", access_token),
                ("v", self.api_version.as_str()),
            ],
        )
        .context("Invalid photo API URL")?;

        debug!("Fetching photos for owner {} from album {}", owner_id, album_id);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("Failed to request photos")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read photo list response")?;

        if !status.is_success() {
            warn!("Failed to fetch photos: {} - {}", status, body);
            return Ok(Vec::new());
        }

        let parsed: ApiResponse =
            serde_json::from_str(&body).context("Failed to parse photo list")?;

        match parsed {
            ApiResponse::Ok { response } => {
                info!("Fetched {} photos", response.items.len());
                Ok(response.items)
            }
            ApiResponse::Err { error } => {
                warn!(
                    "Failed to fetch photos: API error {} - {}",
                    error.error_code, error.error_msg
                );
                Ok(Vec::new())
            }
        }
    }
}
