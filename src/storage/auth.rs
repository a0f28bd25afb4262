use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot::{self, Sender};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Seconds before the recorded expiry at which a token is treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct InstalledApp {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

/// Client secret file as downloaded from the Google Cloud console.
#[derive(Debug, Deserialize)]
struct ClientSecrets {
    installed: Option<InstalledApp>,
    web: Option<InstalledApp>,
}

impl InstalledApp {
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read client secrets from {}", path.display()))?;
        let secrets: ClientSecrets =
            serde_json::from_str(&data).context("Failed to parse client secrets")?;
        secrets
            .installed
            .or(secrets.web)
            .ok_or_else(|| anyhow::anyhow!("Client secrets contain no application entry"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
    /// Unix timestamp after which the access token is no longer accepted
    #[serde(default)]
    pub expires_at: Option<i64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credential cache {}", path.display()))?;
        match serde_json::from_str(&data) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!("Ignoring unreadable credential cache {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("Failed to serialize credential")?;
        std::fs::write(path, data)
            .with_context(|| format!("Failed to write credential cache {}", path.display()))
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at - EXPIRY_MARGIN_SECS > now,
            None => true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now().timestamp())
    }

    fn from_token_response(token: TokenResponse, previous_refresh: Option<String>) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token.or(previous_refresh),
            token_type: token.token_type.unwrap_or_else(default_token_type),
            scope: token.scope,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now().timestamp() + secs),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Called with the consent page URL when the user has to authorize access.
pub type AuthUrlHandler = Box<dyn Fn(&Url) + Send + Sync>;

fn print_auth_url(url: &Url) {
    println!("Please visit this URL to authorize Google Drive access:");
    println!("{url}");
}

/// OAuth2 installed-application flow for Google APIs.
///
/// The credential is cached as JSON on disk. A cached credential that expired
/// is refreshed with its refresh token; without one the user is sent through
/// the browser consent page and the authorization code is caught by a
/// short-lived local HTTP listener.
pub struct OAuthClient {
    http: reqwest::Client,
    client_secrets_path: PathBuf,
    token_cache_path: PathBuf,
    auth_timeout: Duration,
    on_auth_url: AuthUrlHandler,
}

impl OAuthClient {
    pub fn new(
        http: reqwest::Client,
        client_secrets_path: impl Into<PathBuf>,
        token_cache_path: impl Into<PathBuf>,
        auth_timeout: Duration,
    ) -> Self {
        Self {
            http,
            client_secrets_path: client_secrets_path.into(),
            token_cache_path: token_cache_path.into(),
            auth_timeout,
            on_auth_url: Box::new(print_auth_url),
        }
    }

    /// Replaces the default handler, which prints the consent URL.
    pub fn with_auth_url_handler(mut self, handler: AuthUrlHandler) -> Self {
        self.on_auth_url = handler;
        self
    }

    /// Returns a usable credential, refreshing or re-authorizing as needed.
    /// The result is always written back to the cache file.
    pub async fn credential(&self) -> Result<Credential> {
        let cached = Credential::load(&self.token_cache_path)?;

        let credential = match cached {
            Some(credential) if credential.is_valid() => {
                debug!("Using cached Google credential");
                credential
            }
            Some(Credential {
                refresh_token: Some(refresh_token),
                ..
            }) => {
                let app = InstalledApp::from_file(&self.client_secrets_path)?;
                match self.refresh(&app, &refresh_token).await {
                    Ok(credential) => credential,
                    Err(e) => {
                        warn!("Failed to refresh Google credential: {:#}", e);
                        self.authorize_interactively(&app).await?
                    }
                }
            }
            _ => {
                let app = InstalledApp::from_file(&self.client_secrets_path)?;
                self.authorize_interactively(&app).await?
            }
        };

        credential.store(&self.token_cache_path)?;
        Ok(credential)
    }

    async fn refresh(&self, app: &InstalledApp, refresh_token: &str) -> Result<Credential> {
        info!("Refreshing Google credential");
        let token = self
            .request_token(
                app,
                &[
                    ("client_id", app.client_id.as_str()),
                    ("client_secret", app.client_secret.as_str()),
                    ("refresh_token", refresh_token),
                    ("grant_type", "refresh_token"),
                ],
            )
            .await?;
        Ok(Credential::from_token_response(
            token,
            Some(refresh_token.to_string()),
        ))
    }

    async fn authorize_interactively(&self, app: &InstalledApp) -> Result<Credential> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to listen for the authorization redirect")?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}/");
        let csrf_state = format!("{:016x}", rand::random::<u64>());

        let auth_url = Url::parse_with_params(
            &app.auth_uri,
            &[
                ("client_id", app.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", DRIVE_SCOPE),
                ("access_type", "offline"),
                ("state", csrf_state.as_str()),
            ],
        )
        .context("Invalid authorization URI")?;

        (self.on_auth_url)(&auth_url);

        let code = wait_for_code(listener, csrf_state, self.auth_timeout).await?;
        info!("Authorization code received");

        let token = self
            .request_token(
                app,
                &[
                    ("code", code.as_str()),
                    ("client_id", app.client_id.as_str()),
                    ("client_secret", app.client_secret.as_str()),
                    ("redirect_uri", redirect_uri.as_str()),
                    ("grant_type", "authorization_code"),
                ],
            )
            .await?;
        Ok(Credential::from_token_response(token, None))
    }

    async fn request_token(
        &self,
        app: &InstalledApp,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();

        let response = self
            .http
            .post(&app.token_uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .context("Failed to reach the token endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Token endpoint returned {}: {}", status, body);
        }

        response
            .json::<TokenResponse>()
            .await
            .context("Failed to parse token response")
    }
}

struct CallbackState {
    oneshot: Mutex<Option<Sender<Result<String>>>>,
    csrf_state: String,
}

fn callback_router(state: CallbackState) -> Router {
    Router::new()
        .route("/", get(receive_code))
        .with_state(Arc::new(state))
}

async fn receive_code(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let result = if let Some(error) = params.get("error") {
        Err(anyhow::anyhow!("Authorization was denied: {error}"))
    } else if params.get("state") != Some(&state.csrf_state) {
        Err(anyhow::anyhow!("Authorization redirect carried a foreign state"))
    } else {
        params
            .get("code")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Authorization redirect carried no code"))
    };

    let message = match &result {
        Ok(_) => "Authorization complete. You may close this window.",
        Err(_) => "Authorization failed. Check the terminal for details.",
    };

    let sender = state.oneshot.lock().ok().and_then(|mut slot| slot.take());
    if let Some(sender) = sender {
        let _ = sender.send(result);
    }

    message
}

/// Serves the redirect target on `listener` until one redirect arrives or
/// `limit` elapses.
async fn wait_for_code(
    listener: TcpListener,
    csrf_state: String,
    limit: Duration,
) -> Result<String> {
    let (tx, rx) = oneshot::channel();
    let router = callback_router(CallbackState {
        oneshot: Mutex::new(Some(tx)),
        csrf_state,
    });

    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .context("Failed to run the authorization listener")
    });

    let received = timeout(limit, rx).await;
    server.abort();

    received
        .context("Timed out waiting for authorization")?
        .context("Authorization listener stopped unexpectedly")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::routing::post;
    use tempfile::TempDir;

    fn credential(expires_at: Option<i64>, refresh: Option<&str>) -> Credential {
        Credential {
            access_token: "old-access".to_string(),
            refresh_token: refresh.map(str::to_string),
            token_type: "Bearer".to_string(),
            scope: Some(DRIVE_SCOPE.to_string()),
            expires_at,
        }
    }

    fn write_secrets(dir: &TempDir, token_uri: &str) -> PathBuf {
        let path = dir.path().join("credentials.json");
        let secrets = serde_json::json!({
            "installed": {
                "client_id": "client-id",
                "client_secret": "client-secret",
                "auth_uri": "https://accounts.example/o/oauth2/auth",
                "token_uri": token_uri,
                "redirect_uris": ["http://localhost"]
            }
        });
        std::fs::write(&path, secrets.to_string()).unwrap();
        path
    }

    #[test]
    fn test_validity_window() {
        let now = 1_700_000_000;
        assert!(credential(None, None).is_valid_at(now));
        assert!(credential(Some(now + 3600), None).is_valid_at(now));
        assert!(!credential(Some(now + 30), None).is_valid_at(now));
        assert!(!credential(Some(now - 10), None).is_valid_at(now));

        let mut empty = credential(None, None);
        empty.access_token.clear();
        assert!(!empty.is_valid_at(now));
    }

    #[test]
    fn test_web_secrets_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(
            &path,
            r#"{"web":{"client_id":"a","client_secret":"b","auth_uri":"c","token_uri":"d"}}"#,
        )
        .unwrap();

        let app = InstalledApp::from_file(&path).unwrap();
        assert_eq!(app.client_id, "a");
        assert_eq!(app.token_uri, "d");
    }

    #[tokio::test]
    async fn test_valid_cache_is_used_without_network() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("token.json");
        credential(None, None).store(&cache).unwrap();

        let client = OAuthClient::new(
            reqwest::Client::new(),
            dir.path().join("missing-credentials.json"),
            &cache,
            Duration::from_secs(1),
        );

        let cred = client.credential().await.unwrap();
        assert_eq!(cred.access_token, "old-access");
    }

    #[tokio::test]
    async fn test_expired_credential_is_refreshed_and_persisted() {
        let router = Router::new().route(
            "/token",
            post(|body: String| async move {
                assert!(body.contains("grant_type=refresh_token"));
                assert!(body.contains("refresh_token=refresh-1"));
                axum::Json(serde_json::json!({
                    "access_token": "new-access",
                    "expires_in": 3599,
                    "token_type": "Bearer"
                }))
            }),
        );
        let base = test_support::serve(router).await;
        let dir = TempDir::new().unwrap();
        let secrets = write_secrets(&dir, &format!("{base}/token"));
        let cache = dir.path().join("token.json");
        credential(Some(0), Some("refresh-1")).store(&cache).unwrap();

        let client =
            OAuthClient::new(reqwest::Client::new(), secrets, &cache, Duration::from_secs(1));
        let cred = client.credential().await.unwrap();

        assert_eq!(cred.access_token, "new-access");
        assert_eq!(cred.refresh_token.as_deref(), Some("refresh-1"));
        assert!(cred.is_valid());
        assert_eq!(Credential::load(&cache).unwrap(), Some(cred));
    }

    type Grants = Arc<Mutex<Vec<HashMap<String, String>>>>;

    /// Token endpoint that records every grant it receives. Refresh grants
    /// are answered with `refresh_status`, code exchanges always succeed.
    async fn fake_token_endpoint(refresh_status: u16, grants: Grants) -> String {
        let router = Router::new().route(
            "/token",
            post(move |body: String| {
                let grants = grants.clone();
                async move {
                    let params: HashMap<String, String> =
                        url::form_urlencoded::parse(body.as_bytes()).into_owned().collect();
                    let status = if params["grant_type"] == "refresh_token" {
                        refresh_status
                    } else {
                        200
                    };
                    grants.lock().unwrap().push(params);
                    (
                        axum::http::StatusCode::from_u16(status).unwrap(),
                        axum::Json(serde_json::json!({
                            "access_token": "exchanged-access",
                            "refresh_token": "exchanged-refresh",
                            "expires_in": 3599,
                            "token_type": "Bearer"
                        })),
                    )
                }
            }),
        );
        test_support::serve(router).await
    }

    /// Acts as the browser: follows the consent URL straight to its redirect
    /// target with an authorization code.
    fn approve_consent(redirects: Arc<Mutex<Vec<String>>>) -> AuthUrlHandler {
        Box::new(move |url: &Url| {
            let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
            assert_eq!(params["scope"], DRIVE_SCOPE);
            assert_eq!(params["access_type"], "offline");
            let redirect_uri = params["redirect_uri"].clone();
            let target = format!("{redirect_uri}?state={}&code=auth-code", params["state"]);
            redirects.lock().unwrap().push(redirect_uri);
            tokio::spawn(async move {
                let _ = reqwest::get(target).await;
            });
        })
    }

    #[tokio::test]
    async fn test_consent_code_is_exchanged_and_persisted() {
        let grants = Grants::default();
        let base = fake_token_endpoint(200, grants.clone()).await;
        let dir = TempDir::new().unwrap();
        let secrets = write_secrets(&dir, &format!("{base}/token"));
        let cache = dir.path().join("token.json");
        let redirects = Arc::new(Mutex::new(Vec::new()));

        let client =
            OAuthClient::new(reqwest::Client::new(), secrets, &cache, Duration::from_secs(5))
                .with_auth_url_handler(approve_consent(redirects.clone()));
        let cred = client.credential().await.unwrap();

        assert_eq!(cred.access_token, "exchanged-access");
        assert_eq!(cred.refresh_token.as_deref(), Some("exchanged-refresh"));

        let grants = grants.lock().unwrap();
        let redirects = redirects.lock().unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(redirects.len(), 1);
        assert_eq!(grants[0]["grant_type"], "authorization_code");
        assert_eq!(grants[0]["code"], "auth-code");
        assert_eq!(grants[0]["client_id"], "client-id");
        assert_eq!(grants[0]["redirect_uri"], redirects[0]);
        assert_eq!(Credential::load(&cache).unwrap(), Some(cred));
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_consent() {
        let grants = Grants::default();
        let base = fake_token_endpoint(400, grants.clone()).await;
        let dir = TempDir::new().unwrap();
        let secrets = write_secrets(&dir, &format!("{base}/token"));
        let cache = dir.path().join("token.json");
        credential(Some(0), Some("refresh-1")).store(&cache).unwrap();
        let redirects = Arc::new(Mutex::new(Vec::new()));

        let client =
            OAuthClient::new(reqwest::Client::new(), secrets, &cache, Duration::from_secs(5))
                .with_auth_url_handler(approve_consent(redirects.clone()));
        let cred = client.credential().await.unwrap();

        let kinds: Vec<String> = grants
            .lock()
            .unwrap()
            .iter()
            .map(|grant| grant["grant_type"].clone())
            .collect();
        assert_eq!(kinds, vec!["refresh_token", "authorization_code"]);
        assert_eq!(redirects.lock().unwrap().len(), 1);
        assert_eq!(cred.access_token, "exchanged-access");
        assert_eq!(Credential::load(&cache).unwrap(), Some(cred));
    }

    #[tokio::test]
    async fn test_callback_delivers_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiter = tokio::spawn(wait_for_code(
            listener,
            "csrf-1".to_string(),
            Duration::from_secs(5),
        ));

        let response = reqwest::get(format!("http://{addr}/?state=csrf-1&code=auth-code"))
            .await
            .unwrap();
        assert!(response.status().is_success());

        assert_eq!(waiter.await.unwrap().unwrap(), "auth-code");
    }

    #[tokio::test]
    async fn test_callback_rejects_foreign_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiter = tokio::spawn(wait_for_code(
            listener,
            "csrf-1".to_string(),
            Duration::from_secs(5),
        ));

        reqwest::get(format!("http://{addr}/?state=other&code=auth-code"))
            .await
            .unwrap();

        assert!(waiter.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_callback_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let result = wait_for_code(listener, "csrf-1".to_string(), Duration::from_millis(50)).await;

        assert!(result.is_err());
    }
}
