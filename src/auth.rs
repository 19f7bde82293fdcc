use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const CREDENTIALS_PATH: &str = "credentials.json";
const TOKEN_PATH: &str = "token.json";

const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Tokens are refreshed this long before their recorded expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// The token endpoint refused the refresh token itself (4xx). Transient
/// faults (network, 5xx) are plain errors and leave the token usable.
#[derive(Debug, Error)]
#[error("refresh token rejected ({status}): {body}")]
pub struct RefreshRejected {
    status: u16,
    body: String,
}

#[derive(Deserialize)]
struct ClientSecrets {
    installed: InstalledApp,
}

#[derive(Deserialize)]
struct InstalledApp {
    client_id: String,
    client_secret: String,
}

#[derive(Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
}

impl StoredToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

impl TokenResponse {
    fn into_stored(self, previous_refresh: Option<String>) -> StoredToken {
        StoredToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: Utc::now() + Duration::seconds(self.expires_in),
        }
    }
}

/// Process-wide Google OAuth credential provider for the Sheets scope.
/// Init is explicit (load cached token, refresh, or run the interactive
/// installed-app flow); there is no teardown. The sink is the only consumer.
pub struct Authenticator {
    secrets: InstalledApp,
    token: StoredToken,
    client: reqwest::blocking::Client,
    token_path: PathBuf,
    token_url: String,
}

impl Authenticator {
    /// Load a cached credential if present and usable, otherwise run the
    /// interactive authorization flow, persisting the result for next time.
    pub fn load_or_login() -> Result<Self> {
        let secrets = read_client_secrets(CREDENTIALS_PATH)?;
        let client = reqwest::blocking::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        let token_path = PathBuf::from(TOKEN_PATH);

        let token = match read_cached_token(&token_path)? {
            Some(cached) if !cached.is_expired(Utc::now()) => {
                info!("Using cached token from {}", token_path.display());
                cached
            }
            Some(StoredToken {
                refresh_token: Some(refresh),
                ..
            }) => {
                info!("Cached token expired, refreshing");
                refresh_token(&client, TOKEN_URL, &secrets, &refresh)?
            }
            _ => interactive_login(&client, &secrets)?,
        };

        let auth = Self {
            secrets,
            token,
            client,
            token_path,
            token_url: TOKEN_URL.to_string(),
        };
        auth.persist()?;
        Ok(auth)
    }

    /// A bearer token valid for at least the expiry margin. The cached
    /// refresh token survives transient refresh failures; only an outright
    /// rejection by the token endpoint discards it.
    pub fn access_token(&mut self) -> Result<String> {
        if self.token.is_expired(Utc::now()) {
            self.token = match &self.token.refresh_token {
                Some(refresh) => {
                    match refresh_token(&self.client, &self.token_url, &self.secrets, refresh) {
                        Ok(token) => token,
                        Err(e) => {
                            if e.is::<RefreshRejected>() {
                                warn!("Refresh token rejected, discarding it");
                                self.token.refresh_token = None;
                            }
                            return Err(e);
                        }
                    }
                }
                None => interactive_login(&self.client, &self.secrets)?,
            };
            self.persist()?;
        }
        Ok(self.token.access_token.clone())
    }

    #[cfg(test)]
    pub(crate) fn stub() -> Self {
        Self {
            secrets: InstalledApp {
                client_id: "id".into(),
                client_secret: "secret".into(),
            },
            token: StoredToken {
                access_token: "stub".into(),
                refresh_token: None,
                expires_at: Utc::now() + Duration::seconds(3600),
            },
            client: reqwest::blocking::Client::new(),
            token_path: std::env::temp_dir().join("linkedin_jobs_stub_token.json"),
            token_url: TOKEN_URL.to_string(),
        }
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.token)?;
        fs::write(&self.token_path, json)
            .with_context(|| format!("Failed to write {}", self.token_path.display()))
    }
}

fn read_client_secrets(path: impl AsRef<Path>) -> Result<InstalledApp> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read client secrets from {}", path.display()))?;
    let secrets: ClientSecrets =
        serde_json::from_str(&raw).context("Malformed client secrets file")?;
    Ok(secrets.installed)
}

fn read_cached_token(path: &Path) -> Result<Option<StoredToken>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    // A corrupt cache falls through to a fresh login rather than failing.
    Ok(serde_json::from_str(&raw).ok())
}

fn refresh_token(
    client: &reqwest::blocking::Client,
    token_url: &str,
    secrets: &InstalledApp,
    refresh: &str,
) -> Result<StoredToken> {
    let response = client
        .post(token_url)
        .form(&[
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
            ("refresh_token", refresh),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .context("Token refresh request failed")?;
    let status = response.status();
    if status.is_client_error() {
        return Err(RefreshRejected {
            status: status.as_u16(),
            body: response.text().unwrap_or_default(),
        }
        .into());
    }
    if !status.is_success() {
        bail!(
            "Token refresh failed ({}): {}",
            status,
            response.text().unwrap_or_default()
        );
    }
    let parsed: TokenResponse = response.json().context("Malformed token response")?;
    Ok(parsed.into_stored(Some(refresh.to_string())))
}

fn interactive_login(
    client: &reqwest::blocking::Client,
    secrets: &InstalledApp,
) -> Result<StoredToken> {
    let listener =
        TcpListener::bind("127.0.0.1:0").context("Failed to bind loopback listener")?;
    let redirect_uri = format!("http://127.0.0.1:{}", listener.local_addr()?.port());

    let consent_url = reqwest::Url::parse_with_params(
        AUTH_URL,
        &[
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", SCOPE),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )?;

    println!("Open this URL in your browser to authorize spreadsheet access:\n");
    println!("  {}\n", consent_url);
    println!("Waiting for the redirect on {} ...", redirect_uri);

    let (stream, _) = listener.accept().context("Redirect connection failed")?;
    let code = read_redirect_code(stream)?;
    info!("Authorization code received, exchanging for tokens");

    let response = client
        .post(TOKEN_URL)
        .form(&[
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .context("Code exchange request failed")?;
    if !response.status().is_success() {
        bail!(
            "Code exchange rejected ({}): {}",
            response.status(),
            response.text().unwrap_or_default()
        );
    }
    let parsed: TokenResponse = response.json().context("Malformed token response")?;
    Ok(parsed.into_stored(None))
}

/// Read the single redirect request off the loopback socket, answer it with
/// a small closing page, and return the `code` query parameter.
fn read_redirect_code(mut stream: TcpStream) -> Result<String> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    let _ = stream.write_all(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nAuthorized. You can close this tab.",
    );

    parse_redirect_code(&request_line)
}

fn parse_redirect_code(request_line: &str) -> Result<String> {
    let path = request_line
        .split_whitespace()
        .nth(1)
        .context("Malformed redirect request")?;
    let url = reqwest::Url::parse(&format!("http://localhost{}", path))
        .context("Malformed redirect path")?;

    if let Some((_, err)) = url.query_pairs().find(|(k, _)| k == "error") {
        bail!("Authorization denied: {}", err);
    }
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .context("Redirect carried no authorization code")
}

// ── Tests ──
