use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use thiserror::Error;
use tracing::warn;

pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::minutes(5);
pub const BEARER: &str = "Bearer";

/// OAuth credential in Google's "authorized user" shape, as written to the
/// local credential cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    BEARER.to_string()
}

impl Credential {
    /// A credential without an expiry never counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.needs_refresh(now, DEFAULT_REFRESH_BUFFER)
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        match self.expiry {
            Some(expiry) => now + buffer >= expiry,
            None => false,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && !self.is_expired(now)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }

    /// Attach the client identity used to mint this credential so later
    /// refreshes don't need the client-secret file.
    pub fn with_client(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_uri: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self.token_uri = Some(token_uri.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("missing refresh token")]
    MissingRefreshToken,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token response decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("token endpoint error {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
    #[error("invalid expires_in value: {0}")]
    InvalidExpires(i64),
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn save_tokens(&self, credential: &Credential) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Default)]
pub struct NoopTokenStore;

#[async_trait]
impl TokenStore for NoopTokenStore {
    type Error = Infallible;

    async fn save_tokens(&self, _credential: &Credential) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_credential(self, previous: Option<&Credential>) -> Result<Credential, OAuthError> {
        if self.expires_in <= 0 {
            return Err(OAuthError::InvalidExpires(self.expires_in));
        }

        let refresh_token = self
            .refresh_token
            .or_else(|| previous.and_then(|c| c.refresh_token.clone()));
        let scopes = match self.scope {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => previous.map(|c| c.scopes.clone()).unwrap_or_default(),
        };

        Ok(Credential {
            access_token: self.access_token,
            refresh_token,
            token_uri: previous.and_then(|c| c.token_uri.clone()),
            client_id: previous.and_then(|c| c.client_id.clone()),
            client_secret: previous.and_then(|c| c.client_secret.clone()),
            scopes,
            token_type: self.token_type.unwrap_or_else(default_token_type),
            expiry: Some(Utc::now() + Duration::seconds(self.expires_in)),
        })
    }
}

pub async fn refresh_access_token_with_endpoint(
    client: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
    credential: &Credential,
    endpoint: &str,
) -> Result<Credential, OAuthError> {
    let refresh_token = match credential.refresh_token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => return Err(OAuthError::MissingRefreshToken),
    };

    let body = post_token_form(
        client,
        endpoint,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
        ],
    )
    .await?;

    let payload: TokenResponse = serde_json::from_str(&body).map_err(OAuthError::Decode)?;
    payload.into_credential(Some(credential))
}

/// Exchange an authorization code from the installed-app flow for a new
/// credential.
pub async fn exchange_code_with_endpoint(
    client: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
    endpoint: &str,
) -> Result<Credential, OAuthError> {
    let body = post_token_form(
        client,
        endpoint,
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
        ],
    )
    .await?;

    let payload: TokenResponse = serde_json::from_str(&body).map_err(OAuthError::Decode)?;
    let credential = payload.into_credential(None)?;
    if !credential.has_refresh_token() {
        warn!("token response carried no refresh_token; the credential cannot be refreshed later");
    }

    Ok(credential.with_client(client_id, client_secret, endpoint))
}

async fn post_token_form(
    client: &reqwest::Client,
    endpoint: &str,
    form: &[(&str, &str)],
) -> Result<String, OAuthError> {
    let response = client.post(endpoint).form(form).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OAuthError::TokenEndpoint {
            status: status.as_u16(),
            body,
        });
    }

    Ok(response.text().await?)
}
