use std::sync::Arc;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::gmail::{
    oauth::{
        Credential, DEFAULT_REFRESH_BUFFER, OAuthError, TOKEN_ENDPOINT, TokenStore,
        refresh_access_token_with_endpoint,
    },
    types::{
        GoogleErrorEnvelope, ListHistoryResponse, Message, Profile, RawMessage, WatchRequest,
        WatchResponse,
    },
};

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users";

#[derive(Debug, Error)]
pub enum GmailClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oauth error: {0}")]
    OAuth(#[from] OAuthError),
    #[error("token persistence error: {0}")]
    TokenStore(String),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unauthorized after refresh")]
    Unauthorized,
    #[error("gmail api error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        body: String,
    },
}

impl GmailClientError {
    /// Raw error body returned by Gmail, if the failure came from the API.
    pub fn detail(&self) -> Option<&str> {
        match self {
            GmailClientError::Api { body, .. } if !body.is_empty() => Some(body.as_str()),
            GmailClientError::OAuth(OAuthError::TokenEndpoint { body, .. }) if !body.is_empty() => {
                Some(body.as_str())
            }
            _ => None,
        }
    }
}

pub struct GmailClient<S: TokenStore> {
    http: Client,
    user_id: String,
    client_id: String,
    client_secret: String,
    api_base: String,
    token_endpoint: String,
    credential: RwLock<Credential>,
    refresh_lock: Mutex<()>,
    token_store: Arc<S>,
}

impl<S: TokenStore> GmailClient<S> {
    pub fn new(
        http: Client,
        user_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        credential: Credential,
        token_store: Arc<S>,
    ) -> Self {
        Self {
            http,
            user_id: user_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            credential: RwLock::new(credential),
            refresh_lock: Mutex::new(()),
            token_store,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_token_endpoint(mut self, token_endpoint: impl Into<String>) -> Self {
        self.token_endpoint = token_endpoint.into();
        self
    }

    /// Fetches the authenticated user's profile, including their address.
    pub async fn get_profile(&self) -> Result<Profile, GmailClientError> {
        let url = format!("{}/{}/profile", self.api_base, self.user_id);
        self.send_json(|| self.http.get(&url)).await
    }

    /// Registers a push-notification watch on the mailbox.
    pub async fn watch(&self, request: &WatchRequest) -> Result<WatchResponse, GmailClientError> {
        let url = format!("{}/{}/watch", self.api_base, self.user_id);
        self.send_json(|| self.http.post(&url).json(request)).await
    }

    /// Sends a base64url-encoded RFC 5322 message.
    pub async fn send_message(&self, raw: impl Into<String>) -> Result<Message, GmailClientError> {
        let url = format!("{}/{}/messages/send", self.api_base, self.user_id);
        let body = RawMessage { raw: raw.into() };
        self.send_json(|| self.http.post(&url).json(&body)).await
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Message, GmailClientError> {
        let url = format!("{}/{}/messages/{}", self.api_base, self.user_id, message_id);
        self.send_json(|| self.http.get(&url).query(&[("format", "minimal")]))
            .await
    }

    pub async fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListHistoryResponse, GmailClientError> {
        let url = format!("{}/{}/history", self.api_base, self.user_id);
        self.send_json(|| {
            let mut builder = self
                .http
                .get(&url)
                .query(&[("startHistoryId", start_history_id)]);
            if let Some(token) = page_token {
                builder = builder.query(&[("pageToken", token)]);
            }
            builder
        })
        .await
    }

    async fn send_json<T, B>(&self, build: B) -> Result<T, GmailClientError>
    where
        T: DeserializeOwned,
        B: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let response = self.perform_authenticated(build).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(GmailClientError::Decode)
    }

    async fn perform_authenticated<B>(
        &self,
        build: B,
    ) -> Result<reqwest::Response, GmailClientError>
    where
        B: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let credential = self.ensure_fresh_token(false).await?;
        let mut response = build()
            .bearer_auth(&credential.access_token)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let credential = self.ensure_fresh_token(true).await?;
            response = build()
                .bearer_auth(&credential.access_token)
                .send()
                .await?;
        }

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(GmailClientError::Unauthorized);
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, body));
        }

        Ok(response)
    }

    async fn ensure_fresh_token(&self, force_refresh: bool) -> Result<Credential, GmailClientError> {
        {
            let credential = self.credential.read().await;
            if !force_refresh && !credential.needs_refresh(Utc::now(), DEFAULT_REFRESH_BUFFER) {
                return Ok(credential.clone());
            }
        }

        let _guard = self.refresh_lock.lock().await;

        {
            let credential = self.credential.read().await;
            if !force_refresh && !credential.needs_refresh(Utc::now(), DEFAULT_REFRESH_BUFFER) {
                return Ok(credential.clone());
            }
        }

        debug!(force_refresh, "refreshing gmail access token");
        let current = { self.credential.read().await.clone() };
        let refreshed = refresh_access_token_with_endpoint(
            &self.http,
            &self.client_id,
            &self.client_secret,
            &current,
            &self.token_endpoint,
        )
        .await?;

        {
            let mut credential = self.credential.write().await;
            *credential = refreshed.clone();
        }

        self.token_store
            .save_tokens(&refreshed)
            .await
            .map_err(|err| GmailClientError::TokenStore(err.to_string()))?;

        Ok(refreshed)
    }
}

fn api_error(status: StatusCode, body: String) -> GmailClientError {
    let message = match serde_json::from_str::<GoogleErrorEnvelope>(&body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
        Err(_) => body.trim().to_string(),
    };

    GmailClientError::Api {
        status: status.as_u16(),
        message,
        body,
    }
}
