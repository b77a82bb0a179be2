use std::path::PathBuf;

use chrono::Utc;
use reqwest::Client;
use thiserror::Error;
use tracing::{info, warn};

use crate::credentials::{ClientSecrets, CredentialCache, CredentialError};
use crate::gmail::authorize::{AuthorizeError, Authorizer};
use crate::gmail::oauth::{
    Credential, OAuthError, TOKEN_ENDPOINT, refresh_access_token_with_endpoint,
};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Credentials file not found at {}", .0.display())]
    MissingClientSecret(PathBuf),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("token refresh failed: {0}")]
    Refresh(#[from] OAuthError),
    #[error("interactive authorization failed: {0}")]
    Authorize(#[from] AuthorizeError),
}

/// Resolves a usable credential: cached, refreshed, or freshly authorized.
pub struct CredentialLoader<A: Authorizer> {
    http: Client,
    cache: CredentialCache,
    client_secret_path: PathBuf,
    scopes: Vec<String>,
    token_endpoint: String,
    authorizer: A,
}

impl<A: Authorizer> CredentialLoader<A> {
    pub fn new(
        http: Client,
        cache: CredentialCache,
        client_secret_path: impl Into<PathBuf>,
        scopes: Vec<String>,
        authorizer: A,
    ) -> Self {
        Self {
            http,
            cache,
            client_secret_path: client_secret_path.into(),
            scopes,
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            authorizer,
        }
    }

    pub fn with_token_endpoint(mut self, token_endpoint: impl Into<String>) -> Self {
        self.token_endpoint = token_endpoint.into();
        self
    }

    /// Return a valid credential, writing the cache whenever it changes.
    pub async fn load(&self) -> Result<Credential, LoaderError> {
        let now = Utc::now();
        let cached = match self.cache.load() {
            Ok(cached) => cached,
            Err(err) => {
                warn!("ignoring unreadable credential cache: {err}");
                None
            }
        };

        if let Some(credential) = cached.as_ref() {
            if credential.is_valid(now) {
                info!("Using cached credential from {}", self.cache.path().display());
                return Ok(credential.clone());
            }
        }

        let fresh = match cached {
            Some(credential) if credential.is_expired(now) && credential.has_refresh_token() => {
                match self.refresh(&credential).await {
                    Ok(refreshed) => refreshed,
                    Err(LoaderError::Refresh(OAuthError::TokenEndpoint { status, body })) => {
                        warn!(
                            status,
                            "refresh rejected by token endpoint, falling back to interactive authorization: {body}"
                        );
                        self.authorize_interactively().await?
                    }
                    Err(err) => return Err(err),
                }
            }
            _ => self.authorize_interactively().await?,
        };

        self.cache.save(&fresh)?;
        info!("Saved credential to {}", self.cache.path().display());
        Ok(fresh)
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential, LoaderError> {
        info!("Refreshing expired credential");
        let (client_id, client_secret) = self.client_identity(credential)?;

        let refreshed = refresh_access_token_with_endpoint(
            &self.http,
            &client_id,
            &client_secret,
            credential,
            &self.token_endpoint,
        )
        .await?;

        Ok(refreshed.with_client(client_id, client_secret, self.token_endpoint.clone()))
    }

    /// OAuth client id and secret for refreshing `credential`: its own when
    /// present, otherwise the client-secret file's.
    pub fn client_identity(
        &self,
        credential: &Credential,
    ) -> Result<(String, String), LoaderError> {
        match (&credential.client_id, &credential.client_secret) {
            (Some(id), Some(secret)) => Ok((id.clone(), secret.clone())),
            _ => {
                let secrets = self.client_secrets()?;
                Ok((secrets.client_id, secrets.client_secret))
            }
        }
    }

    async fn authorize_interactively(&self) -> Result<Credential, LoaderError> {
        let secrets = self.client_secrets()?;
        info!("Starting interactive authorization");
        let credential = self.authorizer.authorize(&secrets, &self.scopes).await?;
        Ok(credential)
    }

    fn client_secrets(&self) -> Result<ClientSecrets, LoaderError> {
        if !self.client_secret_path.exists() {
            return Err(LoaderError::MissingClientSecret(
                self.client_secret_path.clone(),
            ));
        }
        Ok(ClientSecrets::load(&self.client_secret_path)?)
    }
}
