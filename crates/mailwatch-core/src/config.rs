use serde::Deserialize;
use std::{env, path::Path, path::PathBuf};
use thiserror::Error;

use crate::gmail::authorize::DEFAULT_AUTHORIZE_TIMEOUT;
use crate::gmail::client::DEFAULT_API_BASE;
use crate::gmail::oauth::{AUTH_ENDPOINT, TOKEN_ENDPOINT};
use crate::gmail::types::LabelFilterBehavior;

pub const DEFAULT_SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.modify",
];
pub const DEFAULT_TOPIC: &str = "projects/gmail-webhook-454508/topics/MailHook";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
    pub gmail: GmailConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct PathsConfig {
    pub token_cache: PathBuf,
    pub client_secret: PathBuf,
    pub converted_token: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            token_cache: PathBuf::from("token-cache.json"),
            client_secret: PathBuf::from("credentials.json"),
            converted_token: PathBuf::from("token.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct LoggingConfig {
    pub file: Option<PathBuf>,
    pub console: bool,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from("gmail_watch.log")),
            console: true,
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct GmailConfig {
    pub user_id: String,
    pub scopes: Vec<String>,
    pub topic_name: String,
    pub label_ids: Vec<String>,
    pub label_filter_behavior: LabelFilterBehavior,
    pub api_base: String,
    pub token_endpoint: String,
    pub auth_endpoint: String,
    pub authorize_timeout_secs: u64,
    pub open_browser: bool,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            user_id: "me".to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            topic_name: DEFAULT_TOPIC.to_string(),
            label_ids: vec!["INBOX".to_string()],
            label_filter_behavior: LabelFilterBehavior::Include,
            api_base: DEFAULT_API_BASE.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            auth_endpoint: AUTH_ENDPOINT.to_string(),
            authorize_timeout_secs: DEFAULT_AUTHORIZE_TIMEOUT.as_secs(),
            open_browser: true,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ConfigBuild(config::ConfigError),
    #[error("failed to parse configuration: {0}")]
    Deserialize(config::ConfigError),
    #[error("missing required environment variable {0}")]
    MissingEnvVar(String),
}

impl Config {
    /// Load configuration from the provided path (a missing file yields the
    /// defaults), apply environment overrides, and resolve any `env:`
    /// indirections.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .build()
            .map_err(ConfigError::ConfigBuild)?;

        let mut cfg: Config = raw.try_deserialize().map_err(ConfigError::Deserialize)?;
        cfg.apply_env_overrides();
        cfg.resolve_env_markers()?;
        cfg.expand_paths();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(topic) = env::var("GMAIL_TOPIC") {
            self.gmail.topic_name = topic;
        }

        if let Ok(path) = env::var("TOKEN_CACHE_PATH") {
            self.paths.token_cache = PathBuf::from(path);
        }

        if let Ok(path) = env::var("CLIENT_SECRET_PATH") {
            self.paths.client_secret = PathBuf::from(path);
        }

        if let Ok(path) = env::var("LOG_FILE") {
            self.logging.file = Some(PathBuf::from(path));
        }
    }

    fn resolve_env_markers(&mut self) -> Result<(), ConfigError> {
        apply_env_marker(&mut self.gmail.user_id)?;
        apply_env_marker(&mut self.gmail.topic_name)?;
        for label in &mut self.gmail.label_ids {
            apply_env_marker(label)?;
        }
        apply_env_marker_path(&mut self.paths.token_cache)?;
        apply_env_marker_path(&mut self.paths.client_secret)?;
        apply_env_marker_path(&mut self.paths.converted_token)?;
        if let Some(file) = &mut self.logging.file {
            apply_env_marker_path(file)?;
        }
        Ok(())
    }

    fn expand_paths(&mut self) {
        expand_tilde(&mut self.paths.token_cache);
        expand_tilde(&mut self.paths.client_secret);
        expand_tilde(&mut self.paths.converted_token);
        if let Some(file) = &mut self.logging.file {
            expand_tilde(file);
        }
    }
}

fn expand_tilde(path: &mut PathBuf) {
    let value = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&value);
    *path = PathBuf::from(expanded.as_ref());
}

fn apply_env_marker(value: &mut String) -> Result<(), ConfigError> {
    if let Some(rest) = value.strip_prefix("env:") {
        let resolved = env::var(rest).map_err(|_| ConfigError::MissingEnvVar(rest.to_string()))?;
        *value = resolved;
    }
    Ok(())
}

fn apply_env_marker_path(path: &mut PathBuf) -> Result<(), ConfigError> {
    let mut value = path.to_string_lossy().to_string();
    apply_env_marker(&mut value)?;
    *path = PathBuf::from(value);
    Ok(())
}
