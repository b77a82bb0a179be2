use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use mailwatch_core::{
    Config, CredentialCache, CredentialLoader, WatchSettings, exit_code,
    gmail::{GmailClient, InstalledAppFlow},
    init_logging, log_failure, run_watch_check,
};
use tracing::{error, info, warn};

/// Register a Gmail push-notification watch and verify it with a test email.
#[derive(Debug, Parser)]
#[command(name = "check-watch", version)]
struct Args {
    /// Path to the TOML configuration file. A missing file uses the defaults.
    #[arg(long, env = "CONFIG_PATH", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    init_logging(&config.logging)?;

    let http = reqwest::Client::new();
    let gmail = &config.gmail;

    let flow = InstalledAppFlow::new(http.clone())
        .with_auth_endpoint(gmail.auth_endpoint.clone())
        .with_token_endpoint(gmail.token_endpoint.clone())
        .with_timeout(Duration::from_secs(gmail.authorize_timeout_secs))
        .with_open_browser(gmail.open_browser);
    let loader = CredentialLoader::new(
        http.clone(),
        CredentialCache::new(&config.paths.token_cache),
        &config.paths.client_secret,
        gmail.scopes.clone(),
        flow,
    )
    .with_token_endpoint(gmail.token_endpoint.clone());

    let credential = match loader.load().await {
        Ok(credential) => credential,
        Err(err) => {
            error!("Failed to obtain credentials: {err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let (client_id, client_secret) = match loader.client_identity(&credential) {
        Ok(identity) => identity,
        Err(err) => {
            warn!("No OAuth client identity available, token refresh will fail: {err}");
            (String::new(), String::new())
        }
    };
    let store = Arc::new(CredentialCache::new(&config.paths.token_cache));
    let client = GmailClient::new(
        http,
        gmail.user_id.clone(),
        client_id,
        client_secret,
        credential,
        store,
    )
    .with_api_base(gmail.api_base.clone())
    .with_token_endpoint(gmail.token_endpoint.clone());

    let result = run_watch_check(&client, &WatchSettings::from(gmail)).await;
    match &result {
        Ok(report) => info!(
            "Watch check complete for {} ({} history entries)",
            report.email_address,
            report.history.len()
        ),
        Err(err) => log_failure(err),
    }

    Ok(ExitCode::from(exit_code(&result)))
}
