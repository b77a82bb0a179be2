use std::fmt::Display;

use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::config::GmailConfig;
use crate::gmail::{
    EmailAddress, GmailClient, GmailClientError, HistoryRecord, MimeBuildError, MimeMessage,
    TokenStore,
    types::{FilterCriteria, LabelFilterBehavior, WatchFilter, WatchRequest, WatchResponse},
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Gmail(#[from] GmailClientError),
    #[error("failed to build test message: {0}")]
    Message(#[from] MimeBuildError),
    #[error("watch response has invalid expiration {0:?}")]
    InvalidExpiration(String),
    #[error("failed to encode for logging: {0}")]
    Encode(#[from] serde_json::Error),
}

impl WatchError {
    pub fn detail(&self) -> Option<&str> {
        match self {
            WatchError::Gmail(err) => err.detail(),
            _ => None,
        }
    }
}

/// What to watch and where Gmail should publish notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    pub label_ids: Vec<String>,
    pub topic_name: String,
    pub label_filter_behavior: LabelFilterBehavior,
}

impl From<&GmailConfig> for WatchSettings {
    fn from(config: &GmailConfig) -> Self {
        Self {
            label_ids: config.label_ids.clone(),
            topic_name: config.topic_name.clone(),
            label_filter_behavior: config.label_filter_behavior,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchReport {
    pub email_address: String,
    pub request: WatchRequest,
    pub watch: WatchResponse,
    pub expiration: String,
    pub sent_message_id: String,
    pub sent_labels: Vec<String>,
    pub history: Vec<HistoryRecord>,
}

/// The filter's sender is always the address the identity lookup returned.
pub fn build_watch_request(settings: &WatchSettings, email_address: &str) -> WatchRequest {
    WatchRequest {
        label_ids: settings.label_ids.clone(),
        topic_name: settings.topic_name.clone(),
        label_filter_behavior: settings.label_filter_behavior,
        filter: WatchFilter {
            criteria: FilterCriteria {
                from: email_address.to_string(),
            },
        },
    }
}

/// Render epoch milliseconds as `YYYY-MM-DD HH:MM:SS` in `tz`.
pub fn format_expiration<Tz>(millis: i64, tz: &Tz) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let instant = DateTime::from_timestamp_millis(millis)?;
    Some(instant.with_timezone(tz).format(TIMESTAMP_FORMAT).to_string())
}

pub fn build_test_message<Tz>(email_address: &str, sent_at: &DateTime<Tz>) -> MimeMessage
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let stamp = sent_at.format(TIMESTAMP_FORMAT).to_string();
    let subject = format!("Gmail API Test Email [{stamp}]");
    let text = format!(
        "This is a test email sent at {stamp} to verify Gmail API notifications.\n\n\
         If you receive this email, the Gmail API send functionality is working correctly.\n\n\
         You should also see a notification in your Pub/Sub topic shortly."
    );
    let html = format!("<h1>{subject}</h1><p>{text}</p>");

    MimeMessage {
        from: EmailAddress::from(email_address),
        to: vec![EmailAddress::from(email_address)],
        subject: Some(subject),
        body_plain: Some(text),
        body_html: Some(html),
    }
}

/// Identity lookup, watch registration, test send, read-back and history
/// check, in that order. The first failure aborts the sequence.
pub async fn run_watch_check<S: TokenStore>(
    client: &GmailClient<S>,
    settings: &WatchSettings,
) -> Result<WatchReport, WatchError> {
    let profile = client.get_profile().await?;
    let email_address = profile.email_address;
    info!("Authenticated as: {email_address}");

    let request = build_watch_request(settings, &email_address);
    info!(
        "Setting up watch with request: {}",
        serde_json::to_string_pretty(&request)?
    );

    let watch = client.watch(&request).await?;
    let expiration = watch
        .expiration_millis()
        .and_then(|millis| format_expiration(millis, &Local))
        .ok_or_else(|| WatchError::InvalidExpiration(watch.expiration.clone()))?;
    let topic_name = watch.topic_name.as_deref().unwrap_or(&request.topic_name);
    info!("Watch request successful!");
    info!("History ID: {}", watch.history_id);
    info!("Expiration: {expiration}");
    info!("Topic Name: {topic_name}");
    info!(
        "Full watch response: {}",
        serde_json::to_string_pretty(&watch)?
    );

    info!("Testing notification by sending a test email...");
    let raw = build_test_message(&email_address, &Local::now()).to_base64_url()?;
    let sent = client.send_message(raw).await?;
    info!("Test email sent successfully! Message ID: {}", sent.id);

    let details = client.get_message(&sent.id).await?;
    info!("Message details retrieved. Labels: {:?}", details.label_ids);

    let history = collect_history(client, &watch.history_id).await?;
    log_history(&history)?;

    Ok(WatchReport {
        email_address,
        request,
        watch,
        expiration,
        sent_message_id: sent.id,
        sent_labels: details.label_ids,
        history,
    })
}

async fn collect_history<S: TokenStore>(
    client: &GmailClient<S>,
    start_history_id: &str,
) -> Result<Vec<HistoryRecord>, WatchError> {
    let mut records = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = client
            .list_history(start_history_id, page_token.as_deref())
            .await?;
        records.extend(page.history);

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    Ok(records)
}

fn log_history(history: &[HistoryRecord]) -> Result<(), WatchError> {
    if history.is_empty() {
        info!("No history entries found since watch was set up");
        return Ok(());
    }

    info!(
        "Found {} history entries since watch was set up",
        history.len()
    );
    for entry in history {
        info!("History entry: {}", pretty(entry)?);
    }
    Ok(())
}

fn pretty<T: Serialize>(value: &T) -> Result<String, WatchError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Log a failed run: the error itself, then Gmail's error body if present.
pub fn log_failure(err: &WatchError) {
    error!("Error in watch setup: {err}");
    if let Some(detail) = err.detail() {
        error!("Error details: {detail}");
    }
}

pub fn exit_code<T, E>(result: &Result<T, E>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}
