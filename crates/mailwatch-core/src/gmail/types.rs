use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Minimal message stub returned by list and history endpoints. Fields not
/// modelled here (such as `labelIds`) are kept in `extra` so logging the
/// record shows what Gmail sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageId {
    pub id: String,
    #[serde(rename = "threadId", skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    #[serde(rename = "labelIds", default)]
    pub label_ids: Vec<String>,
    pub snippet: Option<String>,
    #[serde(rename = "historyId")]
    pub history_id: Option<String>,
    #[serde(rename = "internalDate")]
    pub internal_date: Option<String>,
    #[serde(rename = "sizeEstimate")]
    pub size_estimate: Option<u64>,
}

/// Body of `messages.send`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawMessage {
    pub raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    #[serde(rename = "emailAddress")]
    pub email_address: String,
    #[serde(rename = "messagesTotal")]
    pub messages_total: Option<u64>,
    #[serde(rename = "threadsTotal")]
    pub threads_total: Option<u64>,
    #[serde(rename = "historyId")]
    pub history_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelFilterBehavior {
    #[default]
    #[serde(alias = "include")]
    Include,
    #[serde(alias = "exclude")]
    Exclude,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterCriteria {
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchFilter {
    pub criteria: FilterCriteria,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchRequest {
    #[serde(rename = "labelIds")]
    pub label_ids: Vec<String>,
    #[serde(rename = "topicName")]
    pub topic_name: String,
    #[serde(rename = "labelFilterBehavior")]
    pub label_filter_behavior: LabelFilterBehavior,
    pub filter: WatchFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchResponse {
    #[serde(rename = "historyId")]
    pub history_id: String,
    /// Epoch milliseconds, sent as a decimal string.
    pub expiration: String,
    #[serde(rename = "topicName", skip_serializing_if = "Option::is_none")]
    pub topic_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WatchResponse {
    pub fn expiration_millis(&self) -> Option<i64> {
        self.expiration.trim().parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryMessageChange {
    pub message: MessageId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryLabelChange {
    pub message: MessageId,
    #[serde(rename = "labelIds", default)]
    pub label_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryRecord {
    pub id: String,
    #[serde(rename = "messages", skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessageId>>,
    #[serde(rename = "messagesAdded", skip_serializing_if = "Option::is_none")]
    pub messages_added: Option<Vec<HistoryMessageChange>>,
    #[serde(rename = "messagesDeleted", skip_serializing_if = "Option::is_none")]
    pub messages_deleted: Option<Vec<HistoryMessageChange>>,
    #[serde(rename = "labelsAdded", skip_serializing_if = "Option::is_none")]
    pub labels_added: Option<Vec<HistoryLabelChange>>,
    #[serde(rename = "labelsRemoved", skip_serializing_if = "Option::is_none")]
    pub labels_removed: Option<Vec<HistoryLabelChange>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListHistoryResponse {
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
    #[serde(rename = "historyId")]
    pub history_id: Option<String>,
}

/// Google's JSON error envelope: `{"error": {"code", "message", "status"}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleErrorEnvelope {
    pub error: GoogleError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleError {
    pub code: Option<u16>,
    pub message: String,
    pub status: Option<String>,
}
