//! Delivery receipt payloads.
//!
//! Parses provider webhook bodies into [`StatusEvent`]s. Unknown statuses
//! and malformed entries are skipped rather than rejected, so a webhook
//! never fails because of one odd record.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use super::ingestion::StatusEvent;
use crate::models::MessageStatus;

/// WhatsApp Cloud API webhook body.
#[derive(Debug, Default, Deserialize)]
pub struct WhatsAppWebhook {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub field: String,
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub statuses: Vec<StatusObject>,
}

#[derive(Debug, Deserialize)]
pub struct StatusObject {
    pub id: String,
    pub status: String,
    /// Unix seconds, sent as a string by the Graph API.
    #[serde(default)]
    pub timestamp: Value,
    #[serde(default)]
    pub errors: Vec<StatusError>,
}

#[derive(Debug, Deserialize)]
pub struct StatusError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
}

fn parse_unix_seconds(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        Value::String(s) => s.parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    DateTime::from_timestamp(seconds, 0)
}

impl WhatsAppWebhook {
    /// One event per status object under a `messages` change.
    #[must_use]
    pub fn status_events(&self) -> Vec<StatusEvent> {
        self.entry
            .iter()
            .flat_map(|entry| &entry.changes)
            .filter(|change| change.field == "messages")
            .flat_map(|change| &change.value.statuses)
            .filter_map(|status| {
                let Some(parsed) = MessageStatus::parse(&status.status) else {
                    tracing::debug!(status = %status.status, "Ignoring unknown WhatsApp status");
                    return None;
                };
                let error = status.errors.first().map(|e| match (&e.title, e.code) {
                    (Some(title), Some(code)) => format!("{title} ({code})"),
                    (Some(title), None) => title.clone(),
                    (None, code) => format!("Provider error {}", code.unwrap_or_default()),
                });

                Some(StatusEvent {
                    provider_message_id: status.id.clone(),
                    status: parsed,
                    timestamp: parse_unix_seconds(&status.timestamp).unwrap_or_else(Utc::now),
                    error,
                })
            })
            .collect()
    }
}

/// Twilio status callback form.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct TwilioStatusCallback {
    #[validate(length(min = 1, max = 64))]
    pub message_sid: String,
    #[validate(length(min = 1))]
    pub message_status: String,
    #[serde(default)]
    pub error_code: Option<String>,
}

/// Map a Twilio message status; transient statuses yield `None`.
#[must_use]
pub fn twilio_status(value: &str) -> Option<MessageStatus> {
    match value {
        "sent" => Some(MessageStatus::Sent),
        "delivered" => Some(MessageStatus::Delivered),
        "read" => Some(MessageStatus::Read),
        "failed" | "undelivered" => Some(MessageStatus::Failed),
        _ => None,
    }
}

impl TwilioStatusCallback {
    /// Event for a terminal or receipt status.
    #[must_use]
    pub fn status_event(&self) -> Option<StatusEvent> {
        twilio_status(&self.message_status).map(|status| StatusEvent {
            provider_message_id: self.message_sid.clone(),
            status,
            timestamp: Utc::now(),
            error: self
                .error_code
                .as_ref()
                .map(|code| format!("Twilio error {code}")),
        })
    }
}
