//! Domain models for campaigns and their messages.
//!
//! These are the typed views the engine works with. Storage rows are
//! converted into them by the [`crate::store`] implementations.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Scheduled,
    Sending,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Statuses from which an operator may cancel.
    pub const CANCELLABLE: [Self; 3] = [Self::Scheduled, Self::Sending, Self::Paused];
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider requested by a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    Whatsapp,
    Twilio,
    #[default]
    Auto,
}

/// A concrete transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Whatsapp,
    Twilio,
}

impl ProviderKind {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Twilio => "twilio",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Parse a provider status string. Unknown values yield `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Aggregate per-campaign counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub total: u32,
    pub sent: u32,
    pub delivered: u32,
    pub read: u32,
    pub failed: u32,
}

impl Progress {
    /// A fresh pass over `total` contacts.
    #[must_use]
    pub const fn starting(total: u32) -> Self {
        Self {
            total,
            sent: 0,
            delivered: 0,
            read: 0,
            failed: 0,
        }
    }

    const fn counter_mut(&mut self, status: MessageStatus) -> Option<&mut u32> {
        match status {
            MessageStatus::Pending => None,
            MessageStatus::Sent => Some(&mut self.sent),
            MessageStatus::Delivered => Some(&mut self.delivered),
            MessageStatus::Read => Some(&mut self.read),
            MessageStatus::Failed => Some(&mut self.failed),
        }
    }

    /// Move one message from `from` to `to`, flooring at zero.
    pub fn transfer(&mut self, from: MessageStatus, to: MessageStatus) {
        if from == to {
            return;
        }
        if let Some(counter) = self.counter_mut(from) {
            *counter = counter.saturating_sub(1);
        }
        if let Some(counter) = self.counter_mut(to) {
            *counter += 1;
        }
    }

    /// Messages that have left the pending state during the current pass.
    #[must_use]
    pub const fn attempted(&self) -> u32 {
        self.sent + self.delivered + self.read + self.failed
    }
}

/// A scheduled broadcast of one template to a set of contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub template_id: String,
    /// Contact IDs in dispatch order.
    pub contact_ids: Vec<String>,
    pub variables: BTreeMap<String, String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: CampaignStatus,
    pub progress: Progress,
    /// Zero means "use the configured default".
    pub rate_limit_per_minute: u32,
    pub provider: ProviderChoice,
    pub job_id: Option<String>,
    pub error: Option<String>,
}

/// A message template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub body: String,
    pub variables: Vec<String>,
}

/// A contact already filtered to active and not opted out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Provider acknowledgement of a sent message, plus later receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub provider_message_id: String,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Message state. Timestamps exist only once the provider has accepted the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageState {
    Pending,
    Sent(Receipt),
    Delivered(Receipt),
    Read(Receipt),
    Failed {
        error: Option<String>,
        /// Present when the provider accepted the message and later reported failure.
        receipt: Option<Receipt>,
    },
}

/// One recipient's message within a campaign pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub campaign_id: String,
    pub contact_id: String,
    pub content: String,
    pub provider: Option<ProviderKind>,
    pub state: MessageState,
    /// Reserved; dispatch never retries an individual send.
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
}

/// Default for [`Message::max_retries`].
pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl Message {
    /// A new pending message.
    #[must_use]
    pub fn pending(
        id: String,
        campaign_id: &str,
        contact_id: &str,
        content: String,
        provider: ProviderKind,
    ) -> Self {
        Self {
            id,
            campaign_id: campaign_id.to_string(),
            contact_id: contact_id.to_string(),
            content,
            provider: Some(provider),
            state: MessageState::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: Utc::now(),
        }
    }

    /// Flat status of the current state.
    #[must_use]
    pub const fn status(&self) -> MessageStatus {
        match &self.state {
            MessageState::Pending => MessageStatus::Pending,
            MessageState::Sent(_) => MessageStatus::Sent,
            MessageState::Delivered(_) => MessageStatus::Delivered,
            MessageState::Read(_) => MessageStatus::Read,
            MessageState::Failed { .. } => MessageStatus::Failed,
        }
    }

    /// Provider receipt, if the message was ever accepted.
    #[must_use]
    pub const fn receipt(&self) -> Option<&Receipt> {
        match &self.state {
            MessageState::Pending => None,
            MessageState::Sent(r) | MessageState::Delivered(r) | MessageState::Read(r) => Some(r),
            MessageState::Failed { receipt, .. } => receipt.as_ref(),
        }
    }

    /// Error text, if the message failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match &self.state {
            MessageState::Failed { error, .. } => error.as_deref(),
            _ => None,
        }
    }

    /// Record a successful send.
    pub fn mark_sent(&mut self, provider_message_id: String, at: DateTime<Utc>) {
        self.state = MessageState::Sent(Receipt {
            provider_message_id,
            sent_at: at,
            delivered_at: None,
            read_at: None,
        });
    }

    /// Record a failed send.
    pub fn mark_failed(&mut self, error: String) {
        let receipt = self.receipt().cloned();
        self.state = MessageState::Failed {
            error: Some(error),
            receipt,
        };
    }

    /// Apply a delivery receipt and return the previous status.
    ///
    /// `delivered_at` and `read_at` are only set the first time they are
    /// observed. Messages that were never accepted by a provider, and
    /// `pending` receipts, leave the message untouched.
    pub fn apply_receipt(
        &mut self,
        status: MessageStatus,
        at: DateTime<Utc>,
        error: Option<String>,
    ) -> MessageStatus {
        let old = self.status();
        let Some(mut receipt) = self.receipt().cloned() else {
            return old;
        };

        match status {
            MessageStatus::Delivered if receipt.delivered_at.is_none() => {
                receipt.delivered_at = Some(at);
            }
            MessageStatus::Read if receipt.read_at.is_none() => {
                receipt.read_at = Some(at);
            }
            _ => {}
        }

        self.state = match status {
            MessageStatus::Pending => return old,
            MessageStatus::Sent => MessageState::Sent(receipt),
            MessageStatus::Delivered => MessageState::Delivered(receipt),
            MessageStatus::Read => MessageState::Read(receipt),
            MessageStatus::Failed => MessageState::Failed {
                error: error.or_else(|| self.error().map(ToString::to_string)),
                receipt: Some(receipt),
            },
        };
        old
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sent_message() -> Message {
        let mut message = Message::pending(
            "m1".to_string(),
            "camp1",
            "c1",
            "Hi Ann".to_string(),
            ProviderKind::Whatsapp,
        );
        message.mark_sent("wamid.1".to_string(), Utc::now());
        message
    }

    #[test]
    fn test_progress_transfer_floors_at_zero() {
        let mut progress = Progress::starting(2);
        progress.transfer(MessageStatus::Sent, MessageStatus::Delivered);

        assert_eq!(progress.sent, 0);
        assert_eq!(progress.delivered, 1);
    }

    #[test]
    fn test_progress_transfer_same_status_is_noop() {
        let mut progress = Progress::starting(1);
        progress.transfer(MessageStatus::Pending, MessageStatus::Sent);
        progress.transfer(MessageStatus::Sent, MessageStatus::Sent);

        assert_eq!(progress.sent, 1);
        assert_eq!(progress.attempted(), 1);
    }

    #[test]
    fn test_apply_receipt_sets_timestamp_once() {
        let mut message = sent_message();
        let first = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let later = Utc.timestamp_opt(1_700_000_600, 0).unwrap();

        let old = message.apply_receipt(MessageStatus::Delivered, first, None);
        assert_eq!(old, MessageStatus::Sent);
        let snapshot = message.clone();

        let old = message.apply_receipt(MessageStatus::Delivered, later, None);
        assert_eq!(old, MessageStatus::Delivered);
        assert_eq!(message, snapshot);
        assert_eq!(message.receipt().unwrap().delivered_at, Some(first));
    }

    #[test]
    fn test_apply_receipt_read_keeps_delivered_at() {
        let mut message = sent_message();
        let delivered = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let read = Utc.timestamp_opt(1_700_000_100, 0).unwrap();

        message.apply_receipt(MessageStatus::Delivered, delivered, None);
        message.apply_receipt(MessageStatus::Read, read, None);

        let receipt = message.receipt().unwrap();
        assert_eq!(message.status(), MessageStatus::Read);
        assert_eq!(receipt.delivered_at, Some(delivered));
        assert_eq!(receipt.read_at, Some(read));
    }

    #[test]
    fn test_apply_receipt_ignored_without_provider_acceptance() {
        let mut message = Message::pending(
            "m2".to_string(),
            "camp1",
            "c2",
            "Hi".to_string(),
            ProviderKind::Twilio,
        );
        let old = message.apply_receipt(MessageStatus::Delivered, Utc::now(), None);

        assert_eq!(old, MessageStatus::Pending);
        assert_eq!(message.state, MessageState::Pending);
    }

    #[test]
    fn test_failed_receipt_keeps_provider_id() {
        let mut message = sent_message();
        message.apply_receipt(
            MessageStatus::Failed,
            Utc::now(),
            Some("Message undeliverable".to_string()),
        );

        assert_eq!(message.error(), Some("Message undeliverable"));
        assert_eq!(message.receipt().unwrap().provider_message_id, "wamid.1");
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(MessageStatus::parse("read"), Some(MessageStatus::Read));
        assert_eq!(MessageStatus::parse("deleted"), None);
    }
}
