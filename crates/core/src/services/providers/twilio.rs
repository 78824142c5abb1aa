//! Twilio WhatsApp relay client.

use std::time::Duration;

use async_trait::async_trait;
use herald_common::{AppResult, config::TwilioConfig};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{MessageSender, SendOutcome, build_http_client, normalize_phone};
use crate::models::ProviderKind;

/// Client for the Twilio Messages resource.
#[derive(Clone)]
pub struct TwilioClient {
    http: reqwest::Client,
    endpoint: String,
    account_sid: String,
    auth_token: String,
    from: String,
}

#[derive(Deserialize)]
struct MessageResource {
    sid: String,
}

#[derive(Deserialize)]
struct ErrorResource {
    message: String,
}

/// Address a number on the WhatsApp channel, e.g. `whatsapp:+15550100`.
fn whatsapp_address(phone: &str) -> String {
    format!("whatsapp:+{}", normalize_phone(phone))
}

impl TwilioClient {
    /// Create a client from credentials.
    pub fn new(config: &TwilioConfig, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            http: build_http_client(timeout)?,
            endpoint: format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                config.api_base_url.trim_end_matches('/'),
                config.account_sid
            ),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from: whatsapp_address(&config.from_number),
        })
    }
}

#[async_trait]
impl MessageSender for TwilioClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Twilio
    }

    async fn send(&self, phone: &str, body: &str) -> SendOutcome {
        let to = whatsapp_address(phone);
        let form = [("From", self.from.as_str()), ("To", to.as_str()), ("Body", body)];

        let response = match self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Twilio request failed");
                return SendOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return SendOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        if !status.is_success() {
            let error = serde_json::from_str::<ErrorResource>(&text)
                .map_or_else(|_| format!("HTTP {status}"), |r| r.message);
            return SendOutcome::Failed { error };
        }

        match serde_json::from_str::<MessageResource>(&text) {
            Ok(resource) => {
                debug!(provider_message_id = %resource.sid, "Twilio message queued");
                SendOutcome::Sent {
                    provider_message_id: resource.sid,
                }
            }
            Err(e) => SendOutcome::Failed {
                error: format!("Unexpected Twilio response: {e}"),
            },
        }
    }
}
