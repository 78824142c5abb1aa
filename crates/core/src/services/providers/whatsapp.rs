//! WhatsApp Cloud API client.

use std::time::Duration;

use async_trait::async_trait;
use herald_common::{AppResult, config::WhatsAppConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{MessageSender, SendOutcome, build_http_client, normalize_phone};
use crate::models::ProviderKind;

/// Client for the Graph API `/{phone-number-id}/messages` endpoint.
#[derive(Clone)]
pub struct WhatsAppClient {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
}

#[derive(Serialize)]
struct TextMessageRequest<'a> {
    messaging_product: &'static str,
    to: String,
    #[serde(rename = "type")]
    kind: &'static str,
    text: TextBody<'a>,
}

#[derive(Serialize)]
struct TextBody<'a> {
    body: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

impl WhatsAppClient {
    /// Create a client from credentials.
    pub fn new(config: &WhatsAppConfig, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            http: build_http_client(timeout)?,
            endpoint: format!(
                "{}/{}/messages",
                config.api_base_url.trim_end_matches('/'),
                config.phone_number_id
            ),
            access_token: config.access_token.clone(),
        })
    }
}

#[async_trait]
impl MessageSender for WhatsAppClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Whatsapp
    }

    async fn send(&self, phone: &str, body: &str) -> SendOutcome {
        let request = TextMessageRequest {
            messaging_product: "whatsapp",
            to: normalize_phone(phone),
            kind: "text",
            text: TextBody { body },
        };

        let response = match self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "WhatsApp request failed");
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
            let error = serde_json::from_str::<ErrorResponse>(&text)
                .map_or_else(|_| format!("HTTP {status}"), |r| r.error.message);
            return SendOutcome::Failed { error };
        }

        match serde_json::from_str::<SendResponse>(&text)
            .ok()
            .and_then(|r| r.messages.into_iter().next())
        {
            Some(message) => {
                debug!(provider_message_id = %message.id, "WhatsApp message accepted");
                SendOutcome::Sent {
                    provider_message_id: message.id,
                }
            }
            None => SendOutcome::Failed {
                error: "Response did not contain a message id".to_string(),
            },
        }
    }
}
