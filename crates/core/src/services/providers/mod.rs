//! Messaging provider clients.
//!
//! Every provider exposes the same [`MessageSender`] capability. Sends never
//! fail past this boundary: transport and API errors come back as
//! [`SendOutcome::Failed`] and are recorded on the message.

mod twilio;
mod whatsapp;

pub use twilio::TwilioClient;
pub use whatsapp::WhatsAppClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_common::{AppError, AppResult, config::ProvidersConfig};

use crate::models::ProviderKind;
use crate::services::selector::ProviderAvailability;

/// Result of a single send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The provider accepted the message and assigned it an ID.
    Sent { provider_message_id: String },
    /// The send failed; the message is not retried in this pass.
    Failed { error: String },
}

/// Uniform send capability over one transport.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Transport implemented by this sender.
    fn kind(&self) -> ProviderKind;

    /// Send a text message.
    async fn send(&self, phone: &str, body: &str) -> SendOutcome;
}

/// Closed set of provider clients.
#[derive(Clone)]
pub enum ProviderClient {
    Whatsapp(WhatsAppClient),
    Twilio(TwilioClient),
}

#[async_trait]
impl MessageSender for ProviderClient {
    fn kind(&self) -> ProviderKind {
        match self {
            Self::Whatsapp(_) => ProviderKind::Whatsapp,
            Self::Twilio(_) => ProviderKind::Twilio,
        }
    }

    async fn send(&self, phone: &str, body: &str) -> SendOutcome {
        match self {
            Self::Whatsapp(client) => client.send(phone, body).await,
            Self::Twilio(client) => client.send(phone, body).await,
        }
    }
}

/// Resolves a provider kind to a ready sender.
pub trait SenderFactory: Send + Sync {
    /// Providers with usable credentials.
    fn availability(&self) -> ProviderAvailability;

    /// Sender for `kind`, or a configuration error when it has no credentials.
    fn sender(&self, kind: ProviderKind) -> AppResult<Arc<dyn MessageSender>>;
}

/// Shared sender factory.
pub type SenderFactoryService = Arc<dyn SenderFactory>;

/// Provider clients built from configuration.
#[derive(Clone, Default)]
pub struct Providers {
    whatsapp: Option<WhatsAppClient>,
    twilio: Option<TwilioClient>,
}

impl Providers {
    /// Build a client for every provider whose credentials are present.
    pub fn from_config(config: &ProvidersConfig) -> AppResult<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let whatsapp = match &config.whatsapp {
            Some(wa) if config.whatsapp_available() => Some(WhatsAppClient::new(wa, timeout)?),
            _ => None,
        };
        let twilio = match &config.twilio {
            Some(tw) if config.twilio_available() => Some(TwilioClient::new(tw, timeout)?),
            _ => None,
        };

        Ok(Self { whatsapp, twilio })
    }
}

impl SenderFactory for Providers {
    fn availability(&self) -> ProviderAvailability {
        ProviderAvailability {
            whatsapp: self.whatsapp.is_some(),
            twilio: self.twilio.is_some(),
        }
    }

    fn sender(&self, kind: ProviderKind) -> AppResult<Arc<dyn MessageSender>> {
        let client = match kind {
            ProviderKind::Whatsapp => self.whatsapp.clone().map(ProviderClient::Whatsapp),
            ProviderKind::Twilio => self.twilio.clone().map(ProviderClient::Twilio),
        };

        client
            .map(|c| Arc::new(c) as Arc<dyn MessageSender>)
            .ok_or_else(|| AppError::Config(format!("Provider {kind} is not configured")))
    }
}

/// Keep only the digits of a phone number.
#[must_use]
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

fn build_http_client(timeout: Duration) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use herald_common::config::{TwilioConfig, WhatsAppConfig};

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (555) 010-0200"), "15550100200");
        assert_eq!(normalize_phone("whatsapp:+44 20"), "4420");
    }

    #[test]
    fn test_providers_from_config() {
        let config = ProvidersConfig {
            whatsapp: Some(WhatsAppConfig {
                access_token: "token".to_string(),
                phone_number_id: "123".to_string(),
                api_base_url: "http://localhost".to_string(),
                verify_token: None,
                app_secret: None,
            }),
            twilio: Some(TwilioConfig {
                account_sid: String::new(),
                auth_token: "secret".to_string(),
                from_number: "+15550001111".to_string(),
                api_base_url: "http://localhost".to_string(),
            }),
            request_timeout_secs: 5,
        };

        let providers = Providers::from_config(&config).unwrap();
        assert_eq!(
            providers.availability(),
            ProviderAvailability {
                whatsapp: true,
                twilio: false
            }
        );
        assert_eq!(
            providers.sender(ProviderKind::Whatsapp).unwrap().kind(),
            ProviderKind::Whatsapp
        );
        assert!(matches!(
            providers.sender(ProviderKind::Twilio),
            Err(AppError::Config(_))
        ));
    }
}
