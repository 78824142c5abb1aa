//! Shared handler state.

use herald_common::config::ProvidersConfig;
use herald_core::StatusIngestion;
use herald_queue::CampaignScheduler;

/// WhatsApp webhook secrets.
#[derive(Debug, Clone, Default)]
pub struct WhatsAppWebhookSettings {
    /// Token echoed back during the subscription handshake.
    pub verify_token: Option<String>,
    /// App secret for `X-Hub-Signature-256`; unset disables the check.
    pub app_secret: Option<String>,
}

impl WhatsAppWebhookSettings {
    /// Read the webhook secrets from the provider configuration.
    #[must_use]
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
        config
            .whatsapp
            .as_ref()
            .map(|wa| Self {
                verify_token: non_empty(&wa.verify_token),
                app_secret: non_empty(&wa.app_secret),
            })
            .unwrap_or_default()
    }
}

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Campaign lifecycle commands.
    pub scheduler: CampaignScheduler,
    /// Delivery receipt ingestion.
    pub ingestion: StatusIngestion,
    /// WhatsApp webhook secrets.
    pub whatsapp: WhatsAppWebhookSettings,
}

impl AppState {
    /// Create the handler state.
    #[must_use]
    pub const fn new(
        scheduler: CampaignScheduler,
        ingestion: StatusIngestion,
        whatsapp: WhatsAppWebhookSettings,
    ) -> Self {
        Self {
            scheduler,
            ingestion,
            whatsapp,
        }
    }
}
