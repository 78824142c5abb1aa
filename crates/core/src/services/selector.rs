//! Provider selection.

use herald_common::{AppError, AppResult, config::ProvidersConfig};

use crate::models::{ProviderChoice, ProviderKind};

/// Which providers have usable credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProviderAvailability {
    pub whatsapp: bool,
    pub twilio: bool,
}

impl ProviderAvailability {
    /// Derive availability from configured credentials.
    #[must_use]
    pub fn from_config(config: &ProvidersConfig) -> Self {
        Self {
            whatsapp: config.whatsapp_available(),
            twilio: config.twilio_available(),
        }
    }

    /// Whether `kind` can be used.
    #[must_use]
    pub const fn has(self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::Whatsapp => self.whatsapp,
            ProviderKind::Twilio => self.twilio,
        }
    }
}

/// Resolve a campaign's provider choice to a concrete transport.
///
/// An explicit choice is returned as-is. `auto` prefers WhatsApp, then
/// Twilio, and fails with a configuration error when neither is configured.
pub fn select_provider(
    choice: ProviderChoice,
    available: ProviderAvailability,
) -> AppResult<ProviderKind> {
    match choice {
        ProviderChoice::Whatsapp => Ok(ProviderKind::Whatsapp),
        ProviderChoice::Twilio => Ok(ProviderKind::Twilio),
        ProviderChoice::Auto if available.whatsapp => Ok(ProviderKind::Whatsapp),
        ProviderChoice::Auto if available.twilio => Ok(ProviderKind::Twilio),
        ProviderChoice::Auto => Err(AppError::Config(
            "No messaging provider configured".to_string(),
        )),
    }
}
