//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Environment variable prefix for overrides (`HERALD__QUEUE__CONCURRENCY=8`).
const ENV_PREFIX: &str = "HERALD";

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration.
    pub redis: RedisConfig,
    /// Job queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Messaging provider credentials.
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Dispatch pacing.
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Job queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// How often the worker polls for due jobs.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of campaigns processed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Attempts per job before it is moved to the dead set.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Provider credentials. A provider is available only when its section is present.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// WhatsApp Cloud API.
    #[serde(default)]
    pub whatsapp: Option<WhatsAppConfig>,
    /// Twilio WhatsApp messaging.
    #[serde(default)]
    pub twilio: Option<TwilioConfig>,
    /// Timeout applied to each outbound provider request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            whatsapp: None,
            twilio: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ProvidersConfig {
    /// Whether WhatsApp credentials are configured and non-empty.
    #[must_use]
    pub fn whatsapp_available(&self) -> bool {
        self.whatsapp
            .as_ref()
            .is_some_and(|w| !w.access_token.is_empty() && !w.phone_number_id.is_empty())
    }

    /// Whether Twilio credentials are configured and non-empty.
    #[must_use]
    pub fn twilio_available(&self) -> bool {
        self.twilio
            .as_ref()
            .is_some_and(|t| !t.account_sid.is_empty() && !t.auth_token.is_empty())
    }
}

/// WhatsApp Cloud API credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    /// Bearer token for the Graph API.
    pub access_token: String,
    /// Sending phone number ID.
    pub phone_number_id: String,
    /// Graph API base URL including version.
    #[serde(default = "default_whatsapp_api_base_url")]
    pub api_base_url: String,
    /// Token echoed during webhook subscription.
    #[serde(default)]
    pub verify_token: Option<String>,
    /// App secret used to check `X-Hub-Signature-256`.
    #[serde(default)]
    pub app_secret: Option<String>,
}

/// Twilio credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    /// Account SID.
    pub account_sid: String,
    /// Auth token.
    pub auth_token: String,
    /// Sender number in E.164 form, without the `whatsapp:` prefix.
    pub from_number: String,
    /// REST API base URL.
    #[serde(default = "default_twilio_api_base_url")]
    pub api_base_url: String,
}

/// Dispatch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Rate used when a campaign does not set one.
    #[serde(default = "default_rate_limit_per_minute")]
    pub default_rate_limit_per_minute: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_rate_limit_per_minute: default_rate_limit_per_minute(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    20
}

const fn default_min_connections() -> u32 {
    2
}

fn default_redis_prefix() -> String {
    "herald".to_string()
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_concurrency() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    2000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_request_timeout_secs() -> u64 {
    30
}

fn default_whatsapp_api_base_url() -> String {
    "https://graph.facebook.com/v18.0".to_string()
}

fn default_twilio_api_base_url() -> String {
    "https://api.twilio.com".to_string()
}

const fn default_rate_limit_per_minute() -> u32 {
    60
}

fn environment_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `HERALD_ENV`)
    /// 4. Environment variables with `HERALD__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("HERALD_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(environment_source())
            .build()?;

        config.try_deserialize::<Self>()?.validated()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(environment_source())
            .build()?;

        config.try_deserialize::<Self>()?.validated()
    }

    /// Parse configuration from a TOML document, without environment overrides.
    pub fn from_toml(toml: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    fn validated(self) -> Result<Self, config::ConfigError> {
        if self.providers.request_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "providers.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [database]
        url = "postgres://localhost/herald"

        [redis]
        url = "redis://localhost"
    "#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_toml(MINIMAL).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.redis.prefix, "herald");
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.initial_backoff_ms, 2000);
        assert_eq!(config.dispatch.default_rate_limit_per_minute, 60);
        assert!(!config.providers.whatsapp_available());
        assert!(!config.providers.twilio_available());
    }

    #[test]
    fn test_provider_sections() {
        let toml = format!(
            r#"{MINIMAL}
            [providers.whatsapp]
            access_token = "token"
            phone_number_id = "12345"

            [providers.twilio]
            account_sid = "AC123"
            auth_token = ""
            from_number = "+15550001111"
            "#
        );
        let config = Config::from_toml(&toml).unwrap();

        assert!(config.providers.whatsapp_available());
        // Empty auth token counts as unconfigured
        assert!(!config.providers.twilio_available());

        let whatsapp = config.providers.whatsapp.unwrap();
        assert_eq!(whatsapp.api_base_url, "https://graph.facebook.com/v18.0");
        assert!(whatsapp.app_secret.is_none());
    }

    #[test]
    fn test_zero_request_timeout_rejected() {
        let toml = format!("{MINIMAL}\n[providers]\nrequest_timeout_secs = 0\n");
        let err = Config::from_toml(&toml).unwrap_err();

        assert!(err.to_string().contains("request_timeout_secs"));
    }

    #[test]
    fn test_missing_database_is_error() {
        let result = Config::from_toml("[redis]\nurl = \"redis://localhost\"\n");
        assert!(result.is_err());
    }
}
