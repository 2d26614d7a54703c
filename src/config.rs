//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` runs the service against the in-memory ledger.
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub providers: ProvidersConfig,
    pub refund: RefundConfig,
    pub notifier: NotifierConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Provider credentials. A rail whose credentials are absent is not registered.
#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    /// Public base URL providers call back into, e.g. `https://shop.example.com`.
    pub callback_base_url: String,
    pub http_timeout_secs: u64,
    pub crypto: Option<CryptoGatewayConfig>,
    pub paypal: Option<PaypalConfig>,
    pub payos: Option<PayosConfig>,
}

#[derive(Debug, Clone)]
pub struct CryptoGatewayConfig {
    pub api_key: String,
    pub ipn_secret: String,
    pub base_url: String,
    pub pay_currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaypalMode {
    Sandbox,
    Live,
}

impl PaypalMode {
    pub fn base_url(&self) -> &'static str {
        match self {
            PaypalMode::Sandbox => "https://api-m.sandbox.paypal.com",
            PaypalMode::Live => "https://api-m.paypal.com",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub mode: PaypalMode,
    /// Overrides the mode's base URL (tests, proxies).
    pub base_url: Option<String>,
    /// Required for remote signature verification; without it webhooks are rejected.
    pub webhook_id: Option<String>,
}

impl PaypalConfig {
    pub fn api_base(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.mode.base_url().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PayosConfig {
    pub client_id: String,
    pub api_key: String,
    pub checksum_key: String,
    pub base_url: String,
}

/// What a manual-action refund outcome does to the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualRefundPolicy {
    /// Treat "operator will finish it" as refunded right away.
    MarkRefunded,
    /// Park the payment in `refund_pending_manual` until an operator confirms.
    HoldPendingManual,
}

#[derive(Debug, Clone)]
pub struct RefundConfig {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub refund_deadline: Duration,
    pub settlement_deadline: Duration,
    pub manual_policy: ManualRefundPolicy,
    pub notify_timeout: Duration,
}

impl Default for RefundConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            refund_deadline: Duration::from_secs(30),
            settlement_deadline: Duration::from_secs(10),
            manual_policy: ManualRefundPolicy::MarkRefunded,
            notify_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotifierConfig {
    /// Discord webhook for refund notices; log-only when unset.
    pub discord_webhook_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env_optional()?,
            logging: LoggingConfig::from_env()?,
            providers: ProvidersConfig::from_env()?,
            refund: RefundConfig::from_env()?,
            notifier: NotifierConfig::from_env(),
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.providers.validate()?;
        self.refund.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env_optional() -> Result<Option<Self>, ConfigError> {
        match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Ok(Some(Self::from_url(url)?)),
            _ => Ok(None),
        }
    }

    fn from_url(url: String) -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url,
            max_connections: parse_env("DB_MAX_CONNECTIONS", 20)?,
            min_connections: parse_env("DB_MIN_CONNECTIONS", 5)?,
            connection_timeout: parse_env("DB_CONNECTION_TIMEOUT", 30)?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl ProvidersConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let crypto = match (env::var("CRYPTO_API_KEY"), env::var("CRYPTO_IPN_SECRET")) {
            (Ok(api_key), Ok(ipn_secret)) => Some(CryptoGatewayConfig {
                api_key,
                ipn_secret,
                base_url: env::var("CRYPTO_BASE_URL")
                    .unwrap_or_else(|_| "https://api.nowpayments.io".to_string()),
                pay_currency: env::var("CRYPTO_PAY_CURRENCY")
                    .unwrap_or_else(|_| "usdttrc20".to_string()),
            }),
            _ => None,
        };

        let paypal = match (
            env::var("PAYPAL_CLIENT_ID"),
            env::var("PAYPAL_CLIENT_SECRET"),
        ) {
            (Ok(client_id), Ok(client_secret)) => Some(PaypalConfig {
                client_id,
                client_secret,
                mode: match env::var("PAYPAL_MODE")
                    .unwrap_or_else(|_| "sandbox".to_string())
                    .to_lowercase()
                    .as_str()
                {
                    "sandbox" => PaypalMode::Sandbox,
                    "live" => PaypalMode::Live,
                    _ => return Err(ConfigError::InvalidValue("PAYPAL_MODE".to_string())),
                },
                base_url: env::var("PAYPAL_BASE_URL").ok(),
                webhook_id: env::var("PAYPAL_WEBHOOK_ID").ok(),
            }),
            _ => None,
        };

        let payos = match (
            env::var("PAYOS_CLIENT_ID"),
            env::var("PAYOS_API_KEY"),
            env::var("PAYOS_CHECKSUM_KEY"),
        ) {
            (Ok(client_id), Ok(api_key), Ok(checksum_key)) => Some(PayosConfig {
                client_id,
                api_key,
                checksum_key,
                base_url: env::var("PAYOS_BASE_URL")
                    .unwrap_or_else(|_| "https://api-merchant.payos.vn".to_string()),
            }),
            _ => None,
        };

        Ok(ProvidersConfig {
            callback_base_url: env::var("CALLBACK_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string()),
            http_timeout_secs: parse_env("PROVIDER_HTTP_TIMEOUT", 15)?,
            crypto,
            paypal,
            payos,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.callback_base_url.starts_with("http://")
            && !self.callback_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "CALLBACK_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.http_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PROVIDER_HTTP_TIMEOUT".to_string(),
            ));
        }

        if let Some(payos) = &self.payos {
            if payos.checksum_key.is_empty() {
                return Err(ConfigError::InvalidValue("PAYOS_CHECKSUM_KEY".to_string()));
            }
        }

        Ok(())
    }

    pub fn webhook_url(&self, provider: &str) -> String {
        format!(
            "{}/webhooks/{}",
            self.callback_base_url.trim_end_matches('/'),
            provider
        )
    }
}

impl RefundConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = RefundConfig::default();

        Ok(RefundConfig {
            max_attempts: parse_env("REFUND_MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff_base: Duration::from_millis(parse_env("REFUND_BACKOFF_BASE_MS", 500u64)?),
            refund_deadline: Duration::from_secs(parse_env("REFUND_DEADLINE_SECS", 30u64)?),
            settlement_deadline: Duration::from_secs(parse_env(
                "SETTLEMENT_DEADLINE_SECS",
                10u64,
            )?),
            manual_policy: match env::var("MANUAL_REFUND_POLICY")
                .unwrap_or_else(|_| "mark_refunded".to_string())
                .to_lowercase()
                .as_str()
            {
                "mark_refunded" => ManualRefundPolicy::MarkRefunded,
                "hold_pending_manual" => ManualRefundPolicy::HoldPendingManual,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "MANUAL_REFUND_POLICY".to_string(),
                    ))
                }
            },
            notify_timeout: Duration::from_secs(parse_env("NOTIFY_TIMEOUT_SECS", 3u64)?),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "REFUND_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        if self.refund_deadline.is_zero() || self.settlement_deadline.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "deadlines must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

impl NotifierConfig {
    pub fn from_env() -> Self {
        NotifierConfig {
            discord_webhook_url: env::var("DISCORD_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn providers() -> ProvidersConfig {
        ProvidersConfig {
            callback_base_url: "https://shop.example.com/".to_string(),
            http_timeout_secs: 15,
            crypto: None,
            paypal: None,
            payos: None,
        }
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn refund_defaults_match_documented_policy() {
        let config = RefundConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_base, Duration::from_millis(500));
        assert_eq!(config.manual_policy, ManualRefundPolicy::MarkRefunded);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let config = RefundConfig {
            max_attempts: 0,
            ..RefundConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn webhook_url_joins_without_double_slash() {
        assert_eq!(
            providers().webhook_url("payos"),
            "https://shop.example.com/webhooks/payos"
        );
    }

    #[test]
    fn callback_base_must_be_http() {
        let config = ProvidersConfig {
            callback_base_url: "shop.example.com".to_string(),
            ..providers()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn paypal_mode_selects_base_url() {
        let config = PaypalConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            mode: PaypalMode::Live,
            base_url: None,
            webhook_id: None,
        };
        assert_eq!(config.api_base(), "https://api-m.paypal.com");
    }
}
