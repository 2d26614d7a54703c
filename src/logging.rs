//! Logging and tracing configuration
//!
//! Structured JSON logs in production, human-readable output in development.
//! Raw provider payloads pass through [`redact_sensitive_data`] before they
//! reach a log line.

use std::env;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment types for logging configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        Self::parse(
            &env::var("ENVIRONMENT")
                .or_else(|_| env::var("ENV"))
                .unwrap_or_else(|_| "development".to_string()),
        )
    }

    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        }
    }

    pub fn default_log_level(&self) -> Level {
        match self {
            Self::Development => Level::DEBUG,
            Self::Staging => Level::INFO,
            Self::Production => Level::INFO,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Initialize the tracing subscriber.
///
/// # Environment Variables
/// - `ENVIRONMENT` or `ENV`: "production", "staging" or "development"
/// - `RUST_LOG`: overrides the filter entirely
/// - `LOG_FORMAT`: force "json" or "pretty"
pub fn init_tracing() {
    let environment = Environment::from_env();

    let use_json = env::var("LOG_FORMAT")
        .map(|f| f.to_lowercase() == "json")
        .unwrap_or_else(|_| environment.is_production());

    let default_directives = format!(
        "{}={},tower_http=debug,axum=info,sqlx=warn,hyper=warn,reqwest=warn",
        env!("CARGO_PKG_NAME").replace('-', "_"),
        environment.default_log_level()
    );
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_directives))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_level(true)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).init();
    } else {
        let pretty_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(pretty_layer).init();
    }

    tracing::info!(
        environment = ?environment,
        format = if use_json { "json" } else { "pretty" },
        "Tracing initialized"
    );
}

const SENSITIVE_KEYS: [&str; 12] = [
    "secret",
    "client_secret",
    "password",
    "token",
    "access_token",
    "api_key",
    "apiKey",
    "checksumKey",
    "authorization",
    "signature",
    "card_number",
    "cvv",
];

/// Replaces the values of secret-looking JSON keys with `[REDACTED]`.
pub fn redact_sensitive_data(text: &str) -> String {
    let mut result = text.to_string();
    for key in SENSITIVE_KEYS {
        let pattern = format!(r#""{}"\s*:\s*"[^"]*""#, regex::escape(key));
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re
                .replace_all(&result, format!(r#""{}": "[REDACTED]""#, key).as_str())
                .to_string();
        }
    }
    result
}

/// Log a settlement or refund event with consistent fields.
#[macro_export]
macro_rules! log_payment_event {
    ($event:expr, $($key:tt = $value:expr),* $(,)?) => {
        tracing::info!(
            event_type = $event,
            $($key = tracing::field::display(&$value)),*
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing() {
        assert_eq!(Environment::parse("PROD"), Environment::Production);
        assert_eq!(Environment::parse("stage"), Environment::Staging);
        assert_eq!(Environment::parse("anything"), Environment::Development);
        assert!(Environment::Production.is_production());
    }

    #[test]
    fn test_default_log_levels() {
        assert_eq!(Environment::Development.default_log_level(), Level::DEBUG);
        assert_eq!(Environment::Production.default_log_level(), Level::INFO);
    }

    #[test]
    fn test_redact_sensitive_data() {
        let data = r#"{"access_token": "A21AA", "signature":"abc123", "amount": 100}"#;
        let redacted = redact_sensitive_data(data);
        assert!(redacted.contains("[REDACTED]"));
        assert!(!redacted.contains("A21AA"));
        assert!(!redacted.contains("abc123"));
        assert!(redacted.contains("100"));
    }
}
