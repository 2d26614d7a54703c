use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Provider unavailable: provider={provider}, message={message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("Provider rejected request: provider={provider}, message={message}")]
    ProviderRejected {
        provider: String,
        message: String,
        provider_code: Option<String>,
    },

    #[error("Authentication with provider failed: provider={provider}, message={message}")]
    AuthenticationError { provider: String, message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Ledger error: {message}")]
    LedgerError { message: String },
}

impl PaymentError {
    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::ProviderUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn rejected(
        provider: impl Into<String>,
        message: impl Into<String>,
        provider_code: Option<String>,
    ) -> Self {
        PaymentError::ProviderRejected {
            provider: provider.into(),
            message: message.into(),
            provider_code,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::ProviderUnavailable { .. } => true,
            PaymentError::ProviderRejected { .. } => false,
            // Token fetch failures are usually network blips on the auth host.
            PaymentError::AuthenticationError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::LedgerError { .. } => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::ProviderUnavailable { .. } => 503,
            PaymentError::ProviderRejected { .. } => 422,
            PaymentError::AuthenticationError { .. } => 502,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::WebhookVerificationError { .. } => 401,
            PaymentError::LedgerError { .. } => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::ProviderUnavailable { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::ProviderRejected { message, .. } => {
                format!("Payment provider rejected the request: {}", message)
            }
            PaymentError::AuthenticationError { .. } => {
                "Could not authenticate with the payment provider".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment provider. Please retry shortly".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => {
                "Invalid webhook signature".to_string()
            }
            PaymentError::LedgerError { .. } => "Balance ledger operation failed".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, ExternalError, ValidationError};

        let kind = match &err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.clone().unwrap_or_else(|| "request".to_string()),
                    reason: message.clone(),
                })
            }
            PaymentError::ProviderRejected {
                provider, message, ..
            } => AppErrorKind::Domain(DomainError::ProviderRejected {
                provider: provider.clone(),
                reason: message.clone(),
            }),
            PaymentError::LedgerError { message } => {
                AppErrorKind::Domain(DomainError::LedgerRejected {
                    reason: message.clone(),
                })
            }
            _ => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "payments".to_string(),
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::RateLimitError {
                message: "limited".to_string(),
                retry_after_seconds: Some(30)
            }
            .http_status_code(),
            429
        );
        assert_eq!(
            PaymentError::rejected("payos", "below minimum", None).http_status_code(),
            422
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::unavailable("payos", "HTTP 503").is_retryable());
        assert!(!PaymentError::rejected("paypal", "DENIED", None).is_retryable());
        assert!(!PaymentError::LedgerError {
            message: "insufficient balance".to_string()
        }
        .is_retryable());
    }
}
