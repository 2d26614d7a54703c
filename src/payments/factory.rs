use crate::config::{ProvidersConfig, RefundConfig};
use crate::database::LedgerStore;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::ProviderAdapter;
use crate::payments::providers::{BalanceAdapter, CryptoUsdtAdapter, PayosAdapter, PaypalAdapter};
use crate::payments::types::{ProviderKind, RefundPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Adapters by rail. Built once at startup; changing credentials means a restart.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` under its own kind, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> &mut Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> PaymentResult<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("provider {} is not configured", kind),
                field: Some("provider".to_string()),
            })
    }

    pub fn is_registered(&self, kind: ProviderKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    pub fn list_available_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.adapters.contains_key(kind))
            .collect()
    }

    /// Registers balance unconditionally and every external rail whose
    /// credentials are present.
    pub fn from_config(
        providers: &ProvidersConfig,
        refund: &RefundConfig,
        ledger: Arc<dyn LedgerStore>,
    ) -> PaymentResult<Self> {
        let timeout = Duration::from_secs(providers.http_timeout_secs);
        let mut registry = Self::new();
        registry.register(Arc::new(BalanceAdapter::new(ledger)));

        if let Some(config) = &providers.crypto {
            registry.register(Arc::new(CryptoUsdtAdapter::new(
                config.clone(),
                providers.webhook_url(ProviderKind::CryptoUsdt.as_str()),
                timeout,
            )?));
        }
        if let Some(config) = &providers.paypal {
            registry.register(Arc::new(PaypalAdapter::new(config.clone(), timeout)?));
        }
        if let Some(config) = &providers.payos {
            let base = providers.callback_base_url.trim_end_matches('/');
            registry.register(Arc::new(PayosAdapter::new(
                config.clone(),
                format!("{}/payments/return", base),
                format!("{}/payments/cancel", base),
                timeout,
                RefundPolicy::Backoff {
                    max_attempts: refund.max_attempts,
                    base_delay: refund.backoff_base,
                },
            )?));
        }

        info!(
            providers = ?registry.list_available_providers(),
            "payment providers registered"
        );
        Ok(registry)
    }
}
