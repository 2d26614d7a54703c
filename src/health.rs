//! Health check module
//! Reports the ledger store and the set of registered payment providers.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::database::LedgerStore;
use crate::payments::ProviderRegistry;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub providers: Vec<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            providers: Vec::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Response times above this mark a component as degraded.
const SLOW_CHECK_MS: u128 = 1000;

#[derive(Clone)]
pub struct HealthChecker {
    ledger: Arc<dyn LedgerStore>,
    registry: Arc<ProviderRegistry>,
}

impl HealthChecker {
    pub fn new(ledger: Arc<dyn LedgerStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self { ledger, registry }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        health_status.providers = self
            .registry
            .list_available_providers()
            .iter()
            .map(|kind| kind.to_string())
            .collect();

        let start = Instant::now();
        let ledger = match timeout(Duration::from_secs(5), self.ledger.health_check()).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed().as_millis();
                info!("Ledger health check: OK ({}ms)", elapsed);
                if elapsed > SLOW_CHECK_MS {
                    ComponentHealth::warning(Some(elapsed), Some("Slow response".to_string()))
                } else {
                    ComponentHealth::up(Some(elapsed))
                }
            }
            Ok(Err(e)) => {
                error!("Ledger health check failed: {}", e);
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!("Ledger health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        };

        health_status.status = match ledger.status {
            ComponentState::Up => HealthState::Healthy,
            ComponentState::Warning => HealthState::Degraded,
            ComponentState::Down => HealthState::Unhealthy,
        };
        health_status.checks.insert("ledger".to_string(), ledger);
        health_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryLedgerStore;

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert_eq!(up_health.status, ComponentState::Up);
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert_eq!(down_health.status, ComponentState::Down);
        assert_eq!(down_health.details, Some("Test error".to_string()));
    }

    #[tokio::test]
    async fn in_memory_ledger_reports_healthy() {
        let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
        let registry = ProviderRegistry::new().with(Arc::new(
            crate::payments::providers::BalanceAdapter::new(ledger.clone()),
        ));
        let checker = HealthChecker::new(ledger, Arc::new(registry));

        let status = checker.check_health().await;
        assert!(status.is_healthy());
        assert_eq!(status.providers, vec!["balance".to_string()]);
        assert!(status.checks.contains_key("ledger"));
    }
}
