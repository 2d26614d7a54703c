use settlement_backend::api::{self, AppState};
use settlement_backend::config::AppConfig;
use settlement_backend::database::{InMemoryLedgerStore, LedgerStore};
use settlement_backend::health::HealthChecker;
use settlement_backend::logging::init_tracing;
use settlement_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use settlement_backend::payments::ProviderRegistry;
use settlement_backend::services::notification::{DiscordNotifier, LogNotifier, Notifier};
use settlement_backend::services::{CheckoutService, RefundOrchestrator, SettlementProcessor};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(feature = "database")]
async fn init_ledger(config: &AppConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    use settlement_backend::database::{init_pool_from_config, PgLedgerStore};

    match &config.database {
        Some(database) => {
            info!("📊 Initializing database connection pool...");
            let pool = init_pool_from_config(database).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "✅ Database connection pool initialized"
            );
            Ok(Arc::new(PgLedgerStore::new(pool)))
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory ledger");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
    }
}

#[cfg(not(feature = "database"))]
async fn init_ledger(_config: &AppConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    warn!("built without the database feature; using the in-memory ledger");
    Ok(Arc::new(InMemoryLedgerStore::new()))
}

fn init_notifier(config: &AppConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match &config.notifier.discord_webhook_url {
        Some(url) => {
            info!("Refund notices go to Discord");
            Ok(Arc::new(DiscordNotifier::new(
                url.clone(),
                config.refund.notify_timeout,
            )?))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "🚀 Starting settlement service"
    );

    let ledger = init_ledger(&config).await?;
    let registry = Arc::new(ProviderRegistry::from_config(
        &config.providers,
        &config.refund,
        ledger.clone(),
    )?);
    info!(
        providers = ?registry.list_available_providers(),
        "✅ Payment providers registered"
    );

    let notifier = init_notifier(&config)?;
    let settlement = Arc::new(SettlementProcessor::new(
        ledger.clone(),
        registry.clone(),
        config.refund.settlement_deadline,
    ));
    let refunds = Arc::new(RefundOrchestrator::new(
        ledger.clone(),
        registry.clone(),
        notifier,
        config.refund.clone(),
    ));
    let checkout = Arc::new(CheckoutService::new(
        ledger.clone(),
        registry.clone(),
        settlement.clone(),
    ));

    let state = AppState {
        ledger: ledger.clone(),
        settlement,
        refunds,
        checkout,
        health: HealthChecker::new(ledger, registry),
    };

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "🌐 Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}
