use crate::cli::ServeArgs;
use crate::infra::{
    AppState, ConfiguredProcessor, InMemoryEscrowRepository, InMemoryEvictionRepository,
    InMemoryLeaseDirectory, LoggingNotifier, SandboxProcessor,
};
use crate::routes::with_workflow_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use estate_ops::config::{AppConfig, PaymentsConfig};
use estate_ops::error::AppError;
use estate_ops::telemetry;
use estate_ops::workflows::escrow::{EscrowService, StripeClient, StripeClientConfig};
use estate_ops::workflows::eviction::{
    EvictionRepository, EvictionService, LeaseDirectory, TenantNotifier,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let eviction_service = Arc::new(EvictionService::new(
        Arc::new(InMemoryLeaseDirectory::seeded()),
        Arc::new(InMemoryEvictionRepository::default()),
        Arc::new(LoggingNotifier),
    ));

    let processor = payment_processor(&config.payments)?;
    info!(processor = processor.label(), "payment processor configured");
    let escrow_service = Arc::new(EscrowService::new(
        Arc::new(InMemoryEscrowRepository::default()),
        Arc::new(processor),
        config.payments.escrow_settings(),
    ));

    if config.evictions.sweep_interval_secs > 0 {
        spawn_expiry_sweep(
            eviction_service.clone(),
            Duration::from_secs(config.evictions.sweep_interval_secs),
        );
    }

    let app = with_workflow_routes(eviction_service, escrow_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "estate operations service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

pub(crate) fn payment_processor(
    payments: &PaymentsConfig,
) -> Result<ConfiguredProcessor, AppError> {
    match StripeClientConfig::from_payments(payments) {
        Some(stripe) => Ok(ConfiguredProcessor::Stripe(StripeClient::new(stripe)?)),
        None => {
            warn!("PAYMENTS_API_KEY not set; escrow payments use the offline sandbox");
            Ok(ConfiguredProcessor::Sandbox(SandboxProcessor::default()))
        }
    }
}

/// Run the expiry sweep on a fixed interval for the life of the process.
fn spawn_expiry_sweep<L, R, N>(service: Arc<EvictionService<L, R, N>>, every: Duration)
where
    L: LeaseDirectory + 'static,
    R: EvictionRepository + 'static,
    N: TenantNotifier + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match service.process_expired_notices(Utc::now()) {
                Ok(report) if !report.failures.is_empty() => warn!(
                    processed = report.processed,
                    failed = report.failures.len(),
                    "expiry sweep finished with failures"
                ),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "expiry sweep could not run"),
            }
        }
    });
}
