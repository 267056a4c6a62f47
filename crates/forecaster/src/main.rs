//! Forecaster - sensor state management and forecasting service
//!
//! Runs the sharded sensor pool, the manager timers and the training
//! worker in one process, with health and metrics served over HTTP.

use anyhow::Result;
use forecast_core::{
    health::{components, HealthRegistry},
    manager::{Manager, Scheduler},
    observability::StructuredLogger,
    pool::SensorPool,
    predictor::{trainer, Forecaster, Predictor, SmoothingPredictor},
    store, ForecastService,
};
use forecaster::{api, config::AppConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting forecaster");

    let config = AppConfig::load()?;
    let forecast = config.forecast.clone();
    info!(
        instance = %config.instance,
        agents = forecast.agent_count,
        store = ?forecast.store.backend,
        "Forecaster configured"
    );

    // Initialize health registry
    let health_registry = Arc::new(HealthRegistry::new());
    health_registry.register(components::POOL).await;
    health_registry.register(components::STORE).await;
    health_registry.register(components::MANAGER).await;
    health_registry.register(components::TRAINER).await;

    let logger = StructuredLogger::new(&config.instance);
    let store = store::open(&forecast.store).await?;
    let manager = Arc::new(Manager::restore(Arc::clone(&store), &forecast).await);

    let (shutdown_tx, _) = broadcast::channel(1);
    let pool = SensorPool::start(
        &forecast,
        Arc::clone(&store),
        Arc::clone(&health_registry),
        logger.clone(),
        shutdown_tx.subscribe(),
    )
    .await;

    let predictor: Arc<dyn Predictor> = Arc::new(SmoothingPredictor::new(forecast.clone()));
    let (dispatch, requests) = trainer::channel(forecast.training.queue_size);
    let worker = trainer::TrainingWorker::new(
        pool.clone(),
        Arc::clone(&store),
        Arc::clone(&manager),
        Arc::clone(&predictor),
        Arc::clone(&health_registry),
        logger.clone(),
        forecast.store.timeout(),
    );
    let worker_handle = tokio::spawn(worker.run(requests, shutdown_tx.subscribe()));

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&manager),
        pool.clone(),
        Arc::new(dispatch),
        forecast.clone(),
        Arc::clone(&health_registry),
        logger.clone(),
    ));
    let timers = Arc::clone(&scheduler).start();

    let service = ForecastService::new(
        forecast.clone(),
        store,
        pool.clone(),
        manager,
        Forecaster::new(predictor, forecast.clone()),
    );
    logger.log_startup(SERVICE_VERSION, forecast.agent_count);

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(Arc::clone(&health_registry), service));

    health_registry.set_ready(true).await;

    // Start health and metrics server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    timers.stop().await;
    if let Err(e) = scheduler.persist().await {
        warn!(error = %e, "Final manager persist failed");
    }
    let pending = pool.shutdown().await;
    if pending > 0 {
        warn!(pending, "Sensors not persisted before exit");
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = worker_handle.await {
        warn!(error = %e, "Training worker ended abnormally");
    }
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
