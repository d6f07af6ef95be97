//! DDoS Mitigation Service
//!
//! This is the main entry point for the DDoS mitigation service.
//! It initializes the engine and background tasks and starts the web server.

use std::io;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use log::{error, info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;
use redis::Client;
use tokio::sync::{broadcast, mpsc};

use ddos_mitigation_service::api::{self, ApiState};
use ddos_mitigation_service::config;
use ddos_mitigation_service::core::engine::ProtectionEngine;
use ddos_mitigation_service::core::ingest::spawn_ingest_worker;
use ddos_mitigation_service::core::monitoring::Monitoring;
use ddos_mitigation_service::core::report_store::{MemoryReportStore, RedisReportStore, ReportStore};
use ddos_mitigation_service::models::StorageBackend;

fn startup_error(context: &str, e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting DDoS Mitigation Service...");

    // Load configuration
    let config = config::load_config().map_err(|e| startup_error("Failed to load configuration", e))?;

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus recorder not installed: {}", e);
            None
        }
    };

    let engine = ProtectionEngine::new(config.detection.clone())
        .map_err(|e| startup_error("Invalid detection configuration", e))?;
    let engine = Arc::new(engine);
    info!("Detectors enabled: {}", engine.detector_names().join(", "));

    let store: Arc<dyn ReportStore> = match config.storage.backend {
        StorageBackend::Redis => {
            let client = Client::open(config.redis.url.as_str())
                .map_err(|e| startup_error("Failed to create Redis client", e))?;
            Arc::new(RedisReportStore::new(client, &config.storage))
        }
        StorageBackend::Memory => Arc::new(MemoryReportStore::new(config.storage.report_capacity)),
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Background ingestion
    let (ingest_tx, ingest_rx) = mpsc::channel(config.server.ingest_queue_size.max(1));
    let ingest = spawn_ingest_worker(engine.clone(), ingest_rx, shutdown_tx.subscribe());

    // Monitoring
    let monitoring = if config.monitoring.enabled {
        let monitoring = Monitoring::new(engine.clone(), store.clone(), config.monitoring.clone());
        let shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = monitoring.start_monitoring(shutdown).await {
                error!("Monitoring stopped with error: {}", e);
            }
        }))
    } else {
        None
    };

    // Create API state
    let state = web::Data::new(ApiState::new(engine, store, metrics).with_ingest(ingest_tx));

    // Start HTTP server
    let result = HttpServer::new(move || App::new().app_data(state.clone()).configure(api::config))
        .bind((config.server.host.as_str(), config.server.port))?
        .run()
        .await;

    info!("HTTP server stopped, shutting down background tasks");
    let _ = shutdown_tx.send(());
    if let Some(handle) = monitoring {
        let _ = handle.await;
    }
    match ingest.await {
        Ok(summary) => info!("Ingest worker drained {} events", summary.processed),
        Err(e) => error!("Ingest worker failed: {}", e),
    }

    result
}
