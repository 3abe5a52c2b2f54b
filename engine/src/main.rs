use anyhow::Context;
use clap::Parser;
use iot_engine::config::{Config, StoreKind};
use iot_engine::db::PgStore;
use iot_engine::notify::MqttNotifier;
use iot_engine::{metrics, mqtt, rest, worker, IotService, MemoryStore, Store};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("Starting IoT engine");
    info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
    info!("HTTP server: {}", config.http_addr);

    metrics::init_metrics().context("failed to register metrics")?;

    let store: Arc<dyn Store> = match config.store {
        StoreKind::Postgres => {
            info!("Database: {}", config.redacted_database_url());
            Arc::new(
                PgStore::connect(&config.database_url)
                    .await
                    .context("failed to connect to database")?,
            )
        }
        StoreKind::Memory => {
            warn!("Using in-memory store, data is lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    };

    let client_id = format!("iot-engine-{}", uuid::Uuid::new_v4());
    let (client, eventloop) = mqtt::connect(&config.mqtt_broker, config.mqtt_port, &client_id);
    let notifier = Arc::new(MqttNotifier::new(
        client.clone(),
        config.notify_topic_prefix.clone(),
    ));

    let service = Arc::new(IotService::new(store, notifier));

    // Bounded channel between MQTT intake and the pipeline
    info!("Channel capacity: {}", config.channel_capacity);
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let topic = config.mqtt_topic.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt::run_mqtt(client, eventloop, topic, tx).await {
            error!("MQTT task failed: {}", e);
        }
    });

    let worker_service = service.clone();
    let (workers, deadline_ms) = (config.ingest_workers, config.batch_deadline_ms);
    let worker_handle = tokio::spawn(async move {
        worker::run_ingest_worker(rx, worker_service, workers, deadline_ms).await;
    });

    let app = rest::create_router(service);

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = worker_handle => {
            error!("Ingest worker terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    Ok(())
}
